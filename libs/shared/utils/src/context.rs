use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use shared_config::AppConfig;
use shared_database::ClinicStore;

use crate::clock::{Clock, SystemClock};
use crate::time::to_local;

/// Everything a service needs besides its own collaborators.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ClinicStore>,
    pub clock: Arc<dyn Clock>,
}

impl AppContext {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn ClinicStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Arc<AppConfig>, store: Arc<dyn ClinicStore>, clock: Arc<dyn Clock>) -> Self {
        Self { config, store, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn local_now(&self) -> NaiveDateTime {
        to_local(self.now(), self.config.clinic_utc_offset_hours)
    }

    pub fn today(&self) -> NaiveDate {
        self.local_now().date()
    }
}
