use std::sync::Arc;

use tracing::debug;

use shared_models::appointment::{Patient, PatientDetails};
use shared_utils::context::AppContext;
use shared_utils::time::{is_valid_email, is_valid_phone, normalize_phone};

use crate::models::{PatientError, PatientInput};

pub struct PatientService {
    ctx: Arc<AppContext>,
}

impl PatientService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Trims and checks the booking's patient fields. A blank email counts
    /// as no email.
    pub fn normalize(input: &PatientInput) -> Result<PatientDetails, PatientError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(PatientError::ValidationError("Patient name is required".to_string()));
        }

        let phone = normalize_phone(input.phone.trim());
        if phone.is_empty() {
            return Err(PatientError::ValidationError("Patient phone is required".to_string()));
        }
        if !is_valid_phone(&phone) {
            return Err(PatientError::ValidationError("Invalid phone number".to_string()));
        }

        let email = match input.email.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(email) if is_valid_email(email) => Some(email.to_lowercase()),
            Some(_) => return Err(PatientError::ValidationError("Invalid email format".to_string())),
        };

        Ok(PatientDetails {
            name: name.to_string(),
            phone,
            email,
        })
    }

    pub async fn upsert_by_phone(&self, details: &PatientDetails) -> Result<Patient, PatientError> {
        debug!("Upserting patient by phone {}", details.phone);
        let patient = self.ctx.store.upsert_patient(details).await?;
        debug!("Patient {} resolved for phone {}", patient.id, patient.phone);
        Ok(patient)
    }
}
