use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::scheduling::{DayOfWeek, Schedule, ScheduleEntry, SchedulePlan};
use shared_utils::context::AppContext;

use crate::models::{validate_entry, ScheduleError};

/// Diffs the desired weekly schedule against stored rows.
///
/// Weekdays in `desired` are upserted unless an identical active row is
/// already stored; active weekdays missing from `desired` are deactivated.
pub fn plan_schedule_replacement(existing: &[Schedule], desired: &[ScheduleEntry]) -> Result<SchedulePlan, ScheduleError> {
    let mut seen = HashSet::new();
    for entry in desired {
        validate_entry(entry)?;
        if !seen.insert(entry.day_of_week) {
            return Err(ScheduleError::Validation(format!(
                "{} appears more than once",
                entry.day_of_week
            )));
        }
    }

    let upserts = desired
        .iter()
        .filter(|entry| {
            !existing.iter().any(|row| {
                row.is_active
                    && row.day_of_week == entry.day_of_week
                    && row.start_time == entry.start_time
                    && row.end_time == entry.end_time
                    && row.slot_duration == entry.slot_duration
            })
        })
        .cloned()
        .collect();

    let mut deactivate: Vec<DayOfWeek> = existing
        .iter()
        .filter(|row| row.is_active && !seen.contains(&row.day_of_week))
        .map(|row| row.day_of_week)
        .collect();
    deactivate.sort();
    deactivate.dedup();

    Ok(SchedulePlan { upserts, deactivate })
}

pub struct SchedulingService {
    ctx: Arc<AppContext>,
}

impl SchedulingService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    async fn ensure_doctor(&self, doctor_id: Uuid) -> Result<(), ScheduleError> {
        match self.ctx.store.get_doctor(doctor_id).await? {
            Some(_) => Ok(()),
            None => Err(ScheduleError::DoctorNotFound),
        }
    }

    pub async fn list_schedules(&self, doctor_id: Uuid) -> Result<Vec<Schedule>, ScheduleError> {
        debug!("Fetching schedules for doctor {}", doctor_id);
        self.ensure_doctor(doctor_id).await?;
        Ok(self.ctx.store.list_schedules(doctor_id).await?)
    }

    pub async fn upsert_schedule(&self, doctor_id: Uuid, entry: &ScheduleEntry) -> Result<Schedule, ScheduleError> {
        validate_entry(entry)?;
        self.ensure_doctor(doctor_id).await?;

        let schedule = self.ctx.store.upsert_schedule(doctor_id, entry).await?;
        info!(
            "Schedule {} set for doctor {}: {} {}-{}",
            schedule.id, doctor_id, schedule.day_of_week, schedule.start_time, schedule.end_time
        );
        Ok(schedule)
    }

    pub async fn replace_schedules(&self, doctor_id: Uuid, desired: &[ScheduleEntry]) -> Result<Vec<Schedule>, ScheduleError> {
        self.ensure_doctor(doctor_id).await?;

        let existing = self.ctx.store.list_schedules(doctor_id).await?;
        let plan = plan_schedule_replacement(&existing, desired)?;

        if plan.is_empty() {
            debug!("Schedules for doctor {} already match", doctor_id);
            return Ok(existing);
        }

        let schedules = self.ctx.store.apply_schedule_plan(doctor_id, &plan).await?;
        info!(
            "Replaced schedules for doctor {}: {} upserted, {} deactivated",
            doctor_id,
            plan.upserts.len(),
            plan.deactivate.len()
        );
        Ok(schedules)
    }

    pub async fn deactivate_schedule(&self, schedule_id: Uuid) -> Result<Schedule, ScheduleError> {
        let schedule = self
            .ctx
            .store
            .deactivate_schedule(schedule_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => ScheduleError::ScheduleNotFound,
                other => ScheduleError::Store(other),
            })?;

        info!("Deactivated schedule {} ({})", schedule.id, schedule.day_of_week);
        Ok(schedule)
    }
}
