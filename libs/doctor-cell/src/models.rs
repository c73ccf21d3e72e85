use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::error::AppError;
use shared_models::scheduling::{Schedule, ScheduleEntry, MAX_SLOT_DURATION, MIN_SLOT_DURATION};
use shared_models::time::hhmm;

pub const NOT_WORKING_DAY: &str = "Doctor does not work on this day";

// ==============================================================================
// SLOT GENERATION
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorSlots {
    pub date: NaiveDate,
    pub doctor_id: Uuid,
    pub slots: Vec<TimeSlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DoctorSlots {
    pub fn available_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.available).count()
    }
}

// ==============================================================================
// SCHEDULE MANAGEMENT
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertScheduleRequest {
    #[serde(alias = "doctorId")]
    pub doctor_id: Uuid,
    #[serde(flatten)]
    pub entry: ScheduleEntry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceSchedulesRequest {
    #[serde(alias = "doctorId")]
    pub doctor_id: Uuid,
    pub schedules: Vec<ScheduleEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorSchedules {
    pub doctor_id: Uuid,
    pub schedules: Vec<Schedule>,
}

/// Rejects windows that would generate no slots or a nonsensical grid.
pub fn validate_entry(entry: &ScheduleEntry) -> Result<(), ScheduleError> {
    if entry.start_time >= entry.end_time {
        return Err(ScheduleError::Validation(format!(
            "{}: start time must be before end time",
            entry.day_of_week
        )));
    }

    if !(MIN_SLOT_DURATION..=MAX_SLOT_DURATION).contains(&entry.slot_duration) {
        return Err(ScheduleError::Validation(format!(
            "{}: slot duration must be between {} and {} minutes",
            entry.day_of_week, MIN_SLOT_DURATION, MAX_SLOT_DURATION
        )));
    }

    Ok(())
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Schedule not found")]
    ScheduleNotFound,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ScheduleError> for AppError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::DoctorNotFound | ScheduleError::ScheduleNotFound => AppError::NotFound(e.to_string()),
            ScheduleError::Validation(msg) => AppError::ValidationError(msg),
            ScheduleError::Store(StoreError::NotFound(msg)) => AppError::NotFound(msg),
            ScheduleError::Store(StoreError::Conflict(msg)) => AppError::Conflict(msg),
            ScheduleError::Store(other) => AppError::Database(other.to_string()),
        }
    }
}
