// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use doctor_cell::models::{ScheduleError, NOT_WORKING_DAY};
use patient_cell::models::{PatientError, PatientInput};
use shared_database::StoreError;
use shared_models::appointment::{Appointment, AppointmentStatus, PageRequest, Patient};
use shared_models::error::AppError;
use shared_models::scheduling::Doctor;

pub const SLOT_TAKEN: &str = "This time is already taken";

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointmentRequest {
    #[serde(alias = "doctorId")]
    pub doctor_id: Uuid,
    /// `YYYY-MM-DD` or an RFC 3339 timestamp.
    pub date: String,
    /// `HH:MM`.
    pub time: String,
    #[serde(alias = "patientName")]
    pub patient_name: String,
    #[serde(alias = "patientPhone")]
    pub patient_phone: String,
    #[serde(default, alias = "patientEmail")]
    pub patient_email: Option<String>,
    #[serde(default, alias = "serviceId")]
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateAppointmentRequest {
    pub fn patient(&self) -> PatientInput {
        PatientInput {
            name: self.patient_name.clone(),
            phone: self.patient_phone.clone(),
            email: self.patient_email.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

/// Admin listing filters; `page` is one-based.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentListQuery {
    /// `YYYY-MM-DD` or an RFC 3339 timestamp.
    pub date: Option<String>,
    #[serde(alias = "doctorId")]
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

// ==============================================================================
// RESPONSES
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentDetails {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub patient: Option<Patient>,
    pub doctor: Option<Doctor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(request: PageRequest, total: u64) -> Self {
        Self {
            page: request.page,
            limit: request.limit,
            total,
            total_pages: total.div_ceil(u64::from(request.limit)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentListResponse {
    pub appointments: Vec<Appointment>,
    pub pagination: Pagination,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("{}", NOT_WORKING_DAY)]
    NotWorkingDay,

    #[error("Selected time is outside the doctor's working hours")]
    OutsideSchedule,

    #[error("Selected time is not a valid slot")]
    OffGrid,

    #[error("{}", SLOT_TAKEN)]
    SlotTaken,

    #[error("Cannot select a past date")]
    PastDate,

    #[error("Cannot select a past time")]
    PastTime,

    #[error("{0}")]
    ValidationError(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Appointment cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AppointmentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => AppointmentError::NotFound,
            StoreError::Conflict(_) => AppointmentError::SlotTaken,
            other => AppointmentError::Store(other),
        }
    }
}

impl From<ScheduleError> for AppointmentError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::DoctorNotFound => AppointmentError::DoctorNotFound,
            ScheduleError::ScheduleNotFound => AppointmentError::NotWorkingDay,
            ScheduleError::Validation(msg) => AppointmentError::ValidationError(msg),
            ScheduleError::Store(err) => err.into(),
        }
    }
}

impl From<PatientError> for AppointmentError {
    fn from(e: PatientError) -> Self {
        match e {
            PatientError::ValidationError(msg) => AppointmentError::ValidationError(msg),
            PatientError::Store(err) => AppointmentError::Store(err),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::NotFound | AppointmentError::DoctorNotFound => AppError::NotFound(e.to_string()),
            AppointmentError::SlotTaken => AppError::Conflict(e.to_string()),
            AppointmentError::Forbidden(msg) => AppError::Forbidden(msg),
            AppointmentError::InvalidStatusTransition { .. } => AppError::InvalidState(e.to_string()),
            AppointmentError::Store(StoreError::StaleState(msg)) => AppError::InvalidState(msg),
            AppointmentError::Store(err) => AppError::Database(err.to_string()),
            AppointmentError::NotWorkingDay
            | AppointmentError::OutsideSchedule
            | AppointmentError::OffGrid
            | AppointmentError::PastDate
            | AppointmentError::PastTime
            | AppointmentError::ValidationError(_) => AppError::ValidationError(e.to_string()),
        }
    }
}
