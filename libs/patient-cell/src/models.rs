use serde::Deserialize;
use thiserror::Error;

use shared_database::StoreError;
use shared_models::error::AppError;

/// Patient fields as they arrive on a booking request.
#[derive(Debug, Clone, Deserialize)]
pub struct PatientInput {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

#[derive(Error, Debug)]
pub enum PatientError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PatientError> for AppError {
    fn from(e: PatientError) -> Self {
        match e {
            PatientError::ValidationError(msg) => AppError::ValidationError(msg),
            PatientError::Store(err) => AppError::Database(err.to_string()),
        }
    }
}
