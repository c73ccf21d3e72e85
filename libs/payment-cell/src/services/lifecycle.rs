// libs/payment-cell/src/services/lifecycle.rs
use tracing::warn;

use shared_models::payment::PaymentStatus;

use crate::models::PaymentError;

/// Statuses an admin may force to COMPLETED. Provider confirmation only
/// ever starts from PENDING.
pub const ADMIN_VERIFIABLE: [PaymentStatus; 3] = [
    PaymentStatus::Pending,
    PaymentStatus::Failed,
    PaymentStatus::Expired,
];

pub struct PaymentLifecycleService;

impl PaymentLifecycleService {
    pub fn valid_transitions(current: PaymentStatus) -> &'static [PaymentStatus] {
        match current {
            PaymentStatus::Pending => &[
                PaymentStatus::Completed,
                PaymentStatus::Failed,
                PaymentStatus::Expired,
            ],
            PaymentStatus::Completed => &[PaymentStatus::Refunded],
            PaymentStatus::Failed | PaymentStatus::Expired | PaymentStatus::Refunded => &[],
        }
    }

    pub fn validate_transition(from: PaymentStatus, to: PaymentStatus) -> Result<(), PaymentError> {
        if !Self::valid_transitions(from).contains(&to) {
            warn!("Invalid payment transition attempted: {} -> {}", from, to);
            return Err(PaymentError::InvalidState(format!(
                "Payment cannot move from {} to {}",
                from, to
            )));
        }

        Ok(())
    }

    pub fn validate_admin_verification(current: PaymentStatus) -> Result<(), PaymentError> {
        match current {
            PaymentStatus::Completed => Err(PaymentError::InvalidState(
                "Payment has already been confirmed".to_string(),
            )),
            PaymentStatus::Refunded => Err(PaymentError::InvalidState(
                "Payment has already been refunded".to_string(),
            )),
            PaymentStatus::Pending | PaymentStatus::Failed | PaymentStatus::Expired => Ok(()),
        }
    }
}
