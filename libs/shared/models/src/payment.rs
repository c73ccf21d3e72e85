use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::appointment::AppointmentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    BookingFee,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::BookingFee => "BOOKING_FEE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Qpay,
    AdminOverride,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Qpay => "QPAY",
            PaymentMethod::AdminOverride => "ADMIN_OVERRIDE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub amount: i64,
    #[serde(rename = "type")]
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub qr_code: Option<String>,
    pub qr_url: Option<String>,
    pub invoice_id: Option<String>,
    pub transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// A payment without an expiry never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expires_at| expires_at <= now).unwrap_or(false)
    }

    /// An unexpired PENDING booking-fee invoice that a retry should reuse.
    pub fn is_reusable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending
            && self.payment_type == PaymentType::BookingFee
            && self.expires_at.is_some()
            && !self.is_expired_at(now)
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }

    /// Stored metadata with the keys of `patch` laid over it.
    pub fn metadata_with(&self, patch: Value) -> Value {
        let mut merged = match &self.metadata {
            Some(Value::Object(existing)) => existing.clone(),
            _ => serde_json::Map::new(),
        };
        if let Value::Object(patch) = patch {
            merged.extend(patch);
        }
        Value::Object(merged)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPayment {
    pub appointment_id: Uuid,
    pub amount: i64,
    #[serde(rename = "type")]
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub qr_code: Option<String>,
    pub qr_url: Option<String>,
    pub invoice_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
}

/// Compare-and-swap of a payment's status, without touching its appointment.
#[derive(Debug, Clone)]
pub struct PaymentTransition {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    /// Replaces stored metadata when set.
    pub metadata: Option<Value>,
}

impl PaymentTransition {
    pub fn new(from: PaymentStatus, to: PaymentStatus) -> Self {
        Self {
            from,
            to,
            refunded_at: None,
            refund_reason: None,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Marks a payment COMPLETED and moves its appointment in the same unit.
///
/// Rejected as a whole when the payment is not in `allowed_from`, when
/// `valid_at` is set and the payment has expired by then, or when the
/// appointment is not in `appointment_from`.
#[derive(Debug, Clone)]
pub struct PaymentCompletion {
    pub allowed_from: Vec<PaymentStatus>,
    pub valid_at: Option<DateTime<Utc>>,
    pub appointment_from: Vec<AppointmentStatus>,
    pub appointment_status: AppointmentStatus,
    pub method: PaymentMethod,
    pub transaction_id: String,
    pub paid_at: DateTime<Utc>,
    pub metadata: Option<Value>,
}
