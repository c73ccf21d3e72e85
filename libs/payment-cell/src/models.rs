// libs/payment-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::appointment::Appointment;
use shared_models::error::AppError;
use shared_models::payment::{Payment, PaymentStatus};

pub const EXPIRED_MESSAGE: &str = "QR code expired, please generate a new one";
pub const FAILED_MESSAGE: &str = "Payment failed, please retry";

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoiceRequest {
    #[serde(alias = "appointmentId")]
    pub appointment_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyPaymentRequest {
    #[serde(default, alias = "transactionId")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundPaymentRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    pub invoice_id: Option<String>,
}

/// Webhook body as the provider (or a tester) sends it. Every field is
/// optional and nothing in it is trusted without a provider check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(default, alias = "invoiceId")]
    pub invoice_id: Option<String>,
    #[serde(default, alias = "transactionId", alias = "payment_id")]
    pub transaction_id: Option<String>,
    #[serde(default, alias = "payment_status")]
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
}

impl CallbackPayload {
    /// Lenient parse; an unreadable body is treated as empty.
    pub fn from_bytes(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    pub fn signals_success(&self) -> bool {
        matches!(
            self.status.as_deref().map(str::to_ascii_uppercase).as_deref(),
            Some("PAID" | "SUCCESS" | "COMPLETED")
        )
    }

    pub fn signals_failure(&self) -> bool {
        self.status.is_some() && !self.signals_success()
    }

    pub fn amount(&self) -> Option<f64> {
        self.amount.as_ref().and_then(amount_value)
    }

    /// Absent amounts match; present ones must equal the expected fee.
    pub fn amount_matches(&self, expected: i64) -> bool {
        match self.amount.as_ref() {
            None | Some(Value::Null) => true,
            Some(_) => self.amount() == Some(expected as f64),
        }
    }
}

// ==============================================================================
// RESPONSES
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceResponse {
    pub payment_id: Uuid,
    pub amount: i64,
    pub qr_code: Option<String>,
    pub qr_url: Option<String>,
    pub invoice_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// An unexpired invoice already existed and was handed back.
    #[serde(skip)]
    pub reused: bool,
}

impl InvoiceResponse {
    pub fn from_payment(payment: &Payment, reused: bool) -> Self {
        Self {
            payment_id: payment.id,
            amount: payment.amount,
            qr_code: payment.qr_code.clone(),
            qr_url: payment.qr_url.clone(),
            invoice_id: payment.invoice_id.clone(),
            expires_at: payment.expires_at,
            reused,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusResponse {
    pub payment_id: Uuid,
    pub appointment_id: Uuid,
    pub amount: i64,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment: Option<Appointment>,
}

impl PaymentStatusResponse {
    pub fn new(payment: &Payment, appointment: Option<Appointment>) -> Self {
        let message = match payment.status {
            PaymentStatus::Expired => Some(EXPIRED_MESSAGE.to_string()),
            PaymentStatus::Failed => Some(FAILED_MESSAGE.to_string()),
            PaymentStatus::Pending | PaymentStatus::Completed | PaymentStatus::Refunded => None,
        };

        Self {
            payment_id: payment.id,
            appointment_id: payment.appointment_id,
            amount: payment.amount,
            status: payment.status,
            paid_at: payment.paid_at,
            message,
            appointment,
        }
    }
}

/// What a webhook delivery did. The HTTP answer is the same for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    UnknownInvoice,
    AlreadyProcessed(PaymentStatus),
    Completed,
    Failed,
    Expired,
    StillPending,
}

impl CallbackOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            CallbackOutcome::UnknownInvoice => "Unknown invoice",
            CallbackOutcome::AlreadyProcessed(_) => "Already processed",
            CallbackOutcome::Completed => "Payment confirmed",
            CallbackOutcome::Failed => FAILED_MESSAGE,
            CallbackOutcome::Expired => EXPIRED_MESSAGE,
            CallbackOutcome::StillPending => "Payment not yet confirmed",
        }
    }
}

// ==============================================================================
// PROVIDER MODELS
// ==============================================================================

/// What the invoice manager asks the provider for.
#[derive(Debug, Clone)]
pub struct InvoiceRequest {
    pub sender_invoice_no: String,
    pub receiver_code: String,
    pub description: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QPayAuthResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_expires_in: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QPayInvoiceRequest {
    pub invoice_code: String,
    pub sender_invoice_no: String,
    pub invoice_receiver_code: String,
    pub invoice_description: String,
    pub amount: i64,
    pub callback_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInvoice {
    pub invoice_id: String,
    #[serde(default)]
    pub qr_text: Option<String>,
    #[serde(default)]
    pub qr_image: Option<String>,
    #[serde(default, rename = "qPay_shortUrl")]
    pub short_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QPayPaymentCheckRequest {
    pub object_type: String,
    pub object_id: String,
    pub offset: QPayOffset,
}

#[derive(Debug, Clone, Serialize)]
pub struct QPayOffset {
    pub page_number: u32,
    pub page_limit: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentCheck {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub paid_amount: Option<Value>,
    #[serde(default)]
    pub rows: Vec<PaymentCheckRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCheckRow {
    pub payment_id: String,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub payment_amount: Option<Value>,
}

impl PaymentCheckRow {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("PAID")
    }
}

impl PaymentCheck {
    /// `paid_amount` when the provider reports one, otherwise the sum of
    /// PAID rows.
    pub fn total_paid(&self) -> f64 {
        match self.paid_amount.as_ref().and_then(amount_value) {
            Some(paid) if paid > 0.0 => paid,
            _ => self
                .rows
                .iter()
                .filter(|row| row.is_paid())
                .filter_map(|row| row.payment_amount.as_ref().and_then(amount_value))
                .sum(),
        }
    }

    pub fn covers(&self, amount: i64) -> bool {
        self.total_paid() >= amount as f64
    }

    pub fn has_payments(&self) -> bool {
        self.count > 0 || !self.rows.is_empty()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.rows
            .iter()
            .find(|row| row.is_paid())
            .or_else(|| self.rows.first())
            .map(|row| row.payment_id.as_str())
    }
}

/// Provider amounts arrive as numbers or decimal strings.
fn amount_value(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Payment not found")]
    NotFound,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("QPay is not configured")]
    NotConfigured,

    #[error("QPay rejected the access token")]
    Unauthorized,

    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PaymentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::StaleState(msg) => PaymentError::InvalidState(msg),
            other => PaymentError::Store(other),
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        PaymentError::Provider(e.to_string())
    }
}

impl From<PaymentError> for AppError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::NotFound | PaymentError::AppointmentNotFound => AppError::NotFound(e.to_string()),
            PaymentError::InvalidState(msg) => AppError::InvalidState(msg),
            PaymentError::ValidationError(msg) => AppError::ValidationError(msg),
            PaymentError::Forbidden(msg) => AppError::Forbidden(msg),
            PaymentError::NotConfigured | PaymentError::Unauthorized | PaymentError::Provider(_) => {
                AppError::ExternalService(e.to_string())
            }
            PaymentError::Store(StoreError::NotFound(msg)) => AppError::NotFound(msg),
            PaymentError::Store(StoreError::Conflict(msg)) => AppError::Conflict(msg),
            PaymentError::Store(err) => AppError::Database(err.to_string()),
        }
    }
}
