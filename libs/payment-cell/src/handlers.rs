// libs/payment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::JsonBody;

use crate::models::{CallbackPayload, CallbackQuery, CreateInvoiceRequest, RefundPaymentRequest, VerifyPaymentRequest};
use crate::services::PaymentInvoiceService;

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_invoice(
    State(service): State<Arc<PaymentInvoiceService>>,
    JsonBody(request): JsonBody<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let invoice = service.create_invoice(request.appointment_id).await?;

    let status = if invoice.reused { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(json!(invoice))))
}

#[axum::debug_handler]
pub async fn check_payment(
    State(service): State<Arc<PaymentInvoiceService>>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let status = service.check_status(payment_id).await?;

    Ok(Json(json!(status)))
}

/// Always answers 200 so the provider does not retry; failures are logged.
#[axum::debug_handler]
pub async fn payment_callback(
    State(service): State<Arc<PaymentInvoiceService>>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
    body: Bytes,
) -> Json<Value> {
    let query_invoice_id = match query {
        Ok(Query(query)) => query.invoice_id,
        Err(rejection) => {
            warn!("Ignoring unreadable callback query: {}", rejection.body_text());
            None
        }
    };
    let payload = CallbackPayload::from_bytes(&body);

    match service.handle_callback(query_invoice_id, payload).await {
        Ok(outcome) => {
            info!("Payment callback handled: {:?}", outcome);
            Json(json!({ "success": true, "message": outcome.message() }))
        }
        Err(e) => {
            error!("Payment callback failed: {}", e);
            Json(json!({ "success": true }))
        }
    }
}

#[axum::debug_handler]
pub async fn list_appointment_payments(
    State(service): State<Arc<PaymentInvoiceService>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let payments = service.list_for_appointment(appointment_id).await?;

    Ok(Json(json!(payments)))
}

#[axum::debug_handler]
pub async fn simulate_payment(
    State(service): State<Arc<PaymentInvoiceService>>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = service.simulate(payment_id).await?;

    Ok(Json(json!(appointment)))
}

// ==============================================================================
// ADMIN HANDLERS
// ==============================================================================

/// The body is optional; an empty one verifies without a transaction id.
#[axum::debug_handler]
pub async fn verify_payment(
    State(service): State<Arc<PaymentInvoiceService>>,
    Extension(user): Extension<User>,
    Path(payment_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        VerifyPaymentRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    let appointment = service.verify(payment_id, &user, request).await?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn refund_payment(
    State(service): State<Arc<PaymentInvoiceService>>,
    Extension(user): Extension<User>,
    Path(payment_id): Path<Uuid>,
    JsonBody(request): JsonBody<RefundPaymentRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Admin {} refunding payment {}", user.audit_name(), payment_id);

    let payment = service.refund(payment_id, &request.reason).await?;

    Ok(Json(json!({
        "success": true,
        "payment": payment,
    })))
}
