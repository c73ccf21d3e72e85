// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::context::AppContext;
use shared_utils::extractor::JsonBody;

use crate::models::{AppointmentListQuery, CreateAppointmentRequest, UpdateStatusRequest};
use crate::services::BookingService;

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(ctx): State<Arc<AppContext>>,
    JsonBody(request): JsonBody<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let appointment = BookingService::new(ctx).create_appointment(request).await?;

    Ok((StatusCode::CREATED, Json(json!(appointment))))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(ctx): State<Arc<AppContext>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let details = BookingService::new(ctx).get_appointment(appointment_id).await?;

    Ok(Json(json!(details)))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(ctx): State<Arc<AppContext>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = BookingService::new(ctx).cancel_appointment(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
    })))
}

// ==============================================================================
// PATIENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn my_appointments(
    State(ctx): State<Arc<AppContext>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointments = BookingService::new(ctx).patient_appointments(&user).await?;

    Ok(Json(json!(appointments)))
}

// ==============================================================================
// ADMIN HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_appointments(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let listing = BookingService::new(ctx).list_appointments(query).await?;

    Ok(Json(json!(listing)))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(ctx): State<Arc<AppContext>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    JsonBody(request): JsonBody<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Admin {} setting appointment {} to {}", user.audit_name(), appointment_id, request.status);

    let appointment = BookingService::new(ctx)
        .update_status(appointment_id, request.status)
        .await?;

    Ok(Json(json!(appointment)))
}
