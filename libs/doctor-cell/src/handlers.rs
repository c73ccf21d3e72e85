use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;
use shared_utils::context::AppContext;
use shared_utils::extractor::JsonBody;
use shared_utils::time::parse_date;

use crate::models::{ReplaceSchedulesRequest, SlotQuery, UpsertScheduleRequest};
use crate::services::{AvailabilityService, SchedulingService};

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_available_slots(
    State(ctx): State<Arc<AppContext>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let raw_date = query
        .date
        .ok_or_else(|| AppError::ValidationError("date query parameter is required".to_string()))?;
    let date = parse_date(&raw_date, ctx.config.clinic_utc_offset_hours)
        .ok_or_else(|| AppError::ValidationError(format!("Invalid date '{}', expected YYYY-MM-DD", raw_date)))?;

    let slots = AvailabilityService::new(ctx).get_available_slots(doctor_id, date).await?;

    Ok(Json(json!(slots)))
}

// ==============================================================================
// ADMIN HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_schedules(
    State(ctx): State<Arc<AppContext>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let schedules = SchedulingService::new(ctx).list_schedules(doctor_id).await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "schedules": schedules,
    })))
}

#[axum::debug_handler]
pub async fn upsert_schedule(
    State(ctx): State<Arc<AppContext>>,
    JsonBody(request): JsonBody<UpsertScheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let schedule = SchedulingService::new(ctx)
        .upsert_schedule(request.doctor_id, &request.entry)
        .await?;

    Ok(Json(json!(schedule)))
}

#[axum::debug_handler]
pub async fn replace_schedules(
    State(ctx): State<Arc<AppContext>>,
    JsonBody(request): JsonBody<ReplaceSchedulesRequest>,
) -> Result<Json<Value>, AppError> {
    let schedules = SchedulingService::new(ctx)
        .replace_schedules(request.doctor_id, &request.schedules)
        .await?;

    Ok(Json(json!({
        "doctor_id": request.doctor_id,
        "schedules": schedules,
    })))
}

#[axum::debug_handler]
pub async fn deactivate_schedule(
    State(ctx): State<Arc<AppContext>>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let schedule = SchedulingService::new(ctx).deactivate_schedule(schedule_id).await?;

    Ok(Json(json!({
        "success": true,
        "schedule": schedule,
    })))
}
