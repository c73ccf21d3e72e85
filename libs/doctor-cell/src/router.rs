use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::context::AppContext;
use shared_utils::extractor::admin_middleware;

use crate::handlers;

/// Mounted under `/doctors`.
pub fn doctor_routes(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/{doctor_id}/slots", get(handlers::get_available_slots))
        .with_state(ctx)
}

/// Mounted under `/schedules`; every route is admin-only.
pub fn schedule_routes(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", post(handlers::upsert_schedule))
        .route("/bulk", post(handlers::replace_schedules))
        // GET takes a doctor id, DELETE a schedule id.
        .route("/{id}", get(handlers::list_schedules).delete(handlers::deactivate_schedule))
        .layer(middleware::from_fn_with_state(ctx.config.clone(), admin_middleware))
        .with_state(ctx)
}
