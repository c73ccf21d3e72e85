// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_utils::context::AppContext;
use shared_utils::extractor::{admin_middleware, auth_middleware};

use crate::handlers;

pub fn appointment_routes(ctx: Arc<AppContext>) -> Router {
    let public_routes = Router::new()
        .route("/", post(handlers::create_appointment))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment).delete(handlers::cancel_appointment),
        );

    let patient_routes = Router::new()
        .route("/my", get(handlers::my_appointments))
        .layer(middleware::from_fn_with_state(ctx.config.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/", get(handlers::list_appointments))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))
        .layer(middleware::from_fn_with_state(ctx.config.clone(), admin_middleware));

    Router::new()
        .merge(public_routes)
        .merge(patient_routes)
        .merge(admin_routes)
        .with_state(ctx)
}
