use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::router::appointment_routes;
use doctor_cell::router::{doctor_routes, schedule_routes};
use payment_cell::router::payment_routes;
use payment_cell::services::{PaymentInvoiceService, PaymentProvider};
use shared_utils::context::AppContext;

pub fn create_router(ctx: Arc<AppContext>, provider: Arc<dyn PaymentProvider>) -> Router {
    let payments = Arc::new(PaymentInvoiceService::new(ctx.clone(), provider));

    let api = Router::new()
        .nest("/doctors", doctor_routes(ctx.clone()))
        .nest("/schedules", schedule_routes(ctx.clone()))
        .nest("/appointments", appointment_routes(ctx))
        .nest("/payments", payment_routes(payments));

    Router::new()
        .route("/", get(|| async { "Clinic booking API is running!" }))
        .nest("/api", api)
}
