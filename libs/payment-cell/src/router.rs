// libs/payment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::admin_middleware;

use crate::handlers;
use crate::services::PaymentInvoiceService;

pub fn payment_routes(service: Arc<PaymentInvoiceService>) -> Router {
    let public_routes = Router::new()
        .route("/create-invoice", post(handlers::create_invoice))
        .route("/check/{payment_id}", get(handlers::check_payment))
        .route("/callback", post(handlers::payment_callback))
        .route("/appointment/{appointment_id}", get(handlers::list_appointment_payments))
        .route("/simulate-payment/{payment_id}", post(handlers::simulate_payment));

    let admin_routes = Router::new()
        .route("/{payment_id}/verify", post(handlers::verify_payment))
        .route("/{payment_id}/refund", post(handlers::refund_payment))
        .layer(middleware::from_fn_with_state(service.config(), admin_middleware));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(service)
}
