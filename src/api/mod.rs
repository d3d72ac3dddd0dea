pub mod payments;
pub mod webhooks;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::health::HealthChecker;
use crate::services::reconciliation::ReconciliationEngine;

/// Shared state for all route handlers.
pub struct AppState {
    pub engine: ReconciliationEngine,
    pub health: HealthChecker,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/payments/order", post(payments::create_gateway_order))
        .route("/api/payments/verify", post(payments::verify_payment))
        .route("/webhooks/razorpay", post(webhooks::handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl axum::response::IntoResponse {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };
    (code, axum::Json(status))
}
