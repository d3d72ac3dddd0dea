use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::info;

use crate::api::AppState;
use crate::error::{success_response, AppError};
use crate::services::reconciliation::{InitiateOrderRequest, VerifyPaymentRequest};

/// POST /api/payments/order
///
/// Create a gateway-side order for an existing order and return the
/// identifiers the checkout client needs.
pub async fn create_gateway_order(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InitiateOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    info!(order_id = ?request.order_id, "gateway order requested");
    let data = state.engine.initiate_gateway_order(request).await?;
    Ok(success_response(data, None))
}

/// POST /api/payments/verify
///
/// Verify the signed checkout callback and confirm the payment.
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    info!(
        gateway_order_id = ?request.razorpay_order_id,
        "payment verification requested"
    );
    let verified = state.engine.verify_payment(request).await?;
    Ok(success_response(verified.record, Some(&verified.message)))
}
