use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::AppState;
use crate::error::AppError;

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// POST /webhooks/razorpay
///
/// The body is taken raw: the HMAC must be computed over the exact bytes
/// the gateway signed, never a re-serialization.
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    info!("received gateway webhook");

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("webhook is missing the signature header");
            AppError::invalid_signature("missing x-razorpay-signature header")
        })?;

    // Signature failure is the only rejection; everything past the gate
    // acknowledges so gateway retries do not cascade.
    let ack = state.engine.process_webhook(body.as_bytes(), signature).await?;
    Ok((StatusCode::OK, Json(ack)))
}
