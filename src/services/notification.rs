use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::gateway::types::PaymentMethod;

#[derive(Debug, Error)]
#[error("notification delivery failed: {message}")]
pub struct NotificationError {
    pub message: String,
}

/// Human-readable reconciliation events.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    PaymentCaptured {
        order_id: String,
        gateway_payment_id: String,
        amount: f64,
        method: PaymentMethod,
    },
    PaymentFailed {
        order_id: String,
        reason: String,
    },
    PaymentRefunded {
        order_id: String,
        gateway_payment_id: String,
    },
}

/// Receive-only collaborator that records reconciliation events. Delivery
/// failures must never fail the reconciling step; the engine swallows and
/// logs them.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: NotificationEvent) -> Result<(), NotificationError>;
}

/// Log-backed sink. Placeholder for real notification delivery (email, SMS,
/// push); for now events land in the structured log.
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, event: NotificationEvent) -> Result<(), NotificationError> {
        match event {
            NotificationEvent::PaymentCaptured {
                order_id,
                gateway_payment_id,
                amount,
                method,
            } => {
                info!(
                    order_id = %order_id,
                    gateway_payment_id = %gateway_payment_id,
                    amount = %amount,
                    method = %method,
                    "🔔 NOTIFICATION: Payment Captured"
                );
            }
            NotificationEvent::PaymentFailed { order_id, reason } => {
                error!(
                    order_id = %order_id,
                    reason = %reason,
                    "🔔 NOTIFICATION: Payment Failed"
                );
            }
            NotificationEvent::PaymentRefunded {
                order_id,
                gateway_payment_id,
            } => {
                info!(
                    order_id = %order_id,
                    gateway_payment_id = %gateway_payment_id,
                    "🔔 NOTIFICATION: Payment Refunded"
                );
            }
        }
        Ok(())
    }
}
