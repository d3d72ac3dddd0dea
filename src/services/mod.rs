//! Services module for business logic and integrations

pub mod notification;
pub mod reconciliation;

pub use notification::{LogNotifier, NotificationEvent, NotificationSink};
pub use reconciliation::{
    GatewaySecrets, InitiateOrderRequest, InitiateOrderResponse, ReconciliationEngine,
    VerifiedPayment, VerifyPaymentRequest, WebhookAck, DEFAULT_CURRENCY,
};
