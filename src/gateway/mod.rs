//! Razorpay gateway integration: typed wire formats, HMAC signature
//! verification, and the injected client trait.

pub mod client;
pub mod error;
pub mod signature;
pub mod types;

pub use client::{RazorpayClient, RazorpayConfig, RazorpayGateway};
pub use error::{GatewayError, GatewayResult};
pub use types::{
    PaymentDetail, PaymentMethod, PaymentStatus, WebhookEnvelope, WebhookEventKind,
};
