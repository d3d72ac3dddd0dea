use crate::gateway::error::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Normalized payment method stored on orders and payment records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Upi,
    Netbanking,
    Wallet,
    Emi,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Netbanking => "netbanking",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Emi => "emi",
        }
    }

    /// Map the gateway's reported method through the fixed normalization
    /// table. Unrecognized or absent methods keep the client-declared hint,
    /// defaulting to card.
    pub fn resolve(gateway_method: Option<&str>, hint: Option<PaymentMethod>) -> PaymentMethod {
        match gateway_method {
            Some("upi") | Some("upi_intent") => PaymentMethod::Upi,
            Some("netbanking") => PaymentMethod::Netbanking,
            Some("wallet") => PaymentMethod::Wallet,
            Some("emi") => PaymentMethod::Emi,
            Some("card") => PaymentMethod::Card,
            _ => hint.unwrap_or(PaymentMethod::Card),
        }
    }
}

impl Default for PaymentMethod {
    fn default() -> Self {
        PaymentMethod::Card
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "card" => Ok(PaymentMethod::Card),
            "upi" => Ok(PaymentMethod::Upi),
            "netbanking" => Ok(PaymentMethod::Netbanking),
            "wallet" => Ok(PaymentMethod::Wallet),
            "emi" => Ok(PaymentMethod::Emi),
            _ => Err(GatewayError::ValidationError {
                message: format!("unsupported payment method: {}", value),
                field: Some("payment_method".to_string()),
            }),
        }
    }
}

/// Payment lifecycle state. `Completed`, `Failed` and `Refunded` are
/// terminal, with the single exception of `Completed -> Refunded`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Refunded
        )
    }

    /// The only transition allowed out of a terminal state.
    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        match self {
            PaymentStatus::Pending => true,
            PaymentStatus::Completed => matches!(target, PaymentStatus::Refunded),
            PaymentStatus::Failed | PaymentStatus::Refunded => false,
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status.to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Method-specific payment detail. Exactly one variant is valid for a given
/// resolved method; sub-fields the gateway omits are filled with "unknown".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentDetail {
    Upi {
        vpa: String,
    },
    Netbanking {
        bank: String,
        ifsc: String,
    },
    Wallet {
        wallet: String,
    },
    Card {
        last4: String,
        network: String,
        issuer: String,
    },
}

const UNKNOWN: &str = "unknown";

impl PaymentDetail {
    /// Build the detail variant for `method` from the authoritative gateway
    /// payment entity. EMI payments are card-backed, so they carry card
    /// detail.
    pub fn from_gateway_payment(method: PaymentMethod, payment: &GatewayPayment) -> Self {
        let or_unknown = |v: &Option<String>| {
            v.as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(UNKNOWN)
                .to_string()
        };
        match method {
            PaymentMethod::Upi => PaymentDetail::Upi {
                vpa: or_unknown(&payment.vpa),
            },
            PaymentMethod::Netbanking => PaymentDetail::Netbanking {
                bank: or_unknown(&payment.bank),
                ifsc: or_unknown(&payment.ifsc),
            },
            PaymentMethod::Wallet => PaymentDetail::Wallet {
                wallet: or_unknown(&payment.wallet),
            },
            PaymentMethod::Card | PaymentMethod::Emi => {
                let card = payment.card.as_ref();
                PaymentDetail::Card {
                    last4: or_unknown(&card.and_then(|c| c.last4.clone())),
                    network: or_unknown(&card.and_then(|c| c.network.clone())),
                    issuer: or_unknown(&card.and_then(|c| c.issuer.clone())),
                }
            }
        }
    }
}

/// Convert a major-unit amount to the gateway's integer minor unit.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

// ----------------------------------------------------------------------------
// Gateway wire types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    /// Amount in minor units (paise for INR).
    pub amount: i64,
    pub currency: String,
    /// Our order id; lets the gateway order be traced back to the order.
    pub receipt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayCard {
    #[serde(default)]
    pub last4: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
}

/// Authoritative payment entity as returned by the gateway's fetch-payment
/// API and carried in webhook payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub vpa: Option<String>,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub ifsc: Option<String>,
    #[serde(default)]
    pub wallet: Option<String>,
    #[serde(default)]
    pub card: Option<GatewayCard>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: Option<JsonValue>,
}

// ----------------------------------------------------------------------------
// Webhook envelope
// ----------------------------------------------------------------------------

/// Recognized webhook event names. Parsing is strict so that dispatch stays
/// an exhaustive match; unrecognized names are handled at the parse site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    PaymentCaptured,
    PaymentFailed,
    RefundCreated,
}

impl WebhookEventKind {
    pub fn parse(event: &str) -> Option<Self> {
        match event {
            "payment.captured" => Some(WebhookEventKind::PaymentCaptured),
            "payment.failed" => Some(WebhookEventKind::PaymentFailed),
            "refund.created" => Some(WebhookEventKind::RefundCreated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventKind::PaymentCaptured => "payment.captured",
            WebhookEventKind::PaymentFailed => "payment.failed",
            WebhookEventKind::RefundCreated => "refund.created",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub payment: Option<WrappedPayment>,
    #[serde(default)]
    pub refund: Option<WrappedRefund>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WrappedPayment {
    pub entity: GatewayPayment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WrappedRefund {
    pub entity: GatewayRefund,
}
