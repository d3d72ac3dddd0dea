//! Payment Reconciliation Engine
//!
//! Orchestrates gateway order creation, signature-verified payment
//! confirmation, and webhook-driven state correction. All collaborators are
//! injected as trait objects; the engine itself holds no connection state.
//!
//! Webhook deliveries may race the synchronous verification call for the
//! same payment. Both paths derive the resolved method and detail from the
//! gateway's payment entity and write through status-guarded single-row
//! updates, so they converge on the same terminal state.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::order_repository::OrderStore;
use crate::database::payment_record_repository::{
    PaymentRecord, PaymentRecordStore, PendingPaymentRecord,
};
use crate::error::{AppError, AppResult};
use crate::gateway::client::RazorpayGateway;
use crate::gateway::signature::{checkout_payload, verify_hmac_sha256_hex};
use crate::gateway::types::{
    CreateOrderRequest, GatewayPayment, GatewayRefund, PaymentDetail, PaymentMethod,
    PaymentStatus, WebhookEnvelope, WebhookEventKind,
};
use crate::services::notification::{NotificationEvent, NotificationSink};

pub const DEFAULT_CURRENCY: &str = "INR";

/// Shared secrets used to authenticate gateway-signed payloads.
#[derive(Debug, Clone)]
pub struct GatewaySecrets {
    /// Signs the checkout callback: HMAC over "{order_id}|{payment_id}".
    pub key_secret: String,
    /// Signs webhook deliveries: HMAC over the raw request body.
    pub webhook_secret: String,
}

// ----------------------------------------------------------------------------
// Request / response types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct InitiateOrderRequest {
    pub order_id: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiateOrderResponse {
    pub gateway_order_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPaymentRequest {
    pub razorpay_order_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    pub razorpay_signature: Option<String>,
    /// Client-declared method, a hint only; the gateway's report wins.
    pub payment_method: Option<String>,
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedPayment {
    pub record: PaymentRecord,
    pub message: String,
}

/// Webhook acknowledgment. The gateway retries on non-2xx, so this is
/// returned for every delivery that passes the signature gate.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

pub struct ReconciliationEngine {
    orders: Arc<dyn OrderStore>,
    payments: Arc<dyn PaymentRecordStore>,
    gateway: Arc<dyn RazorpayGateway>,
    notifier: Arc<dyn NotificationSink>,
    secrets: GatewaySecrets,
}

impl ReconciliationEngine {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        payments: Arc<dyn PaymentRecordStore>,
        gateway: Arc<dyn RazorpayGateway>,
        notifier: Arc<dyn NotificationSink>,
        secrets: GatewaySecrets,
    ) -> Self {
        Self {
            orders,
            payments,
            gateway,
            notifier,
            secrets,
        }
    }

    /// Create a gateway-side order for an existing order and stamp both
    /// stores with the pending payment attempt.
    pub async fn initiate_gateway_order(
        &self,
        request: InitiateOrderRequest,
    ) -> AppResult<InitiateOrderResponse> {
        let mut missing = Vec::new();
        if request.order_id.as_deref().unwrap_or("").trim().is_empty() {
            missing.push("order_id".to_string());
        }
        if request.amount.is_none() {
            missing.push("amount".to_string());
        }
        if !missing.is_empty() {
            return Err(AppError::missing_fields(missing));
        }

        let order_id = request.order_id.unwrap_or_default();
        let amount = request.amount.unwrap_or_default();
        if !amount.is_finite() || amount <= 0.0 {
            return Err(AppError::invalid_input(format!(
                "amount must be a finite positive number, got {}",
                amount
            )));
        }

        let currency = request
            .currency
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        let method = request.payment_method.unwrap_or_default();
        // Only an explicitly supplied non-default method overwrites an
        // existing record's method.
        let method_explicit = request
            .payment_method
            .map(|m| m != PaymentMethod::default())
            .unwrap_or(false);

        let order = self
            .orders
            .find_by_id(&order_id)
            .await?
            .ok_or_else(|| AppError::not_found("Order", order_id.clone()))?;

        let amount_minor = crate::gateway::types::to_minor_units(amount);

        // Gateway first: a gateway-side failure must leave both stores
        // untouched.
        let gateway_order = self
            .gateway
            .create_order(CreateOrderRequest {
                amount: amount_minor,
                currency: currency.clone(),
                receipt: order_id.clone(),
            })
            .await?;

        let record = self
            .payments
            .upsert_pending(PendingPaymentRecord {
                order_id: order_id.clone(),
                user_id: order.user_id.clone(),
                gateway_order_id: gateway_order.id.clone(),
                amount,
                currency: currency.clone(),
                method,
                method_explicit,
            })
            .await?;

        self.orders
            .stamp_payment_pending(&order_id, &gateway_order.id, amount, record.payment_method())
            .await?;

        info!(
            order_id = %order_id,
            gateway_order_id = %gateway_order.id,
            amount_minor = amount_minor,
            "gateway order initiated"
        );

        Ok(InitiateOrderResponse {
            gateway_order_id: gateway_order.id,
            amount_minor,
            currency,
            method: record.payment_method(),
        })
    }

    /// Verify the client-posted checkout callback and promote the payment
    /// to completed.
    pub async fn verify_payment(
        &self,
        request: VerifyPaymentRequest,
    ) -> AppResult<VerifiedPayment> {
        let mut missing = Vec::new();
        for (field, value) in [
            ("razorpay_order_id", &request.razorpay_order_id),
            ("razorpay_payment_id", &request.razorpay_payment_id),
            ("razorpay_signature", &request.razorpay_signature),
            ("order_id", &request.order_id),
        ] {
            if value.as_deref().unwrap_or("").trim().is_empty() {
                missing.push(field.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(AppError::missing_fields(missing));
        }

        let gateway_order_id = request.razorpay_order_id.unwrap_or_default();
        let gateway_payment_id = request.razorpay_payment_id.unwrap_or_default();
        let signature = request.razorpay_signature.unwrap_or_default();

        let payload = checkout_payload(&gateway_order_id, &gateway_payment_id);
        if !verify_hmac_sha256_hex(payload.as_bytes(), &self.secrets.key_secret, &signature) {
            return Err(AppError::invalid_signature(format!(
                "checkout signature mismatch for gateway order {}",
                gateway_order_id
            )));
        }

        let record = self
            .payments
            .find_by_gateway_order_id(&gateway_order_id)
            .await?
            .ok_or_else(|| AppError::not_found("PaymentRecord", gateway_order_id.clone()))?;

        match record.payment_status() {
            // Redundant verification of an already-confirmed payment is a
            // no-op success, but only after the signature check above.
            PaymentStatus::Completed => {
                let method = record.payment_method();
                return Ok(VerifiedPayment {
                    message: format!("Payment already verified via {}", method),
                    record,
                });
            }
            status @ (PaymentStatus::Failed | PaymentStatus::Refunded) => {
                return Err(AppError::invalid_state(format!(
                    "payment for gateway order {} is already {}; terminal states cannot be re-verified",
                    gateway_order_id, status
                )));
            }
            PaymentStatus::Pending => {}
        }

        // The gateway's payment entity is the source of truth over the
        // client-declared method.
        let payment = self.gateway.fetch_payment(&gateway_payment_id).await?;
        let hint = request
            .payment_method
            .as_deref()
            .and_then(|m| m.parse::<PaymentMethod>().ok());
        let method = PaymentMethod::resolve(payment.method.as_deref(), hint);
        let detail = PaymentDetail::from_gateway_payment(method, &payment);
        let detail_value = serde_json::to_value(&detail)
            .map_err(|e| AppError::internal(format!("failed to encode payment detail: {}", e)))?;

        let updated = self
            .payments
            .mark_completed(
                &gateway_order_id,
                &gateway_payment_id,
                Some(&signature),
                method,
                detail_value,
            )
            .await?;

        let record = match updated {
            Some(record) => record,
            // A racing writer reached a terminal state first; re-read to
            // decide whether this is convergence or a rejected regression.
            None => {
                let current = self
                    .payments
                    .find_by_gateway_order_id(&gateway_order_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::not_found("PaymentRecord", gateway_order_id.clone())
                    })?;
                if current.payment_status() == PaymentStatus::Completed {
                    current
                } else {
                    return Err(AppError::invalid_state(format!(
                        "payment for gateway order {} is already {}",
                        gateway_order_id,
                        current.payment_status()
                    )));
                }
            }
        };

        self.orders
            .mark_payment_completed(&record.order_id, &gateway_payment_id, method)
            .await?;

        self.emit(NotificationEvent::PaymentCaptured {
            order_id: record.order_id.clone(),
            gateway_payment_id: gateway_payment_id.clone(),
            amount: record.amount,
            method,
        })
        .await;

        info!(
            order_id = %record.order_id,
            gateway_order_id = %gateway_order_id,
            method = %method,
            "payment verified"
        );

        Ok(VerifiedPayment {
            message: format!("Payment verified successfully via {}", method),
            record,
        })
    }

    /// Authenticate and apply a gateway webhook delivery.
    ///
    /// Signature failure is the only rejection. Once the body is
    /// authenticated, every outcome acknowledges receipt: the gateway
    /// retries on non-2xx and duplicate retries must not cascade.
    pub async fn process_webhook(&self, raw_body: &[u8], signature: &str) -> AppResult<WebhookAck> {
        if !verify_hmac_sha256_hex(raw_body, &self.secrets.webhook_secret, signature) {
            return Err(AppError::invalid_signature("webhook signature mismatch"));
        }

        let raw: JsonValue = match serde_json::from_slice(raw_body) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "webhook body is not valid JSON, acknowledging");
                return Ok(WebhookAck { received: true });
            }
        };
        let envelope: WebhookEnvelope = match serde_json::from_value(raw.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "webhook envelope is malformed, acknowledging");
                return Ok(WebhookAck { received: true });
            }
        };

        let Some(kind) = WebhookEventKind::parse(&envelope.event) else {
            info!(event = %envelope.event, "unrecognized webhook event, acknowledging");
            return Ok(WebhookAck { received: true });
        };

        let outcome = match kind {
            WebhookEventKind::PaymentCaptured => {
                match envelope.payload.payment {
                    Some(wrapped) => {
                        let blob = raw
                            .pointer("/payload/payment/entity")
                            .cloned()
                            .unwrap_or(JsonValue::Null);
                        self.handle_payment_captured(wrapped.entity, blob).await
                    }
                    None => {
                        warn!(event = %envelope.event, "webhook is missing payment entity");
                        Ok(())
                    }
                }
            }
            WebhookEventKind::PaymentFailed => match envelope.payload.payment {
                Some(wrapped) => self.handle_payment_failed(wrapped.entity).await,
                None => {
                    warn!(event = %envelope.event, "webhook is missing payment entity");
                    Ok(())
                }
            },
            WebhookEventKind::RefundCreated => match envelope.payload.refund {
                Some(wrapped) => {
                    let blob = raw
                        .pointer("/payload/refund/entity")
                        .cloned()
                        .unwrap_or(JsonValue::Null);
                    self.handle_refund_created(wrapped.entity, blob).await
                }
                None => {
                    warn!(event = %envelope.event, "webhook is missing refund entity");
                    Ok(())
                }
            },
        };

        if let Err(e) = outcome {
            error!(event = %envelope.event, error = %e, "webhook handling failed, acknowledging");
        }

        Ok(WebhookAck { received: true })
    }

    async fn handle_payment_captured(
        &self,
        payment: GatewayPayment,
        raw_entity: JsonValue,
    ) -> AppResult<()> {
        let Some(gateway_order_id) = payment.order_id.as_deref() else {
            warn!(gateway_payment_id = %payment.id, "captured webhook has no order id");
            return Ok(());
        };

        // A webhook is not guaranteed to correspond to a known order.
        let Some(order) = self.orders.find_by_gateway_order_id(gateway_order_id).await? else {
            info!(
                gateway_order_id = %gateway_order_id,
                "captured webhook for unknown gateway order, ignoring"
            );
            return Ok(());
        };

        let method = PaymentMethod::resolve(payment.method.as_deref(), None);
        let updated = self
            .payments
            .mark_completed(gateway_order_id, &payment.id, None, method, raw_entity)
            .await?;
        if updated.is_none() {
            info!(
                gateway_order_id = %gateway_order_id,
                "captured webhook for a terminal record, skipping"
            );
            return Ok(());
        }

        self.orders
            .mark_payment_completed(&order.id, &payment.id, method)
            .await?;

        self.emit(NotificationEvent::PaymentCaptured {
            order_id: order.id.clone(),
            gateway_payment_id: payment.id.clone(),
            amount: order.total,
            method,
        })
        .await;

        info!(
            order_id = %order.id,
            gateway_payment_id = %payment.id,
            "payment captured via webhook"
        );
        Ok(())
    }

    async fn handle_payment_failed(&self, payment: GatewayPayment) -> AppResult<()> {
        let Some(gateway_order_id) = payment.order_id.as_deref() else {
            warn!(gateway_payment_id = %payment.id, "failed webhook has no order id");
            return Ok(());
        };

        let Some(order) = self.orders.find_by_gateway_order_id(gateway_order_id).await? else {
            info!(
                gateway_order_id = %gateway_order_id,
                "failed webhook for unknown gateway order, ignoring"
            );
            return Ok(());
        };

        let reason = payment
            .error_description
            .clone()
            .unwrap_or_else(|| "Payment failed".to_string());

        let updated = self.payments.mark_failed(gateway_order_id, &reason).await?;
        if updated.is_none() {
            info!(
                gateway_order_id = %gateway_order_id,
                "failed webhook for a terminal record, skipping"
            );
            return Ok(());
        }

        self.orders.mark_payment_failed(&order.id, &reason).await?;

        self.emit(NotificationEvent::PaymentFailed {
            order_id: order.id.clone(),
            reason: reason.clone(),
        })
        .await;

        warn!(order_id = %order.id, reason = %reason, "payment failed via webhook");
        Ok(())
    }

    async fn handle_refund_created(
        &self,
        refund: GatewayRefund,
        raw_entity: JsonValue,
    ) -> AppResult<()> {
        let Some(record) = self
            .payments
            .find_by_gateway_payment_id(&refund.payment_id)
            .await?
        else {
            info!(
                gateway_payment_id = %refund.payment_id,
                "refund webhook for unknown payment, ignoring"
            );
            return Ok(());
        };

        let Some(order) = self.orders.find_by_id(&record.order_id).await? else {
            info!(
                order_id = %record.order_id,
                "refund webhook for a record with no order, ignoring"
            );
            return Ok(());
        };

        let updated = self
            .payments
            .mark_refunded(&refund.payment_id, raw_entity)
            .await?;
        if updated.is_none() {
            info!(
                gateway_payment_id = %refund.payment_id,
                "refund webhook for a non-refundable record, skipping"
            );
            return Ok(());
        }

        self.orders.mark_payment_refunded(&order.id).await?;

        self.emit(NotificationEvent::PaymentRefunded {
            order_id: order.id.clone(),
            gateway_payment_id: refund.payment_id.clone(),
        })
        .await;

        info!(
            order_id = %order.id,
            refund_id = %refund.id,
            "payment refunded via webhook"
        );
        Ok(())
    }

    /// Notification failures never fail the reconciling step.
    async fn emit(&self, event: NotificationEvent) {
        if let Err(e) = self.notifier.notify(event).await {
            warn!(error = %e, "notification emission failed, continuing");
        }
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine").finish_non_exhaustive()
    }
}
