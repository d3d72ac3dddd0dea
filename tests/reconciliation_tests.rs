//! End-to-end tests for the reconciliation engine against in-memory stores
//! and a scripted gateway.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use cartpay_backend::database::error::DatabaseError;
use cartpay_backend::database::order_repository::{Order, OrderStore};
use cartpay_backend::database::payment_record_repository::{
    PaymentRecord, PaymentRecordStore, PendingPaymentRecord,
};
use cartpay_backend::gateway::client::RazorpayGateway;
use cartpay_backend::gateway::error::{GatewayError, GatewayResult};
use cartpay_backend::gateway::signature::{checkout_payload, hmac_sha256_hex};
use cartpay_backend::gateway::types::{
    CreateOrderRequest, GatewayOrder, GatewayPayment, PaymentMethod,
};
use cartpay_backend::services::notification::{
    NotificationError, NotificationEvent, NotificationSink,
};
use cartpay_backend::services::reconciliation::{
    GatewaySecrets, InitiateOrderRequest, ReconciliationEngine, VerifyPaymentRequest,
};

const KEY_SECRET: &str = "test_key_secret";
const WEBHOOK_SECRET: &str = "test_webhook_secret";

// ----------------------------------------------------------------------------
// In-memory collaborators
// ----------------------------------------------------------------------------

#[derive(Default)]
struct MemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
}

impl MemoryOrderStore {
    fn seed(&self, order: Order) {
        self.orders.lock().unwrap().insert(order.id.clone(), order);
    }

    fn get(&self, order_id: &str) -> Option<Order> {
        self.orders.lock().unwrap().get(order_id).cloned()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn find_by_id(&self, order_id: &str) -> Result<Option<Order>, DatabaseError> {
        Ok(self.get(order_id))
    }

    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.payment_gateway_order_id.as_deref() == Some(gateway_order_id))
            .cloned())
    }

    async fn stamp_payment_pending(
        &self,
        order_id: &str,
        gateway_order_id: &str,
        amount: f64,
        method: PaymentMethod,
    ) -> Result<(), DatabaseError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| DatabaseError::not_found("Order", order_id))?;
        order.payment_gateway_order_id = Some(gateway_order_id.to_string());
        order.payment_status = "pending".to_string();
        order.payment_amount = Some(amount);
        order.payment_method = Some(method.as_str().to_string());
        Ok(())
    }

    async fn mark_payment_completed(
        &self,
        order_id: &str,
        gateway_payment_id: &str,
        method: PaymentMethod,
    ) -> Result<(), DatabaseError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(order_id)
            .filter(|o| o.payment_status != "refunded")
            .ok_or_else(|| DatabaseError::not_found("Order", order_id))?;
        order.payment_status = "completed".to_string();
        order.payment_gateway_payment_id = Some(gateway_payment_id.to_string());
        order.payment_method = Some(method.as_str().to_string());
        if order.status == "pending" {
            order.status = "confirmed".to_string();
        }
        Ok(())
    }

    async fn mark_payment_failed(
        &self,
        order_id: &str,
        _error_description: &str,
    ) -> Result<(), DatabaseError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(order_id)
            .filter(|o| o.payment_status == "pending" || o.payment_status == "failed")
            .ok_or_else(|| DatabaseError::not_found("Order", order_id))?;
        order.payment_status = "failed".to_string();
        Ok(())
    }

    async fn mark_payment_refunded(&self, order_id: &str) -> Result<(), DatabaseError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(order_id)
            .filter(|o| o.payment_status == "completed" || o.payment_status == "refunded")
            .ok_or_else(|| DatabaseError::not_found("Order", order_id))?;
        order.payment_status = "refunded".to_string();
        Ok(())
    }
}

#[derive(Default)]
struct MemoryPaymentStore {
    records: Mutex<HashMap<String, PaymentRecord>>,
}

impl MemoryPaymentStore {
    fn by_gateway_order(&self, gateway_order_id: &str) -> Option<PaymentRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.gateway_order_id == gateway_order_id)
            .cloned()
    }

    fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentRecordStore for MemoryPaymentStore {
    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self.by_gateway_order(gateway_order_id))
    }

    async fn find_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.gateway_payment_id.as_deref() == Some(gateway_payment_id))
            .cloned())
    }

    async fn upsert_pending(
        &self,
        pending: PendingPaymentRecord,
    ) -> Result<PaymentRecord, DatabaseError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .entry(pending.order_id.clone())
            .or_insert_with(|| PaymentRecord {
                id: Uuid::new_v4(),
                order_id: pending.order_id.clone(),
                user_id: pending.user_id.clone(),
                gateway_order_id: pending.gateway_order_id.clone(),
                gateway_payment_id: None,
                signature: None,
                amount: pending.amount,
                currency: pending.currency.clone(),
                method: pending.method.as_str().to_string(),
                status: "pending".to_string(),
                detail: None,
                error_description: None,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            });
        record.gateway_order_id = pending.gateway_order_id;
        record.amount = pending.amount;
        record.currency = pending.currency;
        if pending.method_explicit {
            record.method = pending.method.as_str().to_string();
        }
        record.status = "pending".to_string();
        Ok(record.clone())
    }

    async fn mark_completed(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: Option<&str>,
        method: PaymentMethod,
        detail: serde_json::Value,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.values_mut().find(|r| {
            r.gateway_order_id == gateway_order_id
                && (r.status == "pending" || r.status == "completed")
        }) else {
            return Ok(None);
        };
        record.status = "completed".to_string();
        record.gateway_payment_id = Some(gateway_payment_id.to_string());
        if let Some(signature) = signature {
            record.signature = Some(signature.to_string());
        }
        record.method = method.as_str().to_string();
        record.detail = Some(detail);
        Ok(Some(record.clone()))
    }

    async fn mark_failed(
        &self,
        gateway_order_id: &str,
        error_description: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.values_mut().find(|r| {
            r.gateway_order_id == gateway_order_id
                && (r.status == "pending" || r.status == "failed")
        }) else {
            return Ok(None);
        };
        record.status = "failed".to_string();
        record.error_description = Some(error_description.to_string());
        Ok(Some(record.clone()))
    }

    async fn mark_refunded(
        &self,
        gateway_payment_id: &str,
        refund_detail: serde_json::Value,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.values_mut().find(|r| {
            r.gateway_payment_id.as_deref() == Some(gateway_payment_id)
                && (r.status == "completed" || r.status == "refunded")
        }) else {
            return Ok(None);
        };
        record.status = "refunded".to_string();
        record.detail = Some(refund_detail);
        Ok(Some(record.clone()))
    }
}

/// Scripted gateway: create_order mints sequential ids, fetch_payment
/// replays a configured payment entity.
struct ScriptedGateway {
    create_calls: AtomicUsize,
    fail_create: AtomicBool,
    payment: Mutex<Option<GatewayPayment>>,
}

impl ScriptedGateway {
    fn new() -> Self {
        Self {
            create_calls: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            payment: Mutex::new(None),
        }
    }

    fn script_payment(&self, payment: GatewayPayment) {
        *self.payment.lock().unwrap() = Some(payment);
    }
}

#[async_trait]
impl RazorpayGateway for ScriptedGateway {
    async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<GatewayOrder> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::NetworkError {
                message: "connection reset".to_string(),
            });
        }
        Ok(GatewayOrder {
            id: format!("order_rzp_{}", n),
            amount: request.amount,
            currency: request.currency,
            receipt: Some(request.receipt),
            status: Some("created".to_string()),
        })
    }

    async fn fetch_payment(&self, gateway_payment_id: &str) -> GatewayResult<GatewayPayment> {
        self.payment
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| GatewayError::ProviderError {
                message: format!("payment {} not found", gateway_payment_id),
                provider_code: Some("BAD_REQUEST_ERROR".to_string()),
                retryable: false,
            })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, event: NotificationEvent) -> Result<(), NotificationError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

struct Harness {
    engine: ReconciliationEngine,
    orders: Arc<MemoryOrderStore>,
    payments: Arc<MemoryPaymentStore>,
    gateway: Arc<ScriptedGateway>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    let orders = Arc::new(MemoryOrderStore::default());
    let payments = Arc::new(MemoryPaymentStore::default());
    let gateway = Arc::new(ScriptedGateway::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = ReconciliationEngine::new(
        orders.clone(),
        payments.clone(),
        gateway.clone(),
        notifier.clone(),
        GatewaySecrets {
            key_secret: KEY_SECRET.to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
        },
    );
    Harness {
        engine,
        orders,
        payments,
        gateway,
        notifier,
    }
}

fn order(id: &str, total: f64) -> Order {
    Order {
        id: id.to_string(),
        user_id: "U1".to_string(),
        items: json!([{"product_id": "P1", "quantity": 1, "price": total}]),
        subtotal: total,
        tax: 0.0,
        total,
        status: "pending".to_string(),
        payment_method: None,
        payment_status: "pending".to_string(),
        payment_gateway_order_id: None,
        payment_gateway_payment_id: None,
        payment_amount: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

fn upi_payment(id: &str, gateway_order_id: &str) -> GatewayPayment {
    serde_json::from_value(json!({
        "id": id,
        "order_id": gateway_order_id,
        "status": "captured",
        "method": "upi",
        "vpa": "shopper@upi"
    }))
    .unwrap()
}

async fn initiate(h: &Harness, order_id: &str, amount: f64) -> String {
    h.engine
        .initiate_gateway_order(InitiateOrderRequest {
            order_id: Some(order_id.to_string()),
            amount: Some(amount),
            currency: None,
            payment_method: None,
        })
        .await
        .unwrap()
        .gateway_order_id
}

async fn verify(h: &Harness, order_id: &str, gateway_order_id: &str, payment_id: &str) {
    let signature = hmac_sha256_hex(
        checkout_payload(gateway_order_id, payment_id).as_bytes(),
        KEY_SECRET,
    );
    h.engine
        .verify_payment(VerifyPaymentRequest {
            razorpay_order_id: Some(gateway_order_id.to_string()),
            razorpay_payment_id: Some(payment_id.to_string()),
            razorpay_signature: Some(signature),
            payment_method: None,
            order_id: Some(order_id.to_string()),
        })
        .await
        .unwrap();
}

fn signed_webhook(body: &serde_json::Value) -> (Vec<u8>, String) {
    let raw = serde_json::to_vec(body).unwrap();
    let signature = hmac_sha256_hex(&raw, WEBHOOK_SECRET);
    (raw, signature)
}

// ----------------------------------------------------------------------------
// Initiation
// ----------------------------------------------------------------------------

#[tokio::test]
async fn initiation_converts_to_minor_units_and_stamps_pending() {
    let h = harness();
    h.orders.seed(order("O1", 499.0));

    let response = h
        .engine
        .initiate_gateway_order(InitiateOrderRequest {
            order_id: Some("O1".to_string()),
            amount: Some(499.0),
            currency: None,
            payment_method: Some(PaymentMethod::Upi),
        })
        .await
        .unwrap();

    assert_eq!(response.amount_minor, 49900);
    assert_eq!(response.currency, "INR");
    assert_eq!(response.method, PaymentMethod::Upi);

    let record = h.payments.by_gateway_order(&response.gateway_order_id).unwrap();
    assert_eq!(record.status, "pending");
    assert_eq!(record.amount, 499.0);
    assert_eq!(record.user_id, "U1");

    let stored = h.orders.get("O1").unwrap();
    assert_eq!(
        stored.payment_gateway_order_id.as_deref(),
        Some(response.gateway_order_id.as_str())
    );
    assert_eq!(stored.payment_status, "pending");
}

#[tokio::test]
async fn initiation_lists_every_missing_field() {
    let h = harness();
    let err = h
        .engine
        .initiate_gateway_order(InitiateOrderRequest {
            order_id: None,
            amount: None,
            currency: None,
            payment_method: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert!(err.user_message().contains("order_id"));
    assert!(err.user_message().contains("amount"));
}

#[tokio::test]
async fn initiation_for_unknown_order_never_reaches_the_gateway() {
    let h = harness();
    let err = h
        .engine
        .initiate_gateway_order(InitiateOrderRequest {
            order_id: Some("missing".to_string()),
            amount: Some(10.0),
            currency: None,
            payment_method: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(h.gateway.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn gateway_failure_leaves_stores_untouched() {
    let h = harness();
    h.orders.seed(order("O1", 250.0));
    h.gateway.fail_create.store(true, Ordering::SeqCst);

    let err = h
        .engine
        .initiate_gateway_order(InitiateOrderRequest {
            order_id: Some("O1".to_string()),
            amount: Some(250.0),
            currency: None,
            payment_method: None,
        })
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 502);
    assert!(err.is_retryable());
    assert_eq!(h.payments.count(), 0);
    assert!(h.orders.get("O1").unwrap().payment_gateway_order_id.is_none());
}

#[tokio::test]
async fn re_initiation_refreshes_the_existing_record_in_place() {
    let h = harness();
    h.orders.seed(order("O1", 499.0));

    let first = initiate(&h, "O1", 499.0).await;
    let second = initiate(&h, "O1", 525.0).await;

    assert_ne!(first, second);
    assert_eq!(h.payments.count(), 1);
    let record = h.payments.by_gateway_order(&second).unwrap();
    assert_eq!(record.amount, 525.0);
    assert_eq!(record.status, "pending");
}

// ----------------------------------------------------------------------------
// Verification
// ----------------------------------------------------------------------------

#[tokio::test]
async fn verification_promotes_record_and_confirms_order() {
    let h = harness();
    h.orders.seed(order("O1", 499.0));
    let gateway_order_id = initiate(&h, "O1", 499.0).await;
    h.gateway.script_payment(upi_payment("pay_1", &gateway_order_id));

    verify(&h, "O1", &gateway_order_id, "pay_1").await;

    let record = h.payments.by_gateway_order(&gateway_order_id).unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(record.method, "upi");
    assert_eq!(record.detail.as_ref().unwrap()["type"], "upi");
    assert_eq!(record.detail.as_ref().unwrap()["vpa"], "shopper@upi");

    let stored = h.orders.get("O1").unwrap();
    assert_eq!(stored.payment_status, "completed");
    assert_eq!(stored.status, "confirmed");

    let events = h.notifier.events.lock().unwrap();
    assert!(matches!(
        events.as_slice(),
        [NotificationEvent::PaymentCaptured { .. }]
    ));
}

#[tokio::test]
async fn tampered_signature_is_rejected_without_mutation() {
    let h = harness();
    h.orders.seed(order("O1", 499.0));
    let gateway_order_id = initiate(&h, "O1", 499.0).await;
    h.gateway.script_payment(upi_payment("pay_1", &gateway_order_id));

    let err = h
        .engine
        .verify_payment(VerifyPaymentRequest {
            razorpay_order_id: Some(gateway_order_id.clone()),
            razorpay_payment_id: Some("pay_1".to_string()),
            razorpay_signature: Some("deadbeef".to_string()),
            payment_method: None,
            order_id: Some("O1".to_string()),
        })
        .await
        .unwrap_err();

    assert!(err.is_signature_rejection());
    assert_eq!(err.status_code(), 400);
    let record = h.payments.by_gateway_order(&gateway_order_id).unwrap();
    assert_eq!(record.status, "pending");
    assert!(h.notifier.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn verification_lists_every_missing_callback_field() {
    let h = harness();
    let err = h
        .engine
        .verify_payment(VerifyPaymentRequest {
            razorpay_order_id: Some("order_rzp_1".to_string()),
            razorpay_payment_id: None,
            razorpay_signature: Some("  ".to_string()),
            payment_method: None,
            order_id: None,
        })
        .await
        .unwrap_err();
    let message = err.user_message();
    assert!(message.contains("razorpay_payment_id"));
    assert!(message.contains("razorpay_signature"));
    assert!(message.contains("order_id"));
    assert!(!message.contains("razorpay_order_id,"));
}

#[tokio::test]
async fn redundant_verification_is_a_no_op_success() {
    let h = harness();
    h.orders.seed(order("O1", 499.0));
    let gateway_order_id = initiate(&h, "O1", 499.0).await;
    h.gateway.script_payment(upi_payment("pay_1", &gateway_order_id));

    verify(&h, "O1", &gateway_order_id, "pay_1").await;

    let signature = hmac_sha256_hex(
        checkout_payload(&gateway_order_id, "pay_1").as_bytes(),
        KEY_SECRET,
    );
    let verified = h
        .engine
        .verify_payment(VerifyPaymentRequest {
            razorpay_order_id: Some(gateway_order_id.clone()),
            razorpay_payment_id: Some("pay_1".to_string()),
            razorpay_signature: Some(signature),
            payment_method: None,
            order_id: Some("O1".to_string()),
        })
        .await
        .unwrap();

    assert!(verified.message.contains("already verified"));
    // The no-op path emits no second notification.
    assert_eq!(h.notifier.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn terminal_failed_record_rejects_verification() {
    let h = harness();
    h.orders.seed(order("O1", 499.0));
    let gateway_order_id = initiate(&h, "O1", 499.0).await;
    h.payments.mark_failed(&gateway_order_id, "card declined").await.unwrap();

    let signature = hmac_sha256_hex(
        checkout_payload(&gateway_order_id, "pay_1").as_bytes(),
        KEY_SECRET,
    );
    let err = h
        .engine
        .verify_payment(VerifyPaymentRequest {
            razorpay_order_id: Some(gateway_order_id.clone()),
            razorpay_payment_id: Some("pay_1".to_string()),
            razorpay_signature: Some(signature),
            payment_method: None,
            order_id: Some("O1".to_string()),
        })
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 409);
    let record = h.payments.by_gateway_order(&gateway_order_id).unwrap();
    assert_eq!(record.status, "failed");
}

#[tokio::test]
async fn gateway_report_overrides_client_method_hint() {
    let h = harness();
    h.orders.seed(order("O1", 499.0));
    let gateway_order_id = initiate(&h, "O1", 499.0).await;
    h.gateway.script_payment(upi_payment("pay_1", &gateway_order_id));

    let signature = hmac_sha256_hex(
        checkout_payload(&gateway_order_id, "pay_1").as_bytes(),
        KEY_SECRET,
    );
    let verified = h
        .engine
        .verify_payment(VerifyPaymentRequest {
            razorpay_order_id: Some(gateway_order_id.clone()),
            razorpay_payment_id: Some("pay_1".to_string()),
            razorpay_signature: Some(signature),
            payment_method: Some("card".to_string()),
            order_id: Some("O1".to_string()),
        })
        .await
        .unwrap();

    assert!(verified.message.contains("via upi"));
    assert_eq!(h.payments.by_gateway_order(&gateway_order_id).unwrap().method, "upi");
}

// ----------------------------------------------------------------------------
// Webhooks
// ----------------------------------------------------------------------------

#[tokio::test]
async fn webhook_with_invalid_signature_is_the_only_rejection() {
    let h = harness();
    let body = json!({"event": "payment.captured", "payload": {}});
    let raw = serde_json::to_vec(&body).unwrap();

    let err = h.engine.process_webhook(&raw, "deadbeef").await.unwrap_err();
    assert!(err.is_signature_rejection());
}

#[tokio::test]
async fn malformed_but_authentic_webhook_is_acknowledged() {
    let h = harness();
    let raw = b"not json at all".to_vec();
    let signature = hmac_sha256_hex(&raw, WEBHOOK_SECRET);

    let ack = h.engine.process_webhook(&raw, &signature).await.unwrap();
    assert!(ack.received);
}

#[tokio::test]
async fn unrecognized_event_is_acknowledged_without_side_effects() {
    let h = harness();
    let (raw, signature) = signed_webhook(&json!({"event": "order.paid", "payload": {}}));

    let ack = h.engine.process_webhook(&raw, &signature).await.unwrap();
    assert!(ack.received);
    assert_eq!(h.payments.count(), 0);
}

#[tokio::test]
async fn captured_webhook_for_unknown_order_is_acknowledged() {
    let h = harness();
    let (raw, signature) = signed_webhook(&json!({
        "event": "payment.captured",
        "payload": {"payment": {"entity": {
            "id": "pay_9", "order_id": "order_rzp_unknown", "method": "upi"
        }}}
    }));

    let ack = h.engine.process_webhook(&raw, &signature).await.unwrap();
    assert!(ack.received);
    assert!(h.notifier.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn captured_webhook_completes_a_pending_payment() {
    let h = harness();
    h.orders.seed(order("O1", 499.0));
    let gateway_order_id = initiate(&h, "O1", 499.0).await;

    let (raw, signature) = signed_webhook(&json!({
        "event": "payment.captured",
        "payload": {"payment": {"entity": {
            "id": "pay_1",
            "order_id": gateway_order_id,
            "status": "captured",
            "method": "netbanking",
            "bank": "HDFC"
        }}}
    }));
    let ack = h.engine.process_webhook(&raw, &signature).await.unwrap();
    assert!(ack.received);

    let record = h.payments.by_gateway_order(&gateway_order_id).unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(record.method, "netbanking");
    // Webhook path stores the raw gateway entity as the detail blob.
    assert_eq!(record.detail.as_ref().unwrap()["bank"], "HDFC");

    let stored = h.orders.get("O1").unwrap();
    assert_eq!(stored.payment_status, "completed");
    assert_eq!(stored.status, "confirmed");
}

#[tokio::test]
async fn failed_webhook_records_the_gateway_description() {
    let h = harness();
    h.orders.seed(order("O1", 499.0));
    let gateway_order_id = initiate(&h, "O1", 499.0).await;

    let (raw, signature) = signed_webhook(&json!({
        "event": "payment.failed",
        "payload": {"payment": {"entity": {
            "id": "pay_1",
            "order_id": gateway_order_id,
            "error_description": "Insufficient funds"
        }}}
    }));
    h.engine.process_webhook(&raw, &signature).await.unwrap();

    let record = h.payments.by_gateway_order(&gateway_order_id).unwrap();
    assert_eq!(record.status, "failed");
    assert_eq!(record.error_description.as_deref(), Some("Insufficient funds"));
    assert_eq!(h.orders.get("O1").unwrap().payment_status, "failed");

    let events = h.notifier.events.lock().unwrap();
    assert!(matches!(
        events.as_slice(),
        [NotificationEvent::PaymentFailed { .. }]
    ));
}

#[tokio::test]
async fn duplicate_failed_webhook_is_a_no_op() {
    let h = harness();
    h.orders.seed(order("O1", 499.0));
    let gateway_order_id = initiate(&h, "O1", 499.0).await;

    let body = json!({
        "event": "payment.failed",
        "payload": {"payment": {"entity": {
            "id": "pay_1",
            "order_id": gateway_order_id,
            "error_description": "Insufficient funds"
        }}}
    });
    let (raw, signature) = signed_webhook(&body);
    h.engine.process_webhook(&raw, &signature).await.unwrap();

    // Redelivery re-applies the same terminal state and still acknowledges.
    let (raw, signature) = signed_webhook(&body);
    let ack = h.engine.process_webhook(&raw, &signature).await.unwrap();
    assert!(ack.received);

    let record = h.payments.by_gateway_order(&gateway_order_id).unwrap();
    assert_eq!(record.status, "failed");
    assert_eq!(h.orders.get("O1").unwrap().payment_status, "failed");
}

#[tokio::test]
async fn failed_webhook_never_regresses_a_completed_payment() {
    let h = harness();
    h.orders.seed(order("O1", 499.0));
    let gateway_order_id = initiate(&h, "O1", 499.0).await;
    h.gateway.script_payment(upi_payment("pay_1", &gateway_order_id));
    verify(&h, "O1", &gateway_order_id, "pay_1").await;

    let (raw, signature) = signed_webhook(&json!({
        "event": "payment.failed",
        "payload": {"payment": {"entity": {
            "id": "pay_1",
            "order_id": gateway_order_id,
            "error_description": "stale retry"
        }}}
    }));
    let ack = h.engine.process_webhook(&raw, &signature).await.unwrap();
    assert!(ack.received);

    let record = h.payments.by_gateway_order(&gateway_order_id).unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(h.orders.get("O1").unwrap().payment_status, "completed");
}

#[tokio::test]
async fn refund_webhook_moves_completed_to_refunded_and_stays_there() {
    let h = harness();
    h.orders.seed(order("O1", 499.0));
    let gateway_order_id = initiate(&h, "O1", 499.0).await;
    h.gateway.script_payment(upi_payment("pay_1", &gateway_order_id));
    verify(&h, "O1", &gateway_order_id, "pay_1").await;

    let body = json!({
        "event": "refund.created",
        "payload": {"refund": {"entity": {
            "id": "rfnd_1", "payment_id": "pay_1", "amount": 49900
        }}}
    });
    let (raw, signature) = signed_webhook(&body);
    h.engine.process_webhook(&raw, &signature).await.unwrap();

    let record = h.payments.by_gateway_order(&gateway_order_id).unwrap();
    assert_eq!(record.status, "refunded");
    assert_eq!(h.orders.get("O1").unwrap().payment_status, "refunded");

    // Duplicate delivery keeps the record refunded and still acknowledges.
    let (raw, signature) = signed_webhook(&body);
    let ack = h.engine.process_webhook(&raw, &signature).await.unwrap();
    assert!(ack.received);
    let record = h.payments.by_gateway_order(&gateway_order_id).unwrap();
    assert_eq!(record.status, "refunded");
}

#[tokio::test]
async fn refund_webhook_for_unknown_payment_is_acknowledged() {
    let h = harness();
    let (raw, signature) = signed_webhook(&json!({
        "event": "refund.created",
        "payload": {"refund": {"entity": {"id": "rfnd_1", "payment_id": "pay_none"}}}
    }));
    let ack = h.engine.process_webhook(&raw, &signature).await.unwrap();
    assert!(ack.received);
}
