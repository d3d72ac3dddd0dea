use crate::database::error::DatabaseError;
use crate::gateway::types::{PaymentMethod, PaymentStatus};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// One payment record per order attempt, keyed by the gateway's order id
/// (globally unique across records).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub order_id: String,
    pub user_id: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub signature: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub method: String,
    pub status: String,
    pub detail: Option<serde_json::Value>,
    pub error_description: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl PaymentRecord {
    pub fn payment_status(&self) -> PaymentStatus {
        PaymentStatus::from_db_status(&self.status).unwrap_or(PaymentStatus::Pending)
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.method.parse().unwrap_or(PaymentMethod::Card)
    }
}

/// Fields for creating or refreshing a pending record during gateway order
/// initiation.
#[derive(Debug, Clone)]
pub struct PendingPaymentRecord {
    pub order_id: String,
    pub user_id: String,
    pub gateway_order_id: String,
    pub amount: f64,
    pub currency: String,
    pub method: PaymentMethod,
    /// Only an explicitly supplied non-default method overwrites the method
    /// already stored on an existing record.
    pub method_explicit: bool,
}

const RECORD_COLUMNS: &str = "id, order_id, user_id, gateway_order_id, gateway_payment_id, \
     signature, amount, currency, method, status, detail, error_description, \
     created_at, updated_at";

/// Persistence operations the reconciliation engine needs on payment records.
#[async_trait]
pub trait PaymentRecordStore: Send + Sync {
    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn find_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// Create a pending record for the order, or refresh the existing one in
    /// place (gateway order id, amount, currency; method only when
    /// explicitly supplied).
    async fn upsert_pending(
        &self,
        record: PendingPaymentRecord,
    ) -> Result<PaymentRecord, DatabaseError>;

    /// Promote to completed. Re-applying completed is a no-op republish;
    /// failed and refunded records are never promoted. Returns `None` when
    /// the guard filtered the write.
    async fn mark_completed(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: Option<&str>,
        method: PaymentMethod,
        detail: serde_json::Value,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// Demote a pending record to failed with the gateway's description.
    async fn mark_failed(
        &self,
        gateway_order_id: &str,
        error_description: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// Promote a completed record to refunded (terminal). Duplicate refund
    /// deliveries keep the record refunded.
    async fn mark_refunded(
        &self,
        gateway_payment_id: &str,
        refund_detail: serde_json::Value,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;
}

/// sqlx-backed payment record store. Status transitions are guarded in the
/// WHERE clause so concurrent writers converge without read-modify-write.
pub struct PaymentRecordRepository {
    pool: PgPool,
}

impl PaymentRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentRecordStore for PaymentRecordRepository {
    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {} FROM payment_records WHERE gateway_order_id = $1",
            RECORD_COLUMNS
        ))
        .bind(gateway_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {} FROM payment_records WHERE gateway_payment_id = $1",
            RECORD_COLUMNS
        ))
        .bind(gateway_payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn upsert_pending(
        &self,
        record: PendingPaymentRecord,
    ) -> Result<PaymentRecord, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "INSERT INTO payment_records
                 (order_id, user_id, gateway_order_id, amount, currency, method, status)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending')
             ON CONFLICT (order_id) DO UPDATE
             SET gateway_order_id = EXCLUDED.gateway_order_id,
                 amount = EXCLUDED.amount,
                 currency = EXCLUDED.currency,
                 method = CASE WHEN $7 THEN EXCLUDED.method ELSE payment_records.method END,
                 status = 'pending',
                 updated_at = NOW()
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(&record.order_id)
        .bind(&record.user_id)
        .bind(&record.gateway_order_id)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(record.method.as_str())
        .bind(record.method_explicit)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn mark_completed(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: Option<&str>,
        method: PaymentMethod,
        detail: serde_json::Value,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payment_records
             SET status = 'completed',
                 gateway_payment_id = $2,
                 signature = COALESCE($3, signature),
                 method = $4,
                 detail = $5,
                 updated_at = NOW()
             WHERE gateway_order_id = $1 AND status IN ('pending', 'completed')
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(gateway_order_id)
        .bind(gateway_payment_id)
        .bind(signature)
        .bind(method.as_str())
        .bind(detail)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn mark_failed(
        &self,
        gateway_order_id: &str,
        error_description: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payment_records
             SET status = 'failed',
                 error_description = $2,
                 updated_at = NOW()
             WHERE gateway_order_id = $1 AND status IN ('pending', 'failed')
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(gateway_order_id)
        .bind(error_description)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn mark_refunded(
        &self,
        gateway_payment_id: &str,
        refund_detail: serde_json::Value,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payment_records
             SET status = 'refunded',
                 detail = $2,
                 updated_at = NOW()
             WHERE gateway_payment_id = $1 AND status IN ('completed', 'refunded')
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(gateway_payment_id)
        .bind(refund_detail)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
