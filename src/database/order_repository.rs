use crate::database::error::DatabaseError;
use crate::gateway::types::{PaymentMethod, PaymentStatus};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};

/// Order fulfillment state: pending -> confirmed -> delivered, or cancelled.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status.to_lowercase().as_str() {
            "pending" => Some(OrderStatus::Pending),
            "confirmed" => Some(OrderStatus::Confirmed),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// Order entity with its embedded payment sub-record.
///
/// Line items are captured at order time (product reference, quantity, unit
/// price) as JSONB. Invariant: total = subtotal + tax, and the payment
/// sub-record's amount equals the order total at confirmation time.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub items: serde_json::Value,
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
    pub status: String,
    pub payment_method: Option<String>,
    pub payment_status: String,
    pub payment_gateway_order_id: Option<String>,
    pub payment_gateway_payment_id: Option<String>,
    pub payment_amount: Option<f64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Order {
    pub fn order_status(&self) -> Option<OrderStatus> {
        OrderStatus::from_db_status(&self.status)
    }

    pub fn payment_status(&self) -> PaymentStatus {
        PaymentStatus::from_db_status(&self.payment_status).unwrap_or(PaymentStatus::Pending)
    }
}

const ORDER_COLUMNS: &str = "id, user_id, items, subtotal, tax, total, status, \
     payment_method, payment_status, payment_gateway_order_id, \
     payment_gateway_payment_id, payment_amount, created_at, updated_at";

/// Persistence operations the reconciliation engine needs on orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_id(&self, order_id: &str) -> Result<Option<Order>, DatabaseError>;

    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<Order>, DatabaseError>;

    /// Mirror a freshly created gateway order onto the order's payment
    /// sub-record: gateway order id, pending status, amount, method.
    async fn stamp_payment_pending(
        &self,
        order_id: &str,
        gateway_order_id: &str,
        amount: f64,
        method: PaymentMethod,
    ) -> Result<(), DatabaseError>;

    /// Mark the payment sub-record completed and advance a pending order to
    /// confirmed. Idempotent: re-applying completed is a no-op, and orders
    /// past confirmation keep their fulfillment status.
    async fn mark_payment_completed(
        &self,
        order_id: &str,
        gateway_payment_id: &str,
        method: PaymentMethod,
    ) -> Result<(), DatabaseError>;

    /// Mark the payment sub-record failed. Re-applying failed is a no-op so
    /// duplicate gateway deliveries converge without error.
    async fn mark_payment_failed(
        &self,
        order_id: &str,
        error_description: &str,
    ) -> Result<(), DatabaseError>;

    async fn mark_payment_refunded(&self, order_id: &str) -> Result<(), DatabaseError>;
}

/// sqlx-backed order store. All state transitions are single-row conditional
/// UPDATEs; no multi-step transactions.
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn find_by_id(&self, order_id: &str) -> Result<Option<Order>, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE payment_gateway_order_id = $1",
            ORDER_COLUMNS
        ))
        .bind(gateway_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn stamp_payment_pending(
        &self,
        order_id: &str,
        gateway_order_id: &str,
        amount: f64,
        method: PaymentMethod,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders
             SET payment_gateway_order_id = $2,
                 payment_status = 'pending',
                 payment_amount = $3,
                 payment_method = $4,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(order_id)
        .bind(gateway_order_id)
        .bind(amount)
        .bind(method.as_str())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Order", order_id));
        }
        Ok(())
    }

    async fn mark_payment_completed(
        &self,
        order_id: &str,
        gateway_payment_id: &str,
        method: PaymentMethod,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders
             SET payment_status = 'completed',
                 payment_gateway_payment_id = $2,
                 payment_method = $3,
                 status = CASE WHEN status = 'pending' THEN 'confirmed' ELSE status END,
                 updated_at = NOW()
             WHERE id = $1 AND payment_status <> 'refunded'",
        )
        .bind(order_id)
        .bind(gateway_payment_id)
        .bind(method.as_str())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Order", order_id));
        }
        Ok(())
    }

    async fn mark_payment_failed(
        &self,
        order_id: &str,
        _error_description: &str,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders
             SET payment_status = 'failed',
                 updated_at = NOW()
             WHERE id = $1 AND payment_status IN ('pending', 'failed')",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Order", order_id));
        }
        Ok(())
    }

    async fn mark_payment_refunded(&self, order_id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders
             SET payment_status = 'refunded',
                 updated_at = NOW()
             WHERE id = $1 AND payment_status IN ('completed', 'refunded')",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Order", order_id));
        }
        Ok(())
    }
}
