use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::ApiError;

/// One alert for one user. Constructors below carry the canonical wording so
/// callers never assemble titles by hand.
#[derive(Debug, Clone)]
pub struct NotificationMessage {
    pub kind: &'static str,
    pub title: String,
    pub message: String,
    pub data: Value,
    pub priority: &'static str,
}

impl NotificationMessage {
    pub fn order_created_client(order_id: Uuid, service_title: &str) -> Self {
        Self {
            kind: "order_new",
            title: "Order created".to_string(),
            message: format!("Your order for \"{service_title}\" has been created"),
            data: json!({ "orderId": order_id }),
            priority: "normal",
        }
    }

    pub fn order_created_affiliate(order_id: Uuid, service_title: &str) -> Self {
        Self {
            kind: "order_new",
            title: "New order".to_string(),
            message: format!("You have a new order for \"{service_title}\""),
            data: json!({ "orderId": order_id }),
            priority: "high",
        }
    }

    pub fn payment_received(amount: Decimal, ledger_id: Uuid) -> Self {
        Self {
            kind: "payment_received",
            title: "Payment received".to_string(),
            message: format!("You have received a payment of {amount}"),
            data: json!({ "transactionId": ledger_id, "amount": amount }),
            priority: "high",
        }
    }
}

/// Fire-and-forget alert delivery. Implementations may fail; callers log and
/// move on, a lost notification never aborts order or settlement writes.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, user_id: Uuid, note: NotificationMessage) -> Result<(), ApiError>;
}

pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationSink for NotificationRepository {
    async fn notify(&self, user_id: Uuid, note: NotificationMessage) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, title, message, data, priority, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(note.kind)
        .bind(&note.title)
        .bind(&note.message)
        .bind(&note.data)
        .bind(note.priority)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
