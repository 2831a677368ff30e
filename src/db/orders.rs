use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::tx::{insert_settlement, Transaction};
use crate::errors::ApiError;
use crate::pricing::Split;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Yape,
    Plin,
    Bank,
    MercadoPago,
}

impl PaymentMethod {
    /// Gateway-routed methods settle asynchronously via webhook; everything
    /// else is considered paid at booking time.
    pub fn is_gateway_routed(self) -> bool {
        matches!(self, Self::MercadoPago)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContactInfo {
    #[sqlx(rename = "contact_name")]
    pub name: String,
    #[sqlx(rename = "contact_phone")]
    pub phone: String,
    #[sqlx(rename = "contact_email")]
    pub email: String,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BookingDetails {
    #[sqlx(rename = "booking_date")]
    pub date: Option<String>,
    #[sqlx(rename = "booking_time")]
    pub time: Option<String>,
    #[sqlx(rename = "booking_quantity")]
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

impl Default for BookingDetails {
    fn default() -> Self {
        Self {
            date: None,
            time: None,
            quantity: default_quantity(),
        }
    }
}

/// One purchase agreement between a client and a service, at a fixed price.
/// `amount` and `commission` are snapshots taken at creation and never change
/// afterwards; the settlement split is always derived from them, not from the
/// live service price.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub client_id: Uuid,
    pub service_id: Uuid,
    pub affiliate_id: Uuid,
    pub amount: Decimal,
    pub commission: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub status: OrderStatus,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<String>,
    pub address: String,
    pub notes: Option<String>,
    #[sqlx(flatten)]
    pub contact_info: ContactInfo,
    #[sqlx(flatten)]
    pub booking_details: BookingDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields the lifecycle service has already validated and priced.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub client_id: Uuid,
    pub service_id: Uuid,
    pub affiliate_id: Uuid,
    pub amount: Decimal,
    pub commission: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<String>,
    pub address: String,
    pub notes: Option<String>,
    pub contact_info: ContactInfo,
    pub booking_details: BookingDetails,
}

/// Result of a conditional settlement attempt.
#[derive(Debug)]
pub enum SettleOutcome {
    /// This call claimed the pending order and wrote the ledger entry.
    Settled { order: Order, ledger: Transaction },
    /// Someone else already moved the order out of pending; no write happened.
    NotSettled(Order),
    Missing,
}

/// Storage contract for orders and their settlement. The two mutating calls
/// are transactional: an order created as paid comes back with its ledger
/// entry already written, and `settle_order` claims the pending row and
/// writes the ledger entry in one step, so duplicate completion calls cannot
/// produce a second entry.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(
        &self,
        order: NewOrder,
        settlement: Option<Split>,
    ) -> Result<Order, ApiError>;

    async fn fetch_order(&self, id: Uuid) -> Result<Option<Order>, ApiError>;

    async fn list_for_client(&self, client_id: Uuid) -> Result<Vec<Order>, ApiError>;

    async fn settle_order(
        &self,
        id: Uuid,
        gateway_ref: &str,
        split: Split,
    ) -> Result<SettleOutcome, ApiError>;
}

// Postgres-backed store
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
    async fn insert_order(
        &self,
        order: NewOrder,
        settlement: Option<Split>,
    ) -> Result<Order, ApiError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut db_tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (
                id, client_id, service_id, affiliate_id, amount, commission,
                currency, payment_method, payment_status, transaction_id, status,
                scheduled_date, scheduled_time, address, notes,
                contact_name, contact_phone, contact_email,
                booking_date, booking_time, booking_quantity,
                created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, NULL, $10,
                $11, $12, $13, $14,
                $15, $16, $17,
                $18, $19, $20,
                $21, $21
            )
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(order.client_id)
        .bind(order.service_id)
        .bind(order.affiliate_id)
        .bind(order.amount)
        .bind(order.commission)
        .bind(&order.currency)
        .bind(order.payment_method)
        .bind(order.payment_status)
        .bind(OrderStatus::Pending)
        .bind(order.scheduled_date)
        .bind(&order.scheduled_time)
        .bind(&order.address)
        .bind(&order.notes)
        .bind(&order.contact_info.name)
        .bind(&order.contact_info.phone)
        .bind(&order.contact_info.email)
        .bind(&order.booking_details.date)
        .bind(&order.booking_details.time)
        .bind(order.booking_details.quantity)
        .bind(now)
        .fetch_one(&mut *db_tx)
        .await?;

        if let Some(split) = settlement {
            insert_settlement(&mut db_tx, inserted.id, split, None).await?;
        }

        db_tx.commit().await?;
        Ok(inserted)
    }

    async fn fetch_order(&self, id: Uuid) -> Result<Option<Order>, ApiError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    async fn list_for_client(&self, client_id: Uuid) -> Result<Vec<Order>, ApiError> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE client_id = $1 ORDER BY created_at DESC LIMIT 100",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    async fn settle_order(
        &self,
        id: Uuid,
        gateway_ref: &str,
        split: Split,
    ) -> Result<SettleOutcome, ApiError> {
        let mut db_tx = self.pool.begin().await?;

        // Claim the row only while it is still pending. Two concurrent
        // completion calls cannot both pass this filter, and the unique
        // index on transactions.order_id backstops the single-entry
        // invariant even if they somehow did.
        let claimed = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET payment_status = 'completed', transaction_id = $2, updated_at = $3
            WHERE id = $1 AND payment_status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(gateway_ref)
        .bind(Utc::now())
        .fetch_optional(&mut *db_tx)
        .await?;

        match claimed {
            Some(order) => {
                let ledger = insert_settlement(&mut db_tx, order.id, split, Some(gateway_ref)).await?;
                db_tx.commit().await?;
                Ok(SettleOutcome::Settled { order, ledger })
            }
            None => {
                db_tx.rollback().await?;
                match self.fetch_order(id).await? {
                    Some(order) => Ok(SettleOutcome::NotSettled(order)),
                    None => Ok(SettleOutcome::Missing),
                }
            }
        }
    }
}
