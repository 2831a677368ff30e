use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::pricing::Split;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Refunded,
}

/// Immutable ledger entry: one settled platform/affiliate split for one
/// order. Written exactly once per order; never updated outside the refund
/// flow, which lives elsewhere.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub affiliate_amount: Decimal,
    pub platform_amount: Decimal,
    pub payment_gateway_id: Option<String>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

/// Affiliate-facing projection, joined through the owning order.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AffiliateTransaction {
    pub transaction_id: Uuid,
    pub order_id: Uuid,
    pub affiliate_amount: Decimal,
    pub platform_amount: Decimal,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

/// Write one settlement row inside the caller's database transaction. Both
/// ledger writers (paid-at-creation orders and webhook settlement) go through
/// here so the entry shape stays identical.
pub(crate) async fn insert_settlement(
    db_tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_id: Uuid,
    split: Split,
    gateway_ref: Option<&str>,
) -> Result<Transaction, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (
            id, order_id, affiliate_amount, platform_amount,
            payment_gateway_id, status, created_at
        )
        VALUES ($1, $2, $3, $4, $5, 'completed', $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(order_id)
    .bind(split.affiliate_amount)
    .bind(split.commission)
    .bind(gateway_ref)
    .bind(Utc::now())
    .fetch_one(&mut **db_tx)
    .await
}

// Read-side queries; listings bypass the lifecycle service on purpose.
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_recent(&self) -> Result<Vec<Transaction>, ApiError> {
        let rows = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions ORDER BY created_at DESC LIMIT 100",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_for_affiliate(
        &self,
        affiliate_id: Uuid,
    ) -> Result<Vec<AffiliateTransaction>, ApiError> {
        let rows = sqlx::query_as::<_, AffiliateTransaction>(
            r#"
            SELECT t.id AS transaction_id, t.order_id, t.affiliate_amount,
                   t.platform_amount, t.status, t.created_at
            FROM transactions t
            INNER JOIN orders o ON o.id = t.order_id
            WHERE o.affiliate_id = $1
            ORDER BY t.created_at DESC
            LIMIT 100
            "#,
        )
        .bind(affiliate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
