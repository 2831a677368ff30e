use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::ApiError;

/// Catalog snapshot used to price an order. The catalog itself (CRUD,
/// search, categories) is owned by another part of the platform; the
/// settlement engine only reads it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub id: Uuid,
    pub title: String,
    pub price: Decimal,
    pub currency: String,
    pub affiliate_id: Uuid,
    pub active: bool,
}

#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn get_service(&self, id: Uuid) -> Result<Option<ServiceRecord>, ApiError>;
}

pub struct ServiceRepository {
    pool: PgPool,
}

impl ServiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceCatalog for ServiceRepository {
    async fn get_service(&self, id: Uuid) -> Result<Option<ServiceRecord>, ApiError> {
        let service = sqlx::query_as::<_, ServiceRecord>(
            "SELECT id, title, price, currency, affiliate_id, active FROM services WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(service)
    }
}
