use std::sync::Arc;

use axum::{
    http::HeaderMap,
    response::{sse::Event, IntoResponse, Sse},
    routing::get,
    Router,
};
use axum::extract::State;
use futures::StreamExt;
use sqlx::PgPool;

use crate::db::tx::TransactionRepository;
use crate::errors::ApiError;

use super::utils::{self, AuthService};

// return the most recent ledger entries across the platform
async fn list_transactions(
    headers: HeaderMap,
    State((service, pool)): State<(Arc<AuthService>, PgPool)>,
) -> Result<impl IntoResponse, ApiError> {
    let _user_id = utils::validate_auth_token(headers, &service)?;

    let entries = TransactionRepository::new(pool).list_recent().await?;

    let stream = futures::stream::iter(entries)
        .map(|entry| Event::default().json_data(entry));

    let sse = Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(std::time::Duration::from_secs(2))
            .text("keep-alive-text"),
    );

    Ok(sse)
}

// return the ledger entries belonging to the authenticated affiliate
async fn list_affiliate_transactions(
    headers: HeaderMap,
    State((service, pool)): State<(Arc<AuthService>, PgPool)>,
) -> Result<impl IntoResponse, ApiError> {
    let affiliate_id = utils::validate_auth_token(headers, &service)?;

    let entries = TransactionRepository::new(pool)
        .list_for_affiliate(affiliate_id)
        .await?;

    let stream = futures::stream::iter(entries)
        .map(|entry| Event::default().json_data(entry));

    let sse = Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(std::time::Duration::from_secs(2))
            .text("keep-alive-text"),
    );

    Ok(sse)
}

pub fn tx_route(service: Arc<AuthService>, pool: PgPool) -> Router {
    Router::new()
        .route("/tx/list_txs", get(list_transactions))
        .route("/tx/affiliate", get(list_affiliate_transactions))
        .with_state((service, pool))
}
