use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_email::Email;
use uuid::Uuid;

use crate::db::orders::{
    BookingDetails, ContactInfo, NewOrder, Order, OrderStore, PaymentMethod, PaymentStatus,
    SettleOutcome,
};
use crate::db::services::{ServiceCatalog, ServiceRecord};
use crate::errors::ApiError;
use crate::notify::{NotificationMessage, NotificationSink};
use crate::pricing;

use super::utils::{validate_auth_token, AuthService};

#[derive(Debug, Clone, Deserialize)]
pub struct ContactInfoInput {
    pub name: String,
    pub phone: String,
    pub email: Email,
}

impl From<ContactInfoInput> for ContactInfo {
    fn from(input: ContactInfoInput) -> Self {
        Self {
            name: input.name,
            phone: input.phone,
            email: input.email.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub service_id: Uuid,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub contact_info: Option<ContactInfoInput>,
    #[serde(default)]
    pub booking_details: Option<BookingDetails>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default)]
    pub scheduled_time: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: Uuid,
    pub service_id: Uuid,
    pub service_title: Option<String>,
    pub affiliate_id: Uuid,
    pub status: crate::db::orders::OrderStatus,
    pub total: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<String>,
    pub address: String,
    pub notes: Option<String>,
    pub contact_info: ContactInfo,
    pub booking_details: BookingDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub commission: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceMeta {
    pub created_at: DateTime<Utc>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInvoice {
    pub order: Order,
    pub service: Option<ServiceRecord>,
    pub totals: InvoiceTotals,
    pub meta: InvoiceMeta,
}

/// Order lifecycle service: the only writer of order rows and settlement
/// entries. Creation snapshots the price and commission; settlement works
/// exclusively from those snapshots.
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    catalog: Arc<dyn ServiceCatalog>,
    notifier: Arc<dyn NotificationSink>,
    fee_rate: Decimal,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        catalog: Arc<dyn ServiceCatalog>,
        notifier: Arc<dyn NotificationSink>,
        fee_rate: Decimal,
    ) -> Self {
        Self {
            store,
            catalog,
            notifier,
            fee_rate,
        }
    }

    pub async fn create_order(
        &self,
        client_id: Uuid,
        req: CreateOrderRequest,
    ) -> Result<Order, ApiError> {
        let service = self
            .catalog
            .get_service(req.service_id)
            .await?
            .ok_or(ApiError::NotFound("service"))?;
        if !service.active {
            return Err(ApiError::validation("service is not active"));
        }

        let address = req
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ApiError::validation("address is required"))?
            .to_string();
        let contact = req.contact_info.ok_or_else(|| {
            ApiError::validation("contactInfo.name, contactInfo.phone and contactInfo.email are required")
        })?;
        if contact.name.trim().is_empty() || contact.phone.trim().is_empty() {
            return Err(ApiError::validation(
                "contactInfo.name, contactInfo.phone and contactInfo.email are required",
            ));
        }

        // Price and commission are frozen here; later price edits on the
        // service must not move this order.
        let amount = service.price;
        let split = pricing::compute_split(amount, self.fee_rate)?;

        let payment_status = req.payment_status.unwrap_or(if req.payment_method.is_gateway_routed() {
            PaymentStatus::Pending
        } else {
            PaymentStatus::Completed
        });

        let new_order = NewOrder {
            client_id,
            service_id: service.id,
            affiliate_id: service.affiliate_id,
            amount,
            commission: split.commission,
            currency: req.currency.unwrap_or_else(|| "USD".to_string()),
            payment_method: req.payment_method,
            payment_status,
            scheduled_date: req.scheduled_date,
            scheduled_time: req.scheduled_time,
            address,
            notes: req.notes,
            contact_info: contact.into(),
            booking_details: req.booking_details.unwrap_or_default(),
        };

        // Offline methods are settled at booking time: the order and its
        // ledger entry are written in the same storage transaction.
        let settlement = (payment_status == PaymentStatus::Completed).then_some(split);
        let order = self.store.insert_order(new_order, settlement).await?;
        tracing::info!("order {} created for service {}", order.id, service.id);

        self.fire(
            order.client_id,
            NotificationMessage::order_created_client(order.id, &service.title),
        )
        .await;
        self.fire(
            order.affiliate_id,
            NotificationMessage::order_created_affiliate(order.id, &service.title),
        )
        .await;

        Ok(order)
    }

    /// Idempotent payment-completion transition. Safe to call any number of
    /// times, sequentially or concurrently: at most one ledger entry is ever
    /// written per order, enforced by the store's conditional settlement.
    pub async fn complete_payment(
        &self,
        order_id: Uuid,
        gateway_ref: &str,
    ) -> Result<Order, ApiError> {
        let order = self
            .store
            .fetch_order(order_id)
            .await?
            .ok_or(ApiError::NotFound("order"))?;

        if order.payment_status == PaymentStatus::Completed {
            return Ok(order);
        }

        // The split comes from the order's stored snapshot, never re-derived
        // from the live service price or the current fee rate.
        let split = pricing::settlement_split(order.amount, order.commission);

        match self.store.settle_order(order_id, gateway_ref, split).await? {
            SettleOutcome::Settled { order, ledger } => {
                tracing::info!("order {} payment completed, ledger entry {}", order.id, ledger.id);
                self.fire(
                    order.affiliate_id,
                    NotificationMessage::payment_received(ledger.affiliate_amount, ledger.id),
                )
                .await;
                Ok(order)
            }
            // a concurrent duplicate call won the race; nothing more to do
            SettleOutcome::NotSettled(order) => Ok(order),
            SettleOutcome::Missing => Err(ApiError::NotFound("order")),
        }
    }

    pub async fn get_order(&self, order_id: Uuid, requester: Option<Uuid>) -> Result<Order, ApiError> {
        let order = self
            .store
            .fetch_order(order_id)
            .await?
            .ok_or(ApiError::NotFound("order"))?;
        if let Some(requester) = requester {
            if order.client_id != requester {
                return Err(ApiError::Forbidden("order belongs to another client"));
            }
        }
        Ok(order)
    }

    pub async fn get_order_invoice(
        &self,
        order_id: Uuid,
        requester: Option<Uuid>,
    ) -> Result<OrderInvoice, ApiError> {
        let order = self.get_order(order_id, requester).await?;
        let service = self.catalog.get_service(order.service_id).await?;

        let subtotal = order.amount;
        let commission = order.commission;
        // the client pays the subtotal; commission is an internal fee
        let total = subtotal;

        Ok(OrderInvoice {
            totals: InvoiceTotals {
                subtotal,
                commission,
                total,
            },
            meta: InvoiceMeta {
                created_at: order.created_at,
                payment_method: order.payment_method,
                payment_status: order.payment_status,
            },
            order,
            service,
        })
    }

    pub async fn list_orders(&self, client_id: Uuid) -> Result<Vec<OrderSummary>, ApiError> {
        let orders = self.store.list_for_client(client_id).await?;
        let mut summaries = Vec::with_capacity(orders.len());
        for order in orders {
            let service = self.catalog.get_service(order.service_id).await?;
            summaries.push(OrderSummary {
                id: order.id,
                service_id: order.service_id,
                service_title: service.map(|s| s.title),
                affiliate_id: order.affiliate_id,
                status: order.status,
                total: order.amount,
                currency: order.currency,
                payment_method: order.payment_method,
                payment_status: order.payment_status,
                transaction_id: order.transaction_id,
                created_at: order.created_at,
                scheduled_date: order.scheduled_date,
                scheduled_time: order.scheduled_time,
                address: order.address,
                notes: order.notes,
                contact_info: order.contact_info,
                booking_details: order.booking_details,
            });
        }
        Ok(summaries)
    }

    async fn fire(&self, user_id: Uuid, note: NotificationMessage) {
        if let Err(err) = self.notifier.notify(user_id, note).await {
            tracing::warn!("failed to deliver notification to {user_id}: {err}");
        }
    }
}

async fn create_order(
    headers: HeaderMap,
    State((auth, service)): State<(Arc<AuthService>, Arc<OrderService>)>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let client_id = validate_auth_token(headers, &auth)?;
    let order = service.create_order(client_id, req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders(
    headers: HeaderMap,
    State((auth, service)): State<(Arc<AuthService>, Arc<OrderService>)>,
) -> Result<impl IntoResponse, ApiError> {
    let client_id = validate_auth_token(headers, &auth)?;
    let orders = service.list_orders(client_id).await?;
    Ok(Json(orders))
}

async fn get_order(
    headers: HeaderMap,
    State((auth, service)): State<(Arc<AuthService>, Arc<OrderService>)>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let client_id = validate_auth_token(headers, &auth)?;
    let order = service.get_order(order_id, Some(client_id)).await?;
    Ok(Json(order))
}

async fn get_invoice(
    headers: HeaderMap,
    State((auth, service)): State<(Arc<AuthService>, Arc<OrderService>)>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let client_id = validate_auth_token(headers, &auth)?;
    let invoice = service.get_order_invoice(order_id, Some(client_id)).await?;
    Ok(Json(invoice))
}

pub fn order_routes(auth: Arc<AuthService>, service: Arc<OrderService>) -> Router {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/invoice", get(get_invoice))
        .with_state((auth, service))
}
