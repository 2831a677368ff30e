//! In-memory stand-ins for the Postgres repositories, used by the service
//! tests. The settlement path mirrors the production store's guarantee: the
//! pending check, the status flip, and the ledger write all happen under one
//! lock, so duplicate completion calls can never write two entries.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::orders::{NewOrder, Order, OrderStatus, OrderStore, PaymentStatus, SettleOutcome};
use crate::db::services::{ServiceCatalog, ServiceRecord};
use crate::db::tx::{Transaction, TransactionStatus};
use crate::errors::ApiError;
use crate::notify::{NotificationMessage, NotificationSink};
use crate::pricing::Split;

#[derive(Default)]
struct Inner {
    orders: HashMap<Uuid, Order>,
    ledger: Vec<Transaction>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transactions_for(&self, order_id: Uuid) -> Vec<Transaction> {
        self.inner
            .lock()
            .unwrap()
            .ledger
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect()
    }

    pub fn ledger_len(&self) -> usize {
        self.inner.lock().unwrap().ledger.len()
    }
}

fn settlement_entry(order_id: Uuid, split: Split, gateway_ref: Option<&str>) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        order_id,
        affiliate_amount: split.affiliate_amount,
        platform_amount: split.commission,
        payment_gateway_id: gateway_ref.map(str::to_string),
        status: TransactionStatus::Completed,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(
        &self,
        order: NewOrder,
        settlement: Option<Split>,
    ) -> Result<Order, ApiError> {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            client_id: order.client_id,
            service_id: order.service_id,
            affiliate_id: order.affiliate_id,
            amount: order.amount,
            commission: order.commission,
            currency: order.currency,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            transaction_id: None,
            status: OrderStatus::Pending,
            scheduled_date: order.scheduled_date,
            scheduled_time: order.scheduled_time,
            address: order.address,
            notes: order.notes,
            contact_info: order.contact_info,
            booking_details: order.booking_details,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.lock().unwrap();
        if let Some(split) = settlement {
            inner.ledger.push(settlement_entry(order.id, split, None));
        }
        inner.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn fetch_order(&self, id: Uuid) -> Result<Option<Order>, ApiError> {
        Ok(self.inner.lock().unwrap().orders.get(&id).cloned())
    }

    async fn list_for_client(&self, client_id: Uuid) -> Result<Vec<Order>, ApiError> {
        let inner = self.inner.lock().unwrap();
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.client_id == client_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders.truncate(100);
        Ok(orders)
    }

    async fn settle_order(
        &self,
        id: Uuid,
        gateway_ref: &str,
        split: Split,
    ) -> Result<SettleOutcome, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(order) = inner.orders.get_mut(&id) else {
            return Ok(SettleOutcome::Missing);
        };
        if order.payment_status != PaymentStatus::Pending {
            return Ok(SettleOutcome::NotSettled(order.clone()));
        }
        order.payment_status = PaymentStatus::Completed;
        order.transaction_id = Some(gateway_ref.to_string());
        order.updated_at = Utc::now();
        let order = order.clone();

        let ledger = settlement_entry(id, split, Some(gateway_ref));
        inner.ledger.push(ledger.clone());
        Ok(SettleOutcome::Settled { order, ledger })
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    services: Mutex<HashMap<Uuid, ServiceRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, service: ServiceRecord) {
        self.services.lock().unwrap().insert(service.id, service);
    }

    pub fn set_price(&self, id: Uuid, price: Decimal) {
        if let Some(service) = self.services.lock().unwrap().get_mut(&id) {
            service.price = price;
        }
    }
}

#[async_trait]
impl ServiceCatalog for MemoryCatalog {
    async fn get_service(&self, id: Uuid) -> Result<Option<ServiceRecord>, ApiError> {
        Ok(self.services.lock().unwrap().get(&id).cloned())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Uuid, &'static str)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds_for(&self, user_id: Uuid) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, kind)| *kind)
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, user_id: Uuid, note: NotificationMessage) -> Result<(), ApiError> {
        self.events.lock().unwrap().push((user_id, note.kind));
        Ok(())
    }
}
