use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::orders::PaymentMethod;
use crate::db::services::ServiceCatalog;
use crate::errors::ApiError;
use crate::gateway::{BackUrls, GatewayConfig, PaymentGateway, PreferenceItem, PreferenceRequest};

use super::orders::{ContactInfoInput, CreateOrderRequest, OrderService};
use super::utils::{validate_auth_token, AuthService};

/// Either reuse an existing pending order (`order_id`) or describe a new one
/// to create before the checkout session is built.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub order_id: Option<Uuid>,
    #[serde(default)]
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub contact_info: Option<ContactInfoInput>,
    #[serde(default)]
    pub booking_details: Option<crate::db::orders::BookingDetails>,
    #[serde(default)]
    pub currency: Option<String>,
}

// wire shape matches the gateway's own field names
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub id: String,
    pub init_point: Option<String>,
    pub sandbox_init_point: Option<String>,
    pub preference_id: String,
    pub external_reference: String,
    pub url: String,
}

/// Bridges the external provider's checkout/webhook protocol to the order
/// lifecycle service. Checkout creation propagates failures to its caller;
/// webhook handling never does.
pub struct PaymentService {
    orders: Arc<OrderService>,
    catalog: Arc<dyn ServiceCatalog>,
    gateway: Arc<dyn PaymentGateway>,
    config: GatewayConfig,
}

impl PaymentService {
    pub fn new(
        orders: Arc<OrderService>,
        catalog: Arc<dyn ServiceCatalog>,
        gateway: Arc<dyn PaymentGateway>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            orders,
            catalog,
            gateway,
            config,
        }
    }

    pub async fn create_checkout(
        &self,
        client_id: Uuid,
        req: CheckoutRequest,
    ) -> Result<CheckoutResponse, ApiError> {
        let order = match req.order_id {
            // existing order: its stored amount is authoritative, the live
            // service price is only consulted for the line-item title
            Some(order_id) => self.orders.get_order(order_id, Some(client_id)).await?,
            None => {
                let service_id = req
                    .service_id
                    .ok_or_else(|| ApiError::validation("serviceId is required"))?;
                let create = CreateOrderRequest {
                    service_id,
                    payment_method: PaymentMethod::MercadoPago,
                    payment_status: None,
                    address: req.address,
                    notes: req.notes,
                    contact_info: req.contact_info,
                    booking_details: req.booking_details,
                    currency: req.currency,
                    scheduled_date: None,
                    scheduled_time: None,
                };
                self.orders.create_order(client_id, create).await?
            }
        };

        if order.amount <= Decimal::ZERO {
            return Err(ApiError::validation("service price must be greater than 0"));
        }

        let title = self
            .catalog
            .get_service(order.service_id)
            .await?
            .map(|s| s.title)
            .unwrap_or_else(|| "Servicio".to_string());

        let preference = PreferenceRequest {
            items: vec![PreferenceItem {
                title,
                quantity: 1,
                currency_id: self.config.currency_id.clone(),
                unit_price: order.amount,
            }],
            external_reference: order.id.to_string(),
            notification_url: format!(
                "{}/v1/payments/mercadopago/webhook",
                self.config.public_base_url
            ),
            back_urls: BackUrls {
                success: format!(
                    "{}/order-confirmation?orderId={}&success=true",
                    self.config.frontend_url, order.id
                ),
                pending: format!(
                    "{}/order-confirmation?orderId={}",
                    self.config.frontend_url, order.id
                ),
                failure: format!(
                    "{}/payment-failure?orderId={}",
                    self.config.frontend_url, order.id
                ),
            },
        };

        let created = self.gateway.create_preference(&preference).await?;
        tracing::info!("checkout preference {} created for order {}", created.id, order.id);

        let url = created.checkout_url(&self.config.checkout_base);
        Ok(CheckoutResponse {
            id: created.id.clone(),
            init_point: created.init_point,
            sandbox_init_point: created.sandbox_init_point,
            preference_id: created.id,
            external_reference: preference.external_reference,
            url,
        })
    }

    /// Webhook boundary: the provider treats any non-success response as
    /// "redeliver forever", so every internal failure is logged and swallowed
    /// here. This function cannot fail outward.
    pub async fn handle_webhook(&self, query: &HashMap<String, String>, body: Option<&Value>) {
        if let Err(err) = self.process_notification(query, body).await {
            tracing::error!("webhook processing failed, acknowledging anyway: {err}");
        }
    }

    async fn process_notification(
        &self,
        query: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<(), ApiError> {
        let Some(payment_id) = extract_payment_id(query, body) else {
            tracing::info!("webhook carried no payment id, acknowledging");
            return Ok(());
        };

        let payment = self.gateway.get_payment(&payment_id).await?;
        if !payment.is_approved() {
            tracing::info!("payment {payment_id} not approved, ignoring");
            return Ok(());
        }

        let Some(order_id) = payment
            .external_reference
            .as_deref()
            .and_then(|r| Uuid::parse_str(r).ok())
        else {
            tracing::warn!("approved payment {payment_id} carries no usable order reference");
            return Ok(());
        };

        let order = self.orders.complete_payment(order_id, &payment_id).await?;
        tracing::info!("order {} settled from webhook payment {payment_id}", order.id);
        Ok(())
    }
}

/// Pull the payment identifier out of a webhook notification, accepting both
/// the query-string and the JSON-body delivery shapes. Identifiers sometimes
/// arrive as a resource path (`/v1/payments/123`); only the last segment
/// matters.
fn extract_payment_id(query: &HashMap<String, String>, body: Option<&Value>) -> Option<String> {
    let topic = query
        .get("topic")
        .or_else(|| query.get("type"))
        .map(String::as_str)
        .or_else(|| body?.get("type")?.as_str());

    let from_query = if topic == Some("payment") {
        query.get("id")
    } else {
        query.get("resource")
    }
    .cloned();

    let raw = from_query
        .or_else(|| value_to_id(body?.get("data")?.get("id")?))
        .or_else(|| value_to_id(body?.get("id")?))?;

    let id = raw.rsplit('/').next().unwrap_or(&raw).to_string();
    (!id.is_empty()).then_some(id)
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

async fn create_preference(
    headers: HeaderMap,
    State((auth, service)): State<(Arc<AuthService>, Arc<PaymentService>)>,
    Json(req): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let client_id = validate_auth_token(headers, &auth)?;
    let checkout = service.create_checkout(client_id, req).await?;
    Ok(Json(checkout))
}

// unauthenticated on purpose: the provider calls this, not our clients
async fn webhook(
    State((_auth, service)): State<(Arc<AuthService>, Arc<PaymentService>)>,
    Query(query): Query<HashMap<String, String>>,
    body: Option<Json<Value>>,
) -> impl IntoResponse {
    let body = body.map(|Json(value)| value);
    service.handle_webhook(&query, body.as_ref()).await;
    (StatusCode::OK, Json(json!({ "received": true })))
}

pub fn payment_routes(auth: Arc<AuthService>, service: Arc<PaymentService>) -> Router {
    Router::new()
        .route("/payments/mercadopago/preference", post(create_preference))
        .route("/payments/mercadopago/webhook", get(webhook).post(webhook))
        .with_state((auth, service))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::db::memory::{MemoryCatalog, MemoryStore, RecordingSink};
    use crate::db::orders::PaymentStatus;
    use crate::db::services::ServiceRecord;
    use crate::gateway::{PaymentLookup, PreferenceResponse, UnconfiguredGateway};

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            access_token: Some("TEST-TOKEN".to_string()),
            currency_id: "PEN".to_string(),
            checkout_base: "https://www.mercadopago.com/checkout/v1/redirect?pref_id=".to_string(),
            frontend_url: "http://localhost:5000".to_string(),
            public_base_url: "http://localhost:3000".to_string(),
            api_base: "http://localhost:9".to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    #[derive(Default)]
    struct MockGateway {
        payments: Mutex<HashMap<String, PaymentLookup>>,
        with_links: bool,
    }

    impl MockGateway {
        fn approve(&self, payment_id: &str, order_id: Uuid) {
            self.payments.lock().unwrap().insert(
                payment_id.to_string(),
                PaymentLookup {
                    status: Some("approved".to_string()),
                    external_reference: Some(order_id.to_string()),
                },
            );
        }

        fn set_status(&self, payment_id: &str, status: &str, order_id: Uuid) {
            self.payments.lock().unwrap().insert(
                payment_id.to_string(),
                PaymentLookup {
                    status: Some(status.to_string()),
                    external_reference: Some(order_id.to_string()),
                },
            );
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_preference(
            &self,
            req: &PreferenceRequest,
        ) -> Result<PreferenceResponse, ApiError> {
            assert_eq!(req.items.len(), 1);
            Ok(PreferenceResponse {
                id: "pref-123".to_string(),
                init_point: self.with_links.then(|| "https://live/checkout".to_string()),
                sandbox_init_point: None,
            })
        }

        async fn get_payment(&self, payment_id: &str) -> Result<PaymentLookup, ApiError> {
            self.payments
                .lock()
                .unwrap()
                .get(payment_id)
                .cloned()
                .ok_or(ApiError::Gateway {
                    status: 404,
                    message: "payment not found".to_string(),
                })
        }
    }

    struct Fixture {
        payments: Arc<PaymentService>,
        orders: Arc<OrderService>,
        store: Arc<MemoryStore>,
        gateway: Arc<MockGateway>,
        listed: ServiceRecord,
    }

    fn fixture(price: &str, with_links: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let sink = Arc::new(RecordingSink::new());
        let listed = ServiceRecord {
            id: Uuid::new_v4(),
            title: "Garden design".to_string(),
            price: dec(price),
            currency: "USD".to_string(),
            affiliate_id: Uuid::new_v4(),
            active: true,
        };
        catalog.insert(listed.clone());

        let orders = Arc::new(OrderService::new(
            store.clone(),
            catalog.clone(),
            sink,
            dec("0.05"),
        ));
        let gateway = Arc::new(MockGateway {
            payments: Mutex::new(HashMap::new()),
            with_links,
        });
        let payments = Arc::new(PaymentService::new(
            orders.clone(),
            catalog,
            gateway.clone(),
            test_config(),
        ));
        Fixture {
            payments,
            orders,
            store,
            gateway,
            listed,
        }
    }

    fn new_order_checkout(service_id: Uuid) -> CheckoutRequest {
        CheckoutRequest {
            order_id: None,
            service_id: Some(service_id),
            address: Some("123 Main St".to_string()),
            notes: None,
            contact_info: Some(ContactInfoInput {
                name: "Ana Torres".to_string(),
                phone: "999888777".to_string(),
                email: "ana@example.com".parse().unwrap(),
            }),
            booking_details: None,
            currency: None,
        }
    }

    fn payment_query(id: &str) -> HashMap<String, String> {
        HashMap::from([
            ("topic".to_string(), "payment".to_string()),
            ("id".to_string(), id.to_string()),
        ])
    }

    #[test]
    fn extracts_id_from_payment_topic_query() {
        assert_eq!(
            extract_payment_id(&payment_query("12345"), None).as_deref(),
            Some("12345")
        );
    }

    #[test]
    fn extracts_id_from_resource_path() {
        let query = HashMap::from([
            ("topic".to_string(), "merchant_order".to_string()),
            ("resource".to_string(), "/v1/payments/67890".to_string()),
        ]);
        assert_eq!(extract_payment_id(&query, None).as_deref(), Some("67890"));
    }

    #[test]
    fn extracts_id_from_json_body() {
        let body = json!({ "type": "payment", "data": { "id": "555" } });
        assert_eq!(
            extract_payment_id(&HashMap::new(), Some(&body)).as_deref(),
            Some("555")
        );

        let body = json!({ "id": 777 });
        assert_eq!(
            extract_payment_id(&HashMap::new(), Some(&body)).as_deref(),
            Some("777")
        );
    }

    #[test]
    fn missing_or_empty_id_yields_none() {
        assert!(extract_payment_id(&HashMap::new(), None).is_none());

        let query = HashMap::from([
            ("topic".to_string(), "merchant_order".to_string()),
            ("resource".to_string(), "/v1/payments/".to_string()),
        ]);
        assert!(extract_payment_id(&query, None).is_none());
    }

    #[tokio::test]
    async fn checkout_creates_pending_order_and_session() {
        let fx = fixture("100.00", true);
        let checkout = fx
            .payments
            .create_checkout(Uuid::new_v4(), new_order_checkout(fx.listed.id))
            .await
            .unwrap();

        assert_eq!(checkout.preference_id, "pref-123");
        assert_eq!(checkout.url, "https://live/checkout");

        let order_id = Uuid::parse_str(&checkout.external_reference).unwrap();
        let order = fx.orders.get_order(order_id, None).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert!(fx.store.transactions_for(order.id).is_empty());
    }

    #[tokio::test]
    async fn checkout_url_falls_back_to_manual_redirect() {
        let fx = fixture("100.00", false);
        let checkout = fx
            .payments
            .create_checkout(Uuid::new_v4(), new_order_checkout(fx.listed.id))
            .await
            .unwrap();
        assert_eq!(
            checkout.url,
            "https://www.mercadopago.com/checkout/v1/redirect?pref_id=pref-123"
        );
    }

    #[tokio::test]
    async fn checkout_reuses_an_existing_order() {
        let fx = fixture("100.00", true);
        let client = Uuid::new_v4();
        let order = fx
            .orders
            .create_order(
                client,
                CreateOrderRequest {
                    service_id: fx.listed.id,
                    payment_method: PaymentMethod::MercadoPago,
                    payment_status: None,
                    address: Some("123 Main St".to_string()),
                    notes: None,
                    contact_info: Some(ContactInfoInput {
                        name: "Ana Torres".to_string(),
                        phone: "999888777".to_string(),
                        email: "ana@example.com".parse().unwrap(),
                    }),
                    booking_details: None,
                    currency: None,
                    scheduled_date: None,
                    scheduled_time: None,
                },
            )
            .await
            .unwrap();

        let checkout = fx
            .payments
            .create_checkout(
                client,
                CheckoutRequest {
                    order_id: Some(order.id),
                    service_id: None,
                    address: None,
                    notes: None,
                    contact_info: None,
                    booking_details: None,
                    currency: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(checkout.external_reference, order.id.to_string());

        // another client cannot build a checkout on someone else's order
        let err = fx
            .payments
            .create_checkout(
                Uuid::new_v4(),
                CheckoutRequest {
                    order_id: Some(order.id),
                    service_id: None,
                    address: None,
                    notes: None,
                    contact_info: None,
                    booking_details: None,
                    currency: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn checkout_rejects_zero_priced_services() {
        let fx = fixture("0", true);
        let err = fx
            .payments
            .create_checkout(Uuid::new_v4(), new_order_checkout(fx.listed.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn checkout_requires_a_service_or_order_reference() {
        let fx = fixture("100.00", true);
        let err = fx
            .payments
            .create_checkout(
                Uuid::new_v4(),
                CheckoutRequest {
                    order_id: None,
                    service_id: None,
                    address: None,
                    notes: None,
                    contact_info: None,
                    booking_details: None,
                    currency: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn unconfigured_gateway_surfaces_on_checkout_only() {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let listed = ServiceRecord {
            id: Uuid::new_v4(),
            title: "Garden design".to_string(),
            price: dec("100.00"),
            currency: "USD".to_string(),
            affiliate_id: Uuid::new_v4(),
            active: true,
        };
        catalog.insert(listed.clone());
        let orders = Arc::new(OrderService::new(
            store,
            catalog.clone(),
            Arc::new(RecordingSink::new()),
            dec("0.05"),
        ));
        let payments = PaymentService::new(
            orders,
            catalog,
            Arc::new(UnconfiguredGateway),
            GatewayConfig {
                access_token: None,
                ..test_config()
            },
        );

        let err = payments
            .create_checkout(Uuid::new_v4(), new_order_checkout(listed.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Configuration(_)));

        // the webhook path swallows the same failure
        payments
            .handle_webhook(&payment_query("123"), None)
            .await;
    }

    #[tokio::test]
    async fn approved_webhook_settles_the_order_exactly_once() {
        let fx = fixture("100.00", true);
        let checkout = fx
            .payments
            .create_checkout(Uuid::new_v4(), new_order_checkout(fx.listed.id))
            .await
            .unwrap();
        let order_id = Uuid::parse_str(&checkout.external_reference).unwrap();
        fx.gateway.approve("pay-42", order_id);

        fx.payments.handle_webhook(&payment_query("pay-42"), None).await;

        let order = fx.orders.get_order(order_id, None).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Completed);
        assert_eq!(order.transaction_id.as_deref(), Some("pay-42"));

        let entries = fx.store.transactions_for(order_id);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].affiliate_amount, dec("95.00"));
        assert_eq!(entries[0].platform_amount, dec("5.00"));

        // redelivery of the same notification changes nothing
        fx.payments.handle_webhook(&payment_query("pay-42"), None).await;
        assert_eq!(fx.store.transactions_for(order_id).len(), 1);
    }

    #[tokio::test]
    async fn unapproved_payment_is_a_no_op() {
        let fx = fixture("100.00", true);
        let checkout = fx
            .payments
            .create_checkout(Uuid::new_v4(), new_order_checkout(fx.listed.id))
            .await
            .unwrap();
        let order_id = Uuid::parse_str(&checkout.external_reference).unwrap();
        fx.gateway.set_status("pay-7", "pending", order_id);

        fx.payments.handle_webhook(&payment_query("pay-7"), None).await;

        let order = fx.orders.get_order(order_id, None).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert!(fx.store.transactions_for(order_id).is_empty());
    }

    #[tokio::test]
    async fn webhook_tolerates_unknown_and_missing_ids() {
        let fx = fixture("100.00", true);

        // unknown payment id: gateway lookup fails, webhook still acknowledges
        fx.payments.handle_webhook(&payment_query("nope"), None).await;

        // no id at all
        fx.payments.handle_webhook(&HashMap::new(), None).await;

        // irrelevant body
        fx.payments
            .handle_webhook(&HashMap::new(), Some(&json!({ "hello": "world" })))
            .await;

        assert_eq!(fx.store.ledger_len(), 0);
    }

    #[tokio::test]
    async fn webhook_body_delivery_settles_via_path_id() {
        let fx = fixture("100.00", true);
        let checkout = fx
            .payments
            .create_checkout(Uuid::new_v4(), new_order_checkout(fx.listed.id))
            .await
            .unwrap();
        let order_id = Uuid::parse_str(&checkout.external_reference).unwrap();
        fx.gateway.approve("pay-99", order_id);

        let body = json!({ "type": "payment", "data": { "id": "/v1/payments/pay-99" } });
        fx.payments.handle_webhook(&HashMap::new(), Some(&body)).await;

        let order = fx.orders.get_order(order_id, None).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Completed);
        assert_eq!(fx.store.transactions_for(order_id).len(), 1);
    }
}
