use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ApiError;

const DEFAULT_API_BASE: &str = "https://api.mercadopago.com";
const DEFAULT_CHECKOUT_BASE: &str = "https://www.mercadopago.com/checkout/v1/redirect?pref_id=";

/// Everything the checkout/webhook path needs from the environment, read
/// once at startup. `access_token` stays optional here; constructing the
/// live client is what enforces its presence.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub access_token: Option<String>,
    pub currency_id: String,
    pub checkout_base: String,
    pub frontend_url: String,
    pub public_base_url: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let timeout_secs = dotenv::var("MP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);
        Self {
            access_token: dotenv::var("MP_ACCESS_TOKEN").ok().filter(|t| !t.is_empty()),
            currency_id: dotenv::var("MP_CURRENCY_ID").unwrap_or("PEN".to_string()),
            checkout_base: dotenv::var("MP_CHECKOUT_BASE").unwrap_or(DEFAULT_CHECKOUT_BASE.to_string()),
            frontend_url: dotenv::var("FRONTEND_URL").unwrap_or("http://localhost:5000".to_string()),
            public_base_url: dotenv::var("PUBLIC_BASE_URL").unwrap_or("http://localhost:3000".to_string()),
            api_base: dotenv::var("MP_API_BASE").unwrap_or(DEFAULT_API_BASE.to_string()),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PreferenceItem {
    pub title: String,
    pub quantity: u32,
    pub currency_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackUrls {
    pub success: String,
    pub pending: String,
    pub failure: String,
}

/// Checkout-session creation payload. `external_reference` carries the order
/// id so the asynchronous webhook can be matched back to the order.
#[derive(Debug, Clone, Serialize)]
pub struct PreferenceRequest {
    pub items: Vec<PreferenceItem>,
    pub external_reference: String,
    pub notification_url: String,
    pub back_urls: BackUrls,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferenceResponse {
    pub id: String,
    #[serde(default)]
    pub init_point: Option<String>,
    #[serde(default)]
    pub sandbox_init_point: Option<String>,
}

impl PreferenceResponse {
    /// Best-effort live checkout URL: the gateway's live link, then its
    /// sandbox link, then a manually built redirect keyed by preference id.
    pub fn checkout_url(&self, checkout_base: &str) -> String {
        self.init_point
            .clone()
            .or_else(|| self.sandbox_init_point.clone())
            .unwrap_or_else(|| format!("{checkout_base}{}", self.id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentLookup {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
}

impl PaymentLookup {
    pub fn is_approved(&self) -> bool {
        self.status.as_deref() == Some("approved")
    }
}

/// Outbound side of the payment provider: create a checkout session, look a
/// payment up by id. Webhook ingestion lives with the HTTP surface; this
/// trait is what it calls to resolve a notification.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_preference(&self, req: &PreferenceRequest)
        -> Result<PreferenceResponse, ApiError>;

    async fn get_payment(&self, payment_id: &str) -> Result<PaymentLookup, ApiError>;
}

/// MercadoPago REST client. Constructed explicitly from a validated config,
/// never from ambient global state; all calls share one bounded-timeout
/// reqwest client.
pub struct MercadoPagoClient {
    http: Client,
    access_token: String,
    api_base: String,
}

impl MercadoPagoClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, ApiError> {
        let access_token = config
            .access_token
            .clone()
            .ok_or_else(|| ApiError::Configuration("MP_ACCESS_TOKEN is not configured".to_string()))?;
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ApiError::Configuration(format!("failed to build gateway client: {err}")))?;
        Ok(Self {
            http,
            access_token,
            api_base: config.api_base.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    async fn create_preference(
        &self,
        req: &PreferenceRequest,
    ) -> Result<PreferenceResponse, ApiError> {
        let response = self
            .http
            .post(format!("{}/checkout/preferences", self.api_base))
            .bearer_auth(&self.access_token)
            .json(req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(gateway_rejection(status.as_u16(), &body));
        }
        Ok(response.json::<PreferenceResponse>().await?)
    }

    async fn get_payment(&self, payment_id: &str) -> Result<PaymentLookup, ApiError> {
        let response = self
            .http
            .get(format!("{}/v1/payments/{payment_id}", self.api_base))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(gateway_rejection(status.as_u16(), &body));
        }
        Ok(response.json::<PaymentLookup>().await?)
    }
}

/// Stand-in wired when no access token is configured. Checkout creation
/// surfaces the configuration error to its caller; the webhook boundary
/// swallows it like any other internal fault.
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_preference(
        &self,
        _req: &PreferenceRequest,
    ) -> Result<PreferenceResponse, ApiError> {
        Err(ApiError::Configuration(
            "payment gateway is not configured on the server".to_string(),
        ))
    }

    async fn get_payment(&self, _payment_id: &str) -> Result<PaymentLookup, ApiError> {
        Err(ApiError::Configuration(
            "payment gateway is not configured on the server".to_string(),
        ))
    }
}

fn gateway_rejection(status: u16, body: &str) -> ApiError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| extract_gateway_message(&v))
        .unwrap_or_else(|| "payment gateway rejected the request".to_string());
    ApiError::Gateway { status, message }
}

// The provider reports failures either as a flat `message` or inside a
// `cause` array; take whichever is present.
fn extract_gateway_message(body: &Value) -> Option<String> {
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    body.get("cause")?
        .as_array()?
        .first()?
        .get("description")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn checkout_url_prefers_live_link() {
        let pref = PreferenceResponse {
            id: "pref-1".into(),
            init_point: Some("https://live".into()),
            sandbox_init_point: Some("https://sandbox".into()),
        };
        assert_eq!(pref.checkout_url(DEFAULT_CHECKOUT_BASE), "https://live");
    }

    #[test]
    fn checkout_url_falls_back_to_sandbox_then_manual() {
        let pref = PreferenceResponse {
            id: "pref-1".into(),
            init_point: None,
            sandbox_init_point: Some("https://sandbox".into()),
        };
        assert_eq!(pref.checkout_url(DEFAULT_CHECKOUT_BASE), "https://sandbox");

        let pref = PreferenceResponse {
            id: "pref-1".into(),
            ..Default::default()
        };
        assert_eq!(
            pref.checkout_url(DEFAULT_CHECKOUT_BASE),
            format!("{DEFAULT_CHECKOUT_BASE}pref-1")
        );
    }

    #[test]
    fn extracts_flat_gateway_message() {
        let body = json!({ "message": "invalid access token" });
        assert_eq!(
            extract_gateway_message(&body).as_deref(),
            Some("invalid access token")
        );
    }

    #[test]
    fn extracts_cause_description() {
        let body = json!({ "cause": [{ "description": "unit_price must be positive" }] });
        assert_eq!(
            extract_gateway_message(&body).as_deref(),
            Some("unit_price must be positive")
        );
    }

    #[test]
    fn missing_message_yields_none() {
        assert!(extract_gateway_message(&json!({ "cause": [] })).is_none());
    }

    #[test]
    fn approved_status_detection() {
        let lookup = PaymentLookup {
            status: Some("approved".into()),
            external_reference: None,
        };
        assert!(lookup.is_approved());
        let lookup = PaymentLookup {
            status: Some("rejected".into()),
            external_reference: None,
        };
        assert!(!lookup.is_approved());
    }
}
