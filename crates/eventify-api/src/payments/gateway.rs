use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Intent status that counts as settled.
pub const INTENT_SUCCEEDED: &str = "succeeded";
/// Checkout session payment status that counts as settled.
pub const SESSION_PAID: &str = "paid";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway is not configured")]
    NotConfigured,

    /// The provider answered and refused the request.
    #[error("{0}")]
    Rejected(String),

    #[error("payment gateway unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntent {
    pub fn is_settled(&self) -> bool {
        self.status == INTENT_SUCCEEDED
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    #[serde(default)]
    pub payment_status: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == SESSION_PAID
    }
}

#[derive(Debug, Clone)]
pub struct NewIntent {
    /// Smallest currency unit.
    pub amount: i64,
    pub currency: String,
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct LineItem {
    pub name: String,
    pub description: String,
    pub image: Option<String>,
    /// Smallest currency unit.
    pub unit_amount: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct NewCheckout {
    pub currency: String,
    pub line_items: Vec<LineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: Vec<(String, String)>,
}

/// The external card processor. The bridge never sees card data; it only
/// creates and re-reads intents and hosted checkout sessions.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, req: NewIntent) -> Result<PaymentIntent, GatewayError>;

    async fn retrieve_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError>;

    async fn create_checkout_session(
        &self,
        req: NewCheckout,
    ) -> Result<CheckoutSession, GatewayError>;

    async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, GatewayError>;
}

/// Stripe-compatible REST client: form-encoded requests, bearer secret key.
pub struct StripeGateway {
    secret_key: Option<String>,
    api_base: String,
    client: OnceLock<reqwest::Client>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(secret_key: Option<String>, api_base: &str) -> Self {
        Self {
            secret_key: secret_key.filter(|k| !k.is_empty()),
            api_base: api_base.trim_end_matches('/').to_string(),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> &reqwest::Client {
        self.client.get_or_init(|| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default()
        })
    }

    fn key(&self) -> Result<&str, GatewayError> {
        self.secret_key.as_deref().ok_or(GatewayError::NotConfigured)
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, GatewayError> {
        debug!("POST {}{}", self.api_base, path);
        let response = self
            .client()
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(self.key()?)
            .form(form)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, GatewayError> {
        debug!("GET {}{}", self.api_base, path);
        let response = self
            .client()
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(self.key()?)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        let message = response
            .json::<ErrorEnvelope>()
            .await
            .ok()
            .and_then(|e| e.error.message)
            .unwrap_or_else(|| format!("payment gateway returned {}", status));
        Err(GatewayError::Rejected(message))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, req: NewIntent) -> Result<PaymentIntent, GatewayError> {
        let mut form = vec![
            ("amount".to_string(), req.amount.to_string()),
            ("currency".to_string(), req.currency),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
        ];
        push_metadata(&mut form, "metadata", &req.metadata);
        self.post("/v1/payment_intents", &form).await
    }

    async fn retrieve_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError> {
        self.get(&format!("/v1/payment_intents/{}", path_segment(id)?)).await
    }

    async fn create_checkout_session(
        &self,
        req: NewCheckout,
    ) -> Result<CheckoutSession, GatewayError> {
        let form = checkout_form(&req);
        self.post("/v1/checkout/sessions", &form).await
    }

    async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, GatewayError> {
        self.get(&format!("/v1/checkout/sessions/{}", path_segment(id)?)).await
    }
}

/// Provider ids are `[A-Za-z0-9_]`; anything else never reaches a URL.
fn path_segment(id: &str) -> Result<&str, GatewayError> {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(id)
    } else {
        Err(GatewayError::Rejected(format!("Invalid payment reference '{}'", id)))
    }
}

fn push_metadata(form: &mut Vec<(String, String)>, prefix: &str, metadata: &[(String, String)]) {
    for (key, value) in metadata {
        form.push((format!("{}[{}]", prefix, key), value.clone()));
    }
}

fn checkout_form(req: &NewCheckout) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("success_url".to_string(), req.success_url.clone()),
        ("cancel_url".to_string(), req.cancel_url.clone()),
    ];
    for (i, item) in req.line_items.iter().enumerate() {
        let p = format!("line_items[{}]", i);
        form.push((format!("{}[price_data][currency]", p), req.currency.clone()));
        form.push((format!("{}[price_data][product_data][name]", p), item.name.clone()));
        form.push((
            format!("{}[price_data][product_data][description]", p),
            item.description.clone(),
        ));
        if let Some(image) = &item.image {
            form.push((format!("{}[price_data][product_data][images][0]", p), image.clone()));
        }
        form.push((format!("{}[price_data][unit_amount]", p), item.unit_amount.to_string()));
        form.push((format!("{}[quantity]", p), item.quantity.to_string()));
    }
    push_metadata(&mut form, "metadata", &req.metadata);
    form
}

/// Convert a major-unit price to the smallest currency unit.
pub fn to_minor_units(price: f64) -> i64 {
    (price * 100.0).round() as i64
}
