//! In-process fakes for the external collaborators and a fully wired
//! application for handler tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use bytes::Bytes;
use chrono::Utc;
use tower::ServiceExt;
use uuid::Uuid;

use eventify_db::{Database, IssueOutcome, NewEvent, NewTicket, TicketRow};
use eventify_gateway::Dispatcher;
use eventify_types::models::{Role, TicketStatus};

use crate::auth::{create_token, hash_password};
use crate::media::{MediaStore, StoredAsset};
use crate::middleware::Principal;
use crate::notify::Notifier;
use crate::notify::mailer::{Mailer, TicketEmail};
use crate::payments::gateway::{
    CheckoutSession, GatewayError, NewCheckout, NewIntent, PaymentGateway, PaymentIntent,
};
use crate::state::{AppState, AppStateInner};

pub const JWT_SECRET: &str = "test-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";

// -- Mailer --

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self { sent: Mutex::new(Vec::new()), fail: true }
    }

    /// Recipients of every delivered email, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: TicketEmail) -> Result<()> {
        if self.fail {
            bail!("smtp relay refused connection");
        }
        self.sent.lock().unwrap().push(email.to);
        Ok(())
    }
}

// -- Payment gateway --

#[derive(Default)]
pub struct FakeGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    pub last_checkout: Mutex<Option<NewCheckout>>,
}

impl FakeGateway {
    pub fn set_intent_status(&self, id: &str, status: &str) {
        if let Some(intent) = self.intents.lock().unwrap().get_mut(id) {
            intent.status = status.to_string();
        }
    }

    pub fn add_session(&self, id: &str, payment_status: &str, metadata: &[(&str, String)]) {
        self.sessions.lock().unwrap().insert(
            id.to_string(),
            CheckoutSession {
                id: id.to_string(),
                url: Some(format!("https://checkout.test/{}", id)),
                payment_status: payment_status.to_string(),
                metadata: metadata
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            },
        );
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(&self, req: NewIntent) -> Result<PaymentIntent, GatewayError> {
        let id = format!("pi_{}", Uuid::new_v4().simple());
        let intent = PaymentIntent {
            id: id.clone(),
            client_secret: Some(format!("{}_secret", id)),
            status: "requires_payment_method".to_string(),
            amount: req.amount,
            metadata: req.metadata.into_iter().collect(),
        };
        self.intents.lock().unwrap().insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError> {
        self.intents
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected(format!("No such payment_intent: '{}'", id)))
    }

    async fn create_checkout_session(
        &self,
        req: NewCheckout,
    ) -> Result<CheckoutSession, GatewayError> {
        let id = format!("cs_{}", Uuid::new_v4().simple());
        let session = CheckoutSession {
            id: id.clone(),
            url: Some(format!("https://checkout.test/{}", id)),
            payment_status: "unpaid".to_string(),
            metadata: req.metadata.iter().cloned().collect(),
        };
        self.sessions.lock().unwrap().insert(id, session.clone());
        *self.last_checkout.lock().unwrap() = Some(req);
        Ok(session)
    }

    async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, GatewayError> {
        self.sessions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected(format!("No such checkout.session: '{}'", id)))
    }
}

// -- Media store --

#[derive(Default)]
pub struct FakeMedia {
    pub stored: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaStore for FakeMedia {
    async fn store(&self, _data: Bytes, _content_type: Option<&str>) -> Result<StoredAsset> {
        let id = format!("{}.png", Uuid::new_v4());
        self.stored.lock().unwrap().push(id.clone());
        Ok(StoredAsset { url: format!("http://media.test/uploads/{}", id), id })
    }

    async fn delete(&self, asset_id: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(asset_id.to_string());
        Ok(())
    }
}

// -- Application --

pub struct TestApp {
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
    pub payments: Arc<FakeGateway>,
    pub media: Arc<FakeMedia>,
}

impl TestApp {
    /// Must run inside a Tokio runtime: the notification worker is spawned.
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mailer = Arc::new(RecordingMailer::default());
        let payments = Arc::new(FakeGateway::default());
        let media = Arc::new(FakeMedia::default());

        let state = Arc::new(AppStateInner {
            db: db.clone(),
            jwt_secret: JWT_SECRET.to_string(),
            token_ttl: chrono::Duration::hours(24),
            allow_admin_signup: false,
            dispatcher: Dispatcher::new(),
            notifier: Notifier::spawn(mailer.clone(), db),
            payments: payments.clone(),
            webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            currency: "inr".to_string(),
            frontend_url: "http://app.test".to_string(),
            media: media.clone(),
        });

        Self { state, mailer, payments, media }
    }

    pub fn router(&self) -> Router {
        crate::routes::router(self.state.clone())
    }

    pub fn user(&self, role: Role) -> Principal {
        let id = Uuid::new_v4();
        let username = format!("{}-{}", role, &id.simple().to_string()[..6]);
        let email = format!("{}@example.com", username);
        assert!(self.state.db.create_user(id, &username, &email, "x", role).unwrap());
        Principal { id, username, email, role }
    }

    pub fn user_with_password(&self, email: &str, password: &str, role: Role) -> Uuid {
        let id = Uuid::new_v4();
        let hash = hash_password(password).unwrap();
        assert!(self.state.db.create_user(id, "someone", email, &hash, role).unwrap());
        id
    }

    pub fn token(&self, principal: &Principal) -> String {
        create_token(JWT_SECRET, principal.id, principal.role, chrono::Duration::hours(1)).unwrap()
    }

    pub fn event(&self, host_id: Uuid, limit: i64) -> Uuid {
        self.state.db.insert_event(&sample_event(host_id, limit)).unwrap().id
    }

    pub async fn call(&self, req: Request<Body>) -> (u16, serde_json::Value) {
        let response = self.router().oneshot(req).await.unwrap();
        let status = response.status().as_u16();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, body)
    }

    pub async fn post_json(
        &self,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> (u16, serde_json::Value) {
        self.call(json_request("POST", uri, token, body)).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (u16, serde_json::Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.call(builder.body(Body::empty()).unwrap()).await
    }
}

pub fn json_request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn sample_event(host_id: Uuid, limit: i64) -> NewEvent {
    NewEvent {
        id: Uuid::new_v4(),
        title: "Rust Meetup".to_string(),
        description: String::new(),
        date_time: Utc::now() + chrono::Duration::days(7),
        venue: "Hall A".to_string(),
        location: "Pune".to_string(),
        price: 100.0,
        ticket_limit: limit,
        coordinates: vec![73.85, 18.52],
        category: "General".to_string(),
        banner: String::new(),
        banner_id: String::new(),
        host_id,
    }
}

/// A `Pending` ticket owned by a fresh user, as the payment bridge mints.
pub fn pending_ticket(db: &Database) -> TicketRow {
    let host = Uuid::new_v4();
    let fan = Uuid::new_v4();
    db.create_user(fan, "fan", &format!("{}@example.com", fan.simple()), "x", Role::User)
        .unwrap();
    let event = db.insert_event(&sample_event(host, 0)).unwrap();
    let id = Uuid::new_v4();
    let outcome = db
        .issue_ticket(&NewTicket {
            id,
            event_id: event.id,
            user_id: fan,
            qr_code_data: String::new(),
            qr_code_string: format!("TKT-{}", id.simple()),
            status: TicketStatus::Pending,
            payment_ref: Some(format!("pi_{}", id.simple())),
            quantity: 1,
        })
        .unwrap();
    match outcome {
        IssueOutcome::Issued(row) => row,
        _ => panic!("expected a fresh ticket"),
    }
}
