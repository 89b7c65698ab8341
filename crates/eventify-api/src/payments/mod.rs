//! Payment bridge: creates intents and hosted checkout sessions with the
//! provider and turns settled payments into tickets. Settlement is always
//! re-read from the provider, never taken from the caller.

pub mod gateway;
pub mod webhook;

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use eventify_types::api::{
    CheckoutRequest, CheckoutResponse, ConfirmCheckoutRequest, ConfirmPaymentRequest,
    CreateIntentRequest, CreateIntentResponse, TicketResponse,
};
use eventify_types::models::Ticket;

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::lifecycle::{self, Issuance, IssueRequest, MAX_QUANTITY};
use crate::middleware::Principal;
use crate::policy::{Operation, authorize, require_owner_or_admin};
use crate::state::{AppState, AppStateInner};

use self::gateway::{CheckoutSession, GatewayError, LineItem, NewCheckout, NewIntent, to_minor_units};
use self::webhook::{CHECKOUT_COMPLETED, WebhookEvent, verify_signature};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

const META_USER: &str = "userId";
const META_EVENT: &str = "eventId";
const META_QUANTITY: &str = "quantity";

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotConfigured => Self::Payment("Payments are not configured".to_string()),
            GatewayError::Rejected(msg) => Self::Payment(msg),
            GatewayError::Transport(e) => Self::Internal(e.into()),
        }
    }
}

pub async fn create_intent(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<CreateIntentRequest>,
) -> ApiResult<Json<CreateIntentResponse>> {
    authorize(Operation::Pay, &principal)?;

    let amount = req.amount.filter(|a| *a > 0).ok_or_else(|| {
        ApiError::Payment("Invalid payment amount".to_string())
    })?;

    let intent = state
        .payments
        .create_intent(NewIntent {
            amount,
            currency: state.currency.clone(),
            metadata: vec![
                (META_USER.to_string(), principal.id.to_string()),
                ("method".to_string(), req.method.unwrap_or_else(|| "card".to_string())),
            ],
        })
        .await?;

    let client_secret = intent
        .client_secret
        .ok_or_else(|| ApiError::Payment("Payment provider returned no client secret".to_string()))?;

    info!("Payment intent {} created for {} ({})", intent.id, principal.id, amount);

    Ok(Json(CreateIntentResponse {
        message: "Payment intent created successfully".to_string(),
        client_secret,
        payment_intent_id: intent.id,
    }))
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<ConfirmPaymentRequest>,
) -> ApiResult<Json<TicketResponse>> {
    authorize(Operation::Pay, &principal)?;

    let (Some(intent_id), Some(event_id)) = (req.payment_intent_id, req.event_id) else {
        return Err(ApiError::validation("Missing payment details"));
    };
    let user_id = req.user_id.unwrap_or(principal.id);
    require_owner_or_admin(&principal, user_id)?;

    let intent = state.payments.retrieve_intent(&intent_id).await?;
    if !intent.is_settled() {
        info!("Payment intent {} not settled ({})", intent.id, intent.status);
        return Err(ApiError::PaymentNotComplete(
            "Payment not yet confirmed or failed".to_string(),
        ));
    }
    if intent
        .metadata
        .get(META_USER)
        .is_some_and(|owner| *owner != user_id.to_string())
    {
        return Err(ApiError::Payment(
            "Payment does not belong to this user".to_string(),
        ));
    }

    let quantity = req.quantity.unwrap_or(1);
    let event = state
        .db(move |db| db.get_event(event_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))?;
    let due = to_minor_units(event.price).saturating_mul(quantity);
    if intent.amount < due {
        warn!(
            "Payment intent {} covers {} but {} ticket(s) for event {} cost {}",
            intent.id, intent.amount, quantity, event_id, due
        );
        return Err(ApiError::Payment(
            "Payment amount does not cover the tickets".to_string(),
        ));
    }

    let (ticket, issuance) = lifecycle::issue_ticket(
        &state,
        IssueRequest {
            event_id,
            user_id,
            quantity,
            payment_ref: Some(intent.id),
        },
    )
    .await?;

    Ok(Json(TicketResponse {
        message: issuance_message(issuance).to_string(),
        ticket: Ticket::from(ticket),
    }))
}

/// Line items are priced from the stored events; client prices are ignored.
/// One event per session, since the settlement metadata names one event.
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    authorize(Operation::Pay, &principal)?;

    let item = match req.cart.as_slice() {
        [] => return Err(ApiError::validation("No events selected for payment")),
        [item] => item.clone(),
        _ => {
            return Err(ApiError::validation(
                "Checkout supports one event per session",
            ));
        }
    };
    let user_id = req.user_id.unwrap_or(principal.id);
    require_owner_or_admin(&principal, user_id)?;

    let quantity = item.quantity.unwrap_or(1);
    if !(1..=MAX_QUANTITY).contains(&quantity) {
        return Err(ApiError::validation(format!(
            "Quantity must be between 1 and {}",
            MAX_QUANTITY
        )));
    }

    let event = state
        .db(move |db| db.get_event(item.id))
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))?;

    let description = if event.location.is_empty() {
        event.category.clone()
    } else {
        event.location.clone()
    };
    let frontend = state.frontend_url.trim_end_matches('/');

    let session = state
        .payments
        .create_checkout_session(NewCheckout {
            currency: state.currency.clone(),
            line_items: vec![LineItem {
                name: event.title.clone(),
                description,
                image: Some(event.banner.clone()).filter(|b| !b.is_empty()),
                unit_amount: to_minor_units(event.price),
                quantity,
            }],
            success_url: format!("{}/payment-success?session_id={{CHECKOUT_SESSION_ID}}", frontend),
            cancel_url: format!("{}/payment-failed", frontend),
            metadata: vec![
                (META_USER.to_string(), user_id.to_string()),
                (META_EVENT.to_string(), event.id.to_string()),
                (META_QUANTITY.to_string(), quantity.to_string()),
            ],
        })
        .await?;

    let url = session
        .url
        .ok_or_else(|| ApiError::Payment("Payment provider returned no checkout URL".to_string()))?;

    info!("Checkout session {} created for event {} by {}", session.id, event.id, user_id);

    Ok(Json(CheckoutResponse {
        message: "Checkout session created successfully".to_string(),
        url,
    }))
}

/// Manual fallback for the redirect flow when the webhook has not arrived.
pub async fn confirm_checkout(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<ConfirmCheckoutRequest>,
) -> ApiResult<Json<TicketResponse>> {
    authorize(Operation::Pay, &principal)?;

    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::validation("Session ID is required"))?;

    let session = state.payments.retrieve_checkout_session(&session_id).await?;
    let request = settlement_request(&session)?;
    require_owner_or_admin(&principal, request.user_id)?;

    if !session.is_paid() {
        return Err(ApiError::PaymentNotComplete(
            "Payment not yet confirmed or failed".to_string(),
        ));
    }

    let (ticket, issuance) = lifecycle::issue_ticket(&state, request).await?;

    Ok(Json(TicketResponse {
        message: issuance_message(issuance).to_string(),
        ticket: Ticket::from(ticket),
    }))
}

/// Asynchronous settlement from the provider. Verification failures are
/// rejected; business failures after a valid signature are acknowledged so
/// the provider stops redelivering, while internal failures are not.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    if let Err(e) = verify_signature(
        &body,
        signature,
        state.webhook_secret.as_deref(),
        chrono::Utc::now().timestamp(),
    ) {
        warn!("Rejected webhook: {}", e);
        return Err(ApiError::InvalidSignature(format!("Webhook Error: {}", e)));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation(format!("Malformed webhook payload: {}", e)))?;

    if event.kind == CHECKOUT_COMPLETED {
        settle_checkout(&state, &event).await?;
    }

    Ok((StatusCode::OK, Json(serde_json::json!({ "received": true }))))
}

async fn settle_checkout(state: &AppStateInner, event: &WebhookEvent) -> ApiResult<()> {
    let session: CheckoutSession = match serde_json::from_value(event.data.object.clone()) {
        Ok(session) => session,
        Err(e) => {
            warn!("Webhook {} carries an unreadable checkout session: {}", event.id, e);
            return Ok(());
        }
    };

    if !session.is_paid() {
        info!("Checkout {} completed without payment ({})", session.id, session.payment_status);
        return Ok(());
    }

    let outcome = match settlement_request(&session) {
        Ok(request) => lifecycle::issue_ticket(state, request).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok((ticket, issuance)) => {
            info!(
                "Webhook {} settled checkout {}: ticket {} ({:?})",
                event.id, session.id, ticket.id, issuance
            );
            Ok(())
        }
        Err(e @ ApiError::Internal(_)) => Err(e),
        Err(e) => {
            warn!("Webhook {} for checkout {} not issued: {}", event.id, session.id, e);
            Ok(())
        }
    }
}

fn settlement_request(session: &CheckoutSession) -> ApiResult<IssueRequest> {
    let metadata: &HashMap<String, String> = &session.metadata;
    let uuid = |key: &str| -> ApiResult<Uuid> {
        metadata
            .get(key)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ApiError::validation(format!("Checkout session is missing {}", key)))
    };

    Ok(IssueRequest {
        event_id: uuid(META_EVENT)?,
        user_id: uuid(META_USER)?,
        quantity: metadata
            .get(META_QUANTITY)
            .and_then(|q| q.parse().ok())
            .unwrap_or(1),
        payment_ref: Some(session.id.clone()),
    })
}

fn issuance_message(issuance: Issuance) -> &'static str {
    match issuance {
        Issuance::Created => "Payment confirmed and ticket generated successfully",
        Issuance::AlreadyIssued => "Ticket already issued for this payment",
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, header};
    use eventify_types::models::Role;
    use serde_json::json;

    use super::*;
    use crate::test_support::{TestApp, WEBHOOK_SECRET};

    fn webhook_request(body: &serde_json::Value, signature: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/payment/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn completed_checkout(session_id: &str, user: Uuid, event: Uuid) -> serde_json::Value {
        json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": session_id,
                "payment_status": "paid",
                "metadata": { "userId": user, "eventId": event, "quantity": "2" }
            }}
        })
    }

    #[tokio::test]
    async fn unsettled_intent_issues_nothing() {
        let app = TestApp::new();
        let host = app.user(Role::Host);
        let fan = app.user(Role::User);
        let token = app.token(&fan);
        let event = app.event(host.id, 0);

        let (status, intent) = app
            .post_json("/api/payment/create-intent", Some(&token), json!({ "amount": 20000 }))
            .await;
        assert_eq!(status, 200, "{intent}");
        let intent_id = intent["paymentIntentId"].as_str().unwrap().to_string();
        let confirm = json!({ "paymentIntentId": intent_id, "eventId": event, "quantity": 2 });

        let (status, body) = app.post_json("/api/payment/confirm", Some(&token), confirm.clone()).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "PAYMENT_NOT_COMPLETE");
        assert!(app.state.db.list_tickets_by_user(fan.id).unwrap().is_empty());

        app.payments.set_intent_status(&intent_id, "succeeded");
        let (status, first) = app.post_json("/api/payment/confirm", Some(&token), confirm.clone()).await;
        assert_eq!(status, 200, "{first}");
        assert_eq!(first["ticket"]["status"], "Pending");
        assert_eq!(first["ticket"]["paymentRef"], intent_id.as_str());

        let (status, again) = app.post_json("/api/payment/confirm", Some(&token), confirm).await;
        assert_eq!(status, 200);
        assert_eq!(again["ticket"]["id"], first["ticket"]["id"]);
        assert_eq!(app.state.db.get_event(event).unwrap().unwrap().ticket_count, 2);
    }

    #[tokio::test]
    async fn underpaid_intent_issues_nothing() {
        let app = TestApp::new();
        let host = app.user(Role::Host);
        let fan = app.user(Role::User);
        let token = app.token(&fan);
        let event = app.event(host.id, 0);

        let (_, intent) = app
            .post_json("/api/payment/create-intent", Some(&token), json!({ "amount": 1 }))
            .await;
        let intent_id = intent["paymentIntentId"].as_str().unwrap().to_string();
        app.payments.set_intent_status(&intent_id, "succeeded");

        let (status, body) = app
            .post_json(
                "/api/payment/confirm",
                Some(&token),
                json!({ "paymentIntentId": intent_id, "eventId": event, "quantity": 20 }),
            )
            .await;
        assert_eq!(status, 400, "{body}");
        assert_eq!(body["error"], "PAYMENT_ERROR");
        assert!(app.state.db.list_tickets_by_user(fan.id).unwrap().is_empty());
        assert_eq!(app.state.db.get_event(event).unwrap().unwrap().ticket_count, 0);
    }

    #[tokio::test]
    async fn unreadable_checkout_payload_is_acknowledged() {
        let app = TestApp::new();
        let body = json!({
            "id": "evt_bad",
            "type": "checkout.session.completed",
            "data": { "object": { "payment_status": 7 } }
        });
        let signature = webhook::sign(
            body.to_string().as_bytes(),
            WEBHOOK_SECRET,
            chrono::Utc::now().timestamp(),
        );

        let (status, resp) = app.call(webhook_request(&body, &signature)).await;
        assert_eq!(status, 200, "{resp}");
        assert_eq!(resp["received"], true);
    }

    #[tokio::test]
    async fn confirm_for_someone_else_needs_admin() {
        let app = TestApp::new();
        let host = app.user(Role::Host);
        let fan = app.user(Role::User);
        let other = app.user(Role::User);
        let event = app.event(host.id, 0);

        let (status, _) = app
            .post_json(
                "/api/payment/confirm",
                Some(&app.token(&other)),
                json!({ "paymentIntentId": "pi_x", "eventId": event, "userId": fan.id }),
            )
            .await;
        assert_eq!(status, 403);
    }

    #[tokio::test]
    async fn non_positive_amount_is_a_payment_error() {
        let app = TestApp::new();
        let fan = app.user(Role::User);
        let (status, body) = app
            .post_json("/api/payment/create-intent", Some(&app.token(&fan)), json!({ "amount": 0 }))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "PAYMENT_ERROR");
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_is_rejected() {
        let app = TestApp::new();
        let host = app.user(Role::Host);
        let fan = app.user(Role::User);
        let event = app.event(host.id, 0);
        let body = completed_checkout("cs_forged", fan.id, event);
        let now = chrono::Utc::now().timestamp();

        let forged = webhook::sign(body.to_string().as_bytes(), "whsec_wrong", now);
        let (status, resp) = app.call(webhook_request(&body, &forged)).await;
        assert_eq!(status, 400);
        assert_eq!(resp["error"], "INVALID_SIGNATURE");

        let (status, _) = app.call(webhook_request(&body, "garbage")).await;
        assert_eq!(status, 400);
        assert!(app.state.db.list_tickets_by_user(fan.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_redelivery_issues_once() {
        let app = TestApp::new();
        let host = app.user(Role::Host);
        let fan = app.user(Role::User);
        let event = app.event(host.id, 0);
        let body = completed_checkout("cs_live", fan.id, event);

        for _ in 0..2 {
            let signature = webhook::sign(
                body.to_string().as_bytes(),
                WEBHOOK_SECRET,
                chrono::Utc::now().timestamp(),
            );
            let (status, resp) = app.call(webhook_request(&body, &signature)).await;
            assert_eq!(status, 200, "{resp}");
            assert_eq!(resp["received"], true);
        }

        let tickets = app.state.db.list_tickets_by_user(fan.id).unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].quantity, 2);
        assert_eq!(tickets[0].payment_ref.as_deref(), Some("cs_live"));
        assert_eq!(app.state.db.get_event(event).unwrap().unwrap().ticket_count, 2);
    }

    #[tokio::test]
    async fn checkout_is_priced_from_stored_event() {
        let app = TestApp::new();
        let host = app.user(Role::Host);
        let fan = app.user(Role::User);
        let token = app.token(&fan);
        let event = app.event(host.id, 0);

        let (status, body) = app
            .post_json(
                "/api/payment/create-checkout-session",
                Some(&token),
                json!({ "cart": [{ "_id": event, "quantity": 3, "price": 1 }] }),
            )
            .await;
        assert_eq!(status, 200, "{body}");
        assert!(body["url"].as_str().unwrap().starts_with("https://checkout.test/"));

        let sent = app.payments.last_checkout.lock().unwrap().clone().unwrap();
        assert_eq!(sent.line_items[0].unit_amount, 10_000);
        assert_eq!(sent.line_items[0].quantity, 3);
        assert!(sent.success_url.starts_with("http://app.test/payment-success"));
        assert!(sent.metadata.contains(&(META_EVENT.to_string(), event.to_string())));

        let (status, _) = app
            .post_json("/api/payment/create-checkout-session", Some(&token), json!({ "cart": [] }))
            .await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn confirm_checkout_requires_paid_session() {
        let app = TestApp::new();
        let host = app.user(Role::Host);
        let fan = app.user(Role::User);
        let token = app.token(&fan);
        let event = app.event(host.id, 0);
        let metadata = [
            (META_USER, fan.id.to_string()),
            (META_EVENT, event.to_string()),
            (META_QUANTITY, "1".to_string()),
        ];

        app.payments.add_session("cs_unpaid", "unpaid", &metadata);
        let (status, body) = app
            .post_json("/api/payment/confirm-checkout", Some(&token), json!({ "sessionId": "cs_unpaid" }))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "PAYMENT_NOT_COMPLETE");

        app.payments.add_session("cs_paid", "paid", &metadata);
        let (status, body) = app
            .post_json("/api/payment/confirm-checkout", Some(&token), json!({ "sessionId": "cs_paid" }))
            .await;
        assert_eq!(status, 200, "{body}");
        assert_eq!(body["ticket"]["paymentRef"], "cs_paid");
    }
}
