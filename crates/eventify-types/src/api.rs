use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Event, Role, Ticket, User};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway identify
/// handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
}

// -- Auth --

/// All fields are optional on the wire so that a missing field is reported
/// as a validation error instead of a deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct SignupRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub user: User,
}

// -- Events --

/// Event fields as submitted by a host, either as multipart form fields or
/// as a JSON body. Every field is optional so the same shape serves create
/// and partial update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date_time: Option<DateTime<Utc>>,
    pub venue: Option<String>,
    pub location: Option<String>,
    pub price: Option<f64>,
    pub ticket_limit: Option<i64>,
    pub coordinates: Option<Vec<f64>>,
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub message: String,
    pub event: Event,
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub events: Vec<Event>,
}

// -- Tickets --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub event_id: Option<Uuid>,
    pub quantity: Option<i64>,
}

/// `ticket_id` carries either the ticket's internal id or the raw text read
/// from its QR code.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub ticket_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicketRequest {
    pub attendee_name: Option<String>,
    pub notes: Option<String>,
    pub seat_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub message: String,
    pub ticket: Ticket,
}

#[derive(Debug, Serialize)]
pub struct TicketListResponse {
    pub message: String,
    pub tickets: Vec<Ticket>,
}

// -- Payments --

#[derive(Debug, Default, Deserialize)]
pub struct CreateIntentRequest {
    /// Amount in the smallest currency unit.
    pub amount: Option<i64>,
    pub method: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentResponse {
    pub message: String,
    pub client_secret: String,
    pub payment_intent_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub payment_intent_id: Option<String>,
    pub event_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CartItem {
    #[serde(alias = "_id", alias = "eventId")]
    pub id: Uuid,
    pub quantity: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub cart: Vec<CartItem>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub message: String,
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmCheckoutRequest {
    pub session_id: Option<String>,
}

// -- Admin / stats --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub role: Option<Role>,
    pub is_blocked: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: i64,
    pub total_events: i64,
    pub total_tickets: i64,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub event_id: Uuid,
    pub title: String,
    pub tickets_sold: i64,
    pub tickets_scanned: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Ticket,
    Event,
}

#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub message: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDashboard {
    pub total_events: i64,
    pub total_tickets: i64,
    pub total_revenue: f64,
    pub avg_revenue_per_event: f64,
    pub upcoming_events: Vec<Event>,
}
