use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use eventify_db::TicketPatch;
use eventify_types::api::{
    PurchaseRequest, ScanRequest, TicketListResponse, TicketResponse, UpdateTicketRequest,
};
use eventify_types::models::Ticket;

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::lifecycle::{self, IssueRequest};
use crate::middleware::Principal;
use crate::policy::{Operation, authorize, can_view_ticket, require_owner_or_admin};
use crate::state::AppState;

/// Direct issuance without payment. The ticket is `Active` immediately.
pub async fn purchase(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<PurchaseRequest>,
) -> ApiResult<impl IntoResponse> {
    authorize(Operation::PurchaseTicket, &principal)?;

    let event_id = req
        .event_id
        .ok_or_else(|| ApiError::validation("Event ID is required"))?;

    let (ticket, _) = lifecycle::issue_ticket(
        &state,
        IssueRequest {
            event_id,
            user_id: principal.id,
            quantity: req.quantity.unwrap_or(1),
            payment_ref: None,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(TicketResponse {
            message: "Ticket purchased successfully".to_string(),
            ticket: Ticket::from(ticket),
        }),
    ))
}

pub async fn my_tickets(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<TicketListResponse>> {
    authorize(Operation::ListOwnTickets, &principal)?;

    let rows = state
        .db(move |db| db.list_tickets_by_user(principal.id))
        .await?;

    Ok(Json(TicketListResponse {
        message: "Tickets fetched successfully".to_string(),
        tickets: rows.into_iter().map(Ticket::from).collect(),
    }))
}

pub async fn all_tickets(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<TicketListResponse>> {
    authorize(Operation::Administer, &principal)?;

    let rows = state.db(|db| db.list_all_tickets()).await?;

    Ok(Json(TicketListResponse {
        message: "All tickets fetched successfully".to_string(),
        tickets: rows.into_iter().map(Ticket::from).collect(),
    }))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<Json<TicketResponse>> {
    authorize(Operation::ViewTicket, &principal)?;

    let row = state
        .db(move |db| db.get_ticket(ticket_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Ticket"))?;
    can_view_ticket(&principal, row.user_id)?;

    Ok(Json(TicketResponse {
        message: "Ticket fetched successfully".to_string(),
        ticket: Ticket::from(row),
    }))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(ticket_id): Path<Uuid>,
    ApiJson(req): ApiJson<UpdateTicketRequest>,
) -> ApiResult<Json<TicketResponse>> {
    authorize(Operation::EditTicket, &principal)?;

    let existing = state
        .db(move |db| db.get_ticket(ticket_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Ticket"))?;
    require_owner_or_admin(&principal, existing.user_id)?;

    let patch = TicketPatch {
        attendee_name: req.attendee_name,
        notes: req.notes,
        seat_number: req.seat_number,
    };
    let row = state
        .db(move |db| db.update_ticket_metadata(ticket_id, &patch))
        .await?
        .ok_or_else(|| ApiError::not_found("Ticket"))?;

    Ok(Json(TicketResponse {
        message: "Ticket updated successfully".to_string(),
        ticket: Ticket::from(row),
    }))
}

/// Removes the record only. The event's sold count is left as is.
pub async fn delete_ticket(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(Operation::EditTicket, &principal)?;

    let existing = state
        .db(move |db| db.get_ticket(ticket_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Ticket"))?;
    require_owner_or_admin(&principal, existing.user_id)?;

    if !state.db(move |db| db.delete_ticket(ticket_id)).await? {
        return Err(ApiError::not_found("Ticket"));
    }
    info!("Ticket {} deleted by {}", ticket_id, principal.id);

    Ok(Json(serde_json::json!({ "message": "Ticket deleted successfully" })))
}

/// Served at both `/tickets/scan` and `/scan`.
pub async fn scan(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<ScanRequest>,
) -> ApiResult<Json<TicketResponse>> {
    authorize(Operation::ScanTicket, &principal)?;

    let input = req
        .ticket_id
        .ok_or_else(|| ApiError::validation("Ticket ID is required"))?;
    let row = lifecycle::scan_ticket(&state, &input, &principal).await?;

    Ok(Json(TicketResponse {
        message: "Ticket scanned successfully".to_string(),
        ticket: Ticket::from(row),
    }))
}
