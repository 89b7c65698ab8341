//! Ticket issuance and scan validation, shared by direct purchase, the
//! payment bridge and both scan routes.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use eventify_db::{IssueOutcome, NewTicket, ScanOutcome, TicketRow};
use eventify_types::events::GatewayEvent;
use eventify_types::models::TicketStatus;

use crate::error::{ApiError, ApiResult};
use crate::middleware::Principal;
use crate::notify::{TicketNotice, qr};
use crate::state::AppStateInner;

pub const MAX_QUANTITY: i64 = 20;

#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub quantity: i64,
    /// Settled payment this ticket is bought with. Issuance is idempotent per
    /// reference, and such tickets start `Pending` until their email is out.
    pub payment_ref: Option<String>,
}

/// Whether a call minted a new ticket or found the one already issued for
/// the same payment reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issuance {
    Created,
    AlreadyIssued,
}

/// Opaque scan token: event, purchaser and time for humans, 128 random bits
/// for uniqueness. Never parses as a UUID.
pub fn generate_scan_token(event_id: Uuid, user_id: Uuid) -> String {
    let nonce: [u8; 16] = rand::random();
    format!(
        "TKT-{}-{}-{}-{}",
        event_id.simple(),
        user_id.simple(),
        Utc::now().timestamp_millis(),
        hex::encode(nonce)
    )
}

pub async fn issue_ticket(
    state: &AppStateInner,
    req: IssueRequest,
) -> ApiResult<(TicketRow, Issuance)> {
    if req.quantity < 1 || req.quantity > MAX_QUANTITY {
        return Err(ApiError::validation(format!(
            "Quantity must be between 1 and {}",
            MAX_QUANTITY
        )));
    }

    let user_id = req.user_id;
    if state.db(move |db| db.get_user_by_id(user_id)).await?.is_none() {
        return Err(ApiError::not_found("User"));
    }

    let scan_token = generate_scan_token(req.event_id, req.user_id);
    let qr_code_data = {
        let token = scan_token.clone();
        tokio::task::spawn_blocking(move || qr::render_data_url(&token)).await??
    };

    let ticket = NewTicket {
        id: Uuid::new_v4(),
        event_id: req.event_id,
        user_id: req.user_id,
        qr_code_data,
        qr_code_string: scan_token,
        status: if req.payment_ref.is_some() {
            TicketStatus::Pending
        } else {
            TicketStatus::Active
        },
        payment_ref: req.payment_ref,
        quantity: req.quantity,
    };

    match state.db(move |db| db.issue_ticket(&ticket)).await? {
        IssueOutcome::Issued(row) => {
            info!(
                "Issued ticket {} ({} x) for event {} to {}",
                row.id, row.quantity, row.event_id, row.user_id
            );
            state.dispatcher.broadcast(GatewayEvent::TicketPurchased {
                ticket_id: row.id,
                event_id: row.event_id,
                user_id: row.user_id,
                quantity: row.quantity,
            });
            state.notifier.enqueue(TicketNotice::for_ticket(&row));
            Ok((row, Issuance::Created))
        }
        IssueOutcome::Duplicate(row) => {
            info!(
                "Payment {} already issued ticket {}",
                row.payment_ref.as_deref().unwrap_or_default(),
                row.id
            );
            Ok((row, Issuance::AlreadyIssued))
        }
        IssueOutcome::EventNotFound => Err(ApiError::not_found("Event")),
        IssueOutcome::SoldOut { remaining } => Err(ApiError::Capacity(if remaining > 0 {
            format!("Only {} tickets left", remaining)
        } else {
            "Tickets sold out".to_string()
        })),
    }
}

/// Validate a ticket at the door. `input` is the ticket id or the raw text
/// read from its QR code. A ticket is accepted at most once; every later
/// attempt gets the same rejection.
pub async fn scan_ticket(
    state: &AppStateInner,
    input: &str,
    scanner: &Principal,
) -> ApiResult<TicketRow> {
    let input = input.trim().to_string();
    if input.is_empty() {
        return Err(ApiError::validation("Ticket ID is required"));
    }

    let scanner_id = scanner.id;
    let outcome = state
        .db(move |db| {
            let Some(ticket) = db.resolve_ticket(&input)? else {
                return Ok(ScanOutcome::NotFound);
            };
            db.mark_scanned(ticket.id, scanner_id, Utc::now())
        })
        .await?;

    match outcome {
        ScanOutcome::Scanned(row) => {
            let scanned_at = row.scanned_at.unwrap_or_else(Utc::now);
            info!("Ticket {} scanned by {} ({})", row.id, scanner.username, scanner.id);
            state.dispatcher.broadcast(GatewayEvent::TicketScanned {
                ticket_id: row.id,
                event_id: row.event_id,
                scanned_by: scanner.id,
                scanned_at,
            });
            Ok(row)
        }
        ScanOutcome::AlreadyScanned(row) => {
            info!("Ticket {} already scanned", row.id);
            Err(ApiError::AlreadyScanned("Ticket already scanned".to_string()))
        }
        ScanOutcome::NotFound => Err(ApiError::not_found("Ticket")),
    }
}
