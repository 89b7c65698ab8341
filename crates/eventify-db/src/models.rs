//! Database row types. These map directly to SQLite rows and stay distinct
//! from the eventify-types API models to keep the DB layer independent.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use eventify_types::api::EventStats;
use eventify_types::models::{
    Event, EventSummary, HostSummary, Role, ScanLog, Ticket, TicketStatus, User, UserSummary,
};

pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}

pub struct EventRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub date_time: DateTime<Utc>,
    pub venue: String,
    pub location: String,
    pub price: f64,
    pub ticket_limit: i64,
    pub ticket_count: i64,
    pub coordinates: Vec<f64>,
    pub category: String,
    pub banner: String,
    pub banner_id: String,
    pub host_id: Uuid,
    pub host_username: String,
    pub host_email: String,
    pub created_at: DateTime<Utc>,
}

pub struct TicketRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub qr_code_data: String,
    pub qr_code_string: String,
    pub is_scanned: bool,
    pub seat_number: String,
    pub status: TicketStatus,
    pub payment_ref: Option<String>,
    pub quantity: i64,
    pub price: f64,
    pub attendee_name: Option<String>,
    pub notes: Option<String>,
    pub scanned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub event_title: String,
    pub event_date_time: DateTime<Utc>,
    pub event_venue: String,
    pub event_location: String,
    pub user_username: String,
    pub user_email: String,
}

pub struct ScanLogRow {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub scanned_by: Uuid,
    pub scanned_by_username: String,
    pub scanned_at: DateTime<Utc>,
}

pub struct EventStatsRow {
    pub event_id: Uuid,
    pub title: String,
    pub tickets_sold: i64,
    pub tickets_scanned: i64,
}

pub struct RecentTicketRow {
    pub username: Option<String>,
    pub event_title: Option<String>,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

pub struct RecentEventRow {
    pub title: String,
    pub host_username: Option<String>,
    pub created_at: DateTime<Utc>,
}

// -- Write models --

pub struct NewEvent {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub date_time: DateTime<Utc>,
    pub venue: String,
    pub location: String,
    pub price: f64,
    pub ticket_limit: i64,
    pub coordinates: Vec<f64>,
    pub category: String,
    pub banner: String,
    pub banner_id: String,
    pub host_id: Uuid,
}

/// Partial event update. `None` keeps the stored value.
#[derive(Default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date_time: Option<DateTime<Utc>>,
    pub venue: Option<String>,
    pub location: Option<String>,
    pub price: Option<f64>,
    pub ticket_limit: Option<i64>,
    pub coordinates: Option<Vec<f64>>,
    pub category: Option<String>,
    pub banner: Option<String>,
    pub banner_id: Option<String>,
}

pub struct NewTicket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub qr_code_data: String,
    pub qr_code_string: String,
    pub status: TicketStatus,
    /// Idempotency key for payment-backed issuance.
    pub payment_ref: Option<String>,
    pub quantity: i64,
}

/// Non-authoritative ticket fields the owner may edit.
#[derive(Default)]
pub struct TicketPatch {
    pub attendee_name: Option<String>,
    pub notes: Option<String>,
    pub seat_number: Option<String>,
}

/// Result of the atomic check-and-increment issuance.
pub enum IssueOutcome {
    Issued(TicketRow),
    /// A ticket already exists for this payment reference.
    Duplicate(TicketRow),
    EventNotFound,
    SoldOut { remaining: i64 },
}

/// Result of the atomic conditional scan.
pub enum ScanOutcome {
    Scanned(TicketRow),
    AlreadyScanned(TicketRow),
    NotFound,
}

// -- Column helpers --

/// Timestamps are stored as fixed-width RFC 3339 strings so that text order
/// matches chronological order.
pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_err(idx: usize, msg: String) -> rusqlite::Error {
    conversion_err(idx, std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

pub(crate) fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

pub(crate) fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| parse_err(idx, e))
}

pub(crate) fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(&s).map_err(|e| parse_err(idx, e)))
        .transpose()
}

pub(crate) fn get_role(row: &Row<'_>, idx: usize) -> rusqlite::Result<Role> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| parse_err(idx, e))
}

pub(crate) fn get_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<TicketStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| parse_err(idx, e))
}

pub(crate) fn get_coordinates(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<f64>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone. Parse as naive UTC.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| format!("bad timestamp '{}': {}", raw, e))
}

// -- Conversions to API models --

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            role: row.role,
            is_blocked: row.is_blocked,
            created_at: row.created_at,
        }
    }
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            date_time: row.date_time,
            venue: row.venue,
            location: row.location,
            price: row.price,
            ticket_limit: row.ticket_limit,
            ticket_count: row.ticket_count,
            coordinates: row.coordinates,
            category: row.category,
            banner: row.banner,
            banner_id: row.banner_id,
            host: HostSummary {
                id: row.host_id,
                username: row.host_username,
                email: row.host_email,
            },
            created_at: row.created_at,
        }
    }
}

impl From<TicketRow> for Ticket {
    fn from(row: TicketRow) -> Self {
        Self {
            id: row.id,
            event: EventSummary {
                id: row.event_id,
                title: row.event_title,
                date_time: row.event_date_time,
                venue: row.event_venue,
                location: row.event_location,
            },
            user: UserSummary {
                id: row.user_id,
                username: row.user_username,
                email: row.user_email,
            },
            qr_code_data: row.qr_code_data,
            qr_code_string: row.qr_code_string,
            is_scanned: row.is_scanned,
            seat_number: row.seat_number,
            status: row.status,
            payment_ref: row.payment_ref,
            quantity: row.quantity,
            price: row.price,
            attendee_name: row.attendee_name,
            notes: row.notes,
            scanned_at: row.scanned_at,
            created_at: row.created_at,
        }
    }
}

impl From<ScanLogRow> for ScanLog {
    fn from(row: ScanLogRow) -> Self {
        Self {
            id: row.id,
            ticket_id: row.ticket_id,
            scanned_by: row.scanned_by,
            scanned_by_username: row.scanned_by_username,
            scanned_at: row.scanned_at,
        }
    }
}

impl From<EventStatsRow> for EventStats {
    fn from(row: EventStatsRow) -> Self {
        Self {
            event_id: row.event_id,
            title: row.title,
            tickets_sold: row.tickets_sold,
            tickets_scanned: row.tickets_scanned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_timestamps_sort_chronologically() {
        let earlier = DateTime::parse_from_rfc3339("2026-01-01T09:00:00.5Z").unwrap().with_timezone(&Utc);
        let later = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z").unwrap().with_timezone(&Utc);
        assert!(fmt_ts(&earlier) < fmt_ts(&later));
        assert_eq!(parse_ts(&fmt_ts(&earlier)).unwrap(), earlier);
    }

    #[test]
    fn sqlite_default_timestamps_parse() {
        let ts = parse_ts("2026-03-04 05:06:07").unwrap();
        assert_eq!(fmt_ts(&ts), "2026-03-04T05:06:07.000Z");
    }
}
