use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, TransactionBehavior, params};
use uuid::Uuid;

use crate::Database;
use crate::models::{
    IssueOutcome, NewTicket, ScanLogRow, ScanOutcome, TicketPatch, TicketRow, fmt_ts, get_opt_ts,
    get_status, get_ts, get_uuid,
};
use crate::queries::OptionalExt;

const TICKET_SELECT: &str = "SELECT t.id, t.event_id, t.user_id, t.qr_code_data, t.qr_code_string,
            t.is_scanned, t.seat_number, t.status, t.payment_ref, t.quantity, t.price,
            t.attendee_name, t.notes, t.scanned_at, t.created_at,
            e.title, COALESCE(e.date_time, t.event_date), e.venue, e.location,
            u.username, u.email
     FROM tickets t
     LEFT JOIN events e ON e.id = t.event_id
     LEFT JOIN users u ON u.id = t.user_id";

impl Database {
    /// Mint a ticket in one transaction:
    ///
    /// 1. If the ticket carries a payment reference that was already used,
    ///    return the existing ticket untouched.
    /// 2. Increment the event's running count only if capacity allows
    ///    (`ticket_limit = 0` means unlimited).
    /// 3. Insert the ticket priced from the stored event.
    ///
    /// The capacity check and the increment are a single conditional UPDATE,
    /// so concurrent issuance can never push `ticket_count` past the limit.
    pub fn issue_ticket(&self, ticket: &NewTicket) -> Result<IssueOutcome> {
        if ticket.quantity < 1 {
            return Err(anyhow!("Ticket quantity must be positive, got {}", ticket.quantity));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if let Some(payment_ref) = &ticket.payment_ref {
                if let Some(existing) = query_ticket_by_payment_ref(&tx, payment_ref)? {
                    return Ok(IssueOutcome::Duplicate(existing));
                }
            }

            let event_id = ticket.event_id.to_string();
            let claimed = tx.execute(
                "UPDATE events SET ticket_count = ticket_count + ?2
                 WHERE id = ?1 AND (ticket_limit <= 0 OR ticket_count + ?2 <= ticket_limit)",
                params![event_id, ticket.quantity],
            )?;

            if claimed == 0 {
                let capacity: Option<(i64, i64)> = tx
                    .query_row(
                        "SELECT ticket_limit, ticket_count FROM events WHERE id = ?1",
                        [&event_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                return Ok(match capacity {
                    None => IssueOutcome::EventNotFound,
                    Some((limit, count)) => IssueOutcome::SoldOut {
                        remaining: (limit - count).max(0),
                    },
                });
            }

            let (unit_price, event_date, sold): (f64, String, i64) = tx.query_row(
                "SELECT price, date_time, ticket_count FROM events WHERE id = ?1",
                [&event_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            let first_seat = sold - ticket.quantity + 1;
            let seat_number = if ticket.quantity == 1 {
                format!("Seat-{}", sold)
            } else {
                format!("Seat-{}-{}", first_seat, sold)
            };

            tx.execute(
                "INSERT INTO tickets (id, event_id, user_id, qr_code_data, qr_code_string,
                                      seat_number, status, payment_ref, event_date, quantity,
                                      price, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    ticket.id.to_string(),
                    event_id,
                    ticket.user_id.to_string(),
                    ticket.qr_code_data,
                    ticket.qr_code_string,
                    seat_number,
                    ticket.status.as_str(),
                    ticket.payment_ref,
                    event_date,
                    ticket.quantity,
                    unit_price * ticket.quantity as f64,
                    fmt_ts(&Utc::now()),
                ],
            )?;

            let row = query_ticket(&tx, ticket.id)?
                .ok_or_else(|| anyhow!("Ticket {} vanished after insert", ticket.id))?;
            tx.commit()?;
            Ok(IssueOutcome::Issued(row))
        })
    }

    /// Flip a ticket to `Used` at most once and append the scan log in the
    /// same transaction. A ticket already in `Used` is reported back
    /// unchanged, including its original `scanned_at`.
    pub fn mark_scanned(
        &self,
        ticket_id: Uuid,
        scanned_by: Uuid,
        scanned_at: DateTime<Utc>,
    ) -> Result<ScanOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id = ticket_id.to_string();

            let flipped = tx.execute(
                "UPDATE tickets SET is_scanned = 1, status = 'Used', scanned_at = ?2
                 WHERE id = ?1 AND status != 'Used' AND is_scanned = 0",
                params![id, fmt_ts(&scanned_at)],
            )?;

            if flipped == 0 {
                return Ok(match query_ticket(&tx, ticket_id)? {
                    Some(row) => ScanOutcome::AlreadyScanned(row),
                    None => ScanOutcome::NotFound,
                });
            }

            tx.execute(
                "INSERT INTO scan_logs (id, ticket_id, scanned_by, scanned_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    id,
                    scanned_by.to_string(),
                    fmt_ts(&scanned_at)
                ],
            )?;

            let row = query_ticket(&tx, ticket_id)?
                .ok_or_else(|| anyhow!("Ticket {} vanished during scan", ticket_id))?;
            tx.commit()?;
            Ok(ScanOutcome::Scanned(row))
        })
    }

    /// `Pending` -> `Active`. Never touches a `Used` ticket.
    pub fn activate_ticket(&self, ticket_id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE tickets SET status = 'Active' WHERE id = ?1 AND status = 'Pending'",
                [ticket_id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_ticket(&self, id: Uuid) -> Result<Option<TicketRow>> {
        self.with_conn(|conn| query_ticket(conn, id))
    }

    pub fn get_ticket_by_scan_token(&self, token: &str) -> Result<Option<TicketRow>> {
        self.with_conn(|conn| query_ticket_by_token(conn, token))
    }

    /// Look a ticket up by internal id, falling back to its scan token.
    /// Scan tokens never parse as ids, so the two paths cannot collide.
    pub fn resolve_ticket(&self, input: &str) -> Result<Option<TicketRow>> {
        self.with_conn(|conn| {
            if let Ok(id) = input.parse::<Uuid>() {
                if let Some(row) = query_ticket(conn, id)? {
                    return Ok(Some(row));
                }
            }
            query_ticket_by_token(conn, input)
        })
    }

    pub fn get_ticket_by_payment_ref(&self, payment_ref: &str) -> Result<Option<TicketRow>> {
        self.with_conn(|conn| query_ticket_by_payment_ref(conn, payment_ref))
    }

    pub fn list_tickets_by_user(&self, user_id: Uuid) -> Result<Vec<TicketRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE t.user_id = ?1 ORDER BY t.created_at DESC",
                TICKET_SELECT
            ))?;
            let rows = stmt
                .query_map([user_id.to_string()], map_ticket)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_all_tickets(&self) -> Result<Vec<TicketRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} ORDER BY t.created_at DESC", TICKET_SELECT))?;
            let rows = stmt
                .query_map([], map_ticket)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_ticket_metadata(
        &self,
        id: Uuid,
        patch: &TicketPatch,
    ) -> Result<Option<TicketRow>> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE tickets SET
                    attendee_name = COALESCE(?2, attendee_name),
                    notes         = COALESCE(?3, notes),
                    seat_number   = COALESCE(?4, seat_number)
                 WHERE id = ?1",
                params![id.to_string(), patch.attendee_name, patch.notes, patch.seat_number],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_ticket(conn, id)
        })
    }

    pub fn delete_ticket(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM tickets WHERE id = ?1", [id.to_string()])?;
            Ok(deleted > 0)
        })
    }

    // -- Scan logs --

    pub fn list_scan_logs(&self, limit: u32) -> Result<Vec<ScanLogRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.ticket_id, s.scanned_by, u.username, s.scanned_at
                 FROM scan_logs s
                 LEFT JOIN users u ON u.id = s.scanned_by
                 ORDER BY s.scanned_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(ScanLogRow {
                        id: get_uuid(row, 0)?,
                        ticket_id: get_uuid(row, 1)?,
                        scanned_by: get_uuid(row, 2)?,
                        scanned_by_username: row
                            .get::<_, Option<String>>(3)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        scanned_at: get_ts(row, 4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_ticket(conn: &Connection, id: Uuid) -> Result<Option<TicketRow>> {
    conn.query_row(&format!("{} WHERE t.id = ?1", TICKET_SELECT), [id.to_string()], map_ticket)
        .optional()
}

fn query_ticket_by_token(conn: &Connection, token: &str) -> Result<Option<TicketRow>> {
    conn.query_row(
        &format!("{} WHERE t.qr_code_string = ?1", TICKET_SELECT),
        [token],
        map_ticket,
    )
    .optional()
}

fn query_ticket_by_payment_ref(conn: &Connection, payment_ref: &str) -> Result<Option<TicketRow>> {
    conn.query_row(
        &format!("{} WHERE t.payment_ref = ?1", TICKET_SELECT),
        [payment_ref],
        map_ticket,
    )
    .optional()
}

fn map_ticket(row: &Row<'_>) -> rusqlite::Result<TicketRow> {
    let created_at = get_ts(row, 14)?;
    Ok(TicketRow {
        id: get_uuid(row, 0)?,
        event_id: get_uuid(row, 1)?,
        user_id: get_uuid(row, 2)?,
        qr_code_data: row.get(3)?,
        qr_code_string: row.get(4)?,
        is_scanned: row.get(5)?,
        seat_number: row.get(6)?,
        status: get_status(row, 7)?,
        payment_ref: row.get(8)?,
        quantity: row.get(9)?,
        price: row.get(10)?,
        attendee_name: row.get(11)?,
        notes: row.get(12)?,
        scanned_at: get_opt_ts(row, 13)?,
        created_at,
        // Event or purchaser may have been deleted; tickets stay as history.
        event_title: row.get::<_, Option<String>>(15)?.unwrap_or_else(|| "Deleted event".to_string()),
        event_date_time: get_opt_ts(row, 16)?.unwrap_or(created_at),
        event_venue: row.get::<_, Option<String>>(17)?.unwrap_or_default(),
        event_location: row.get::<_, Option<String>>(18)?.unwrap_or_default(),
        user_username: row.get::<_, Option<String>>(19)?.unwrap_or_else(|| "unknown".to_string()),
        user_email: row.get::<_, Option<String>>(20)?.unwrap_or_default(),
    })
}
