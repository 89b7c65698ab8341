use anyhow::Result;
use rusqlite::params;
use uuid::Uuid;

use crate::Database;
use crate::models::{EventStatsRow, RecentEventRow, RecentTicketRow, get_ts, get_uuid};

/// Platform-wide counters for the admin dashboard.
pub struct PlatformTotals {
    pub users: i64,
    pub events: i64,
    pub tickets: i64,
    pub revenue: f64,
}

/// Aggregates over one host's events.
pub struct HostTotals {
    pub events: i64,
    pub tickets: i64,
    pub revenue: f64,
}

impl Database {
    pub fn platform_totals(&self) -> Result<PlatformTotals> {
        self.with_conn(|conn| {
            let totals = conn.query_row(
                "SELECT (SELECT COUNT(*) FROM users),
                        (SELECT COUNT(*) FROM events),
                        (SELECT COUNT(*) FROM tickets),
                        (SELECT COALESCE(SUM(price), 0.0) FROM tickets)",
                [],
                |row| {
                    Ok(PlatformTotals {
                        users: row.get(0)?,
                        events: row.get(1)?,
                        tickets: row.get(2)?,
                        revenue: row.get(3)?,
                    })
                },
            )?;
            Ok(totals)
        })
    }

    /// Per-event sold/scanned counts, optionally restricted to one host.
    /// Sold counts come from the event's running counter; scanned counts are
    /// derived from tickets that reached `Used`.
    pub fn event_stats(&self, host_id: Option<Uuid>) -> Result<Vec<EventStatsRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.id, e.title, e.ticket_count,
                        (SELECT COUNT(*) FROM tickets t
                          WHERE t.event_id = e.id AND t.status = 'Used')
                 FROM events e
                 WHERE ?1 IS NULL OR e.host_id = ?1
                 ORDER BY e.date_time ASC",
            )?;
            let rows = stmt
                .query_map([host_id.map(|id| id.to_string())], |row| {
                    Ok(EventStatsRow {
                        event_id: get_uuid(row, 0)?,
                        title: row.get(1)?,
                        tickets_sold: row.get(2)?,
                        tickets_scanned: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn recent_tickets(&self, limit: u32) -> Result<Vec<RecentTicketRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.username, e.title, t.quantity, t.created_at
                 FROM tickets t
                 LEFT JOIN users u ON u.id = t.user_id
                 LEFT JOIN events e ON e.id = t.event_id
                 ORDER BY t.created_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(RecentTicketRow {
                        username: row.get(0)?,
                        event_title: row.get(1)?,
                        quantity: row.get(2)?,
                        created_at: get_ts(row, 3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn recent_events(&self, limit: u32) -> Result<Vec<RecentEventRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.title, u.username, e.created_at
                 FROM events e
                 LEFT JOIN users u ON u.id = e.host_id
                 ORDER BY e.created_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(RecentEventRow {
                        title: row.get(0)?,
                        host_username: row.get(1)?,
                        created_at: get_ts(row, 2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn host_totals(&self, host_id: Uuid) -> Result<HostTotals> {
        self.with_conn(|conn| {
            let totals = conn.query_row(
                "SELECT (SELECT COUNT(*) FROM events WHERE host_id = ?1),
                        COUNT(t.id),
                        COALESCE(SUM(t.price), 0.0)
                 FROM tickets t
                 JOIN events e ON e.id = t.event_id
                 WHERE e.host_id = ?1",
                params![host_id.to_string()],
                |row| {
                    Ok(HostTotals {
                        events: row.get(0)?,
                        tickets: row.get(1)?,
                        revenue: row.get(2)?,
                    })
                },
            )?;
            Ok(totals)
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use eventify_types::models::{Role, TicketStatus};

    use super::*;
    use crate::models::{IssueOutcome, NewTicket};
    use crate::test_support::sample_event;

    fn issue(db: &Database, event_id: Uuid, user_id: Uuid, quantity: i64) -> Uuid {
        let id = Uuid::new_v4();
        let outcome = db
            .issue_ticket(&NewTicket {
                id,
                event_id,
                user_id,
                qr_code_data: String::new(),
                qr_code_string: format!("TKT-{}", id.simple()),
                status: TicketStatus::Active,
                payment_ref: None,
                quantity,
            })
            .unwrap();
        assert!(matches!(outcome, IssueOutcome::Issued(_)));
        id
    }

    #[test]
    fn totals_sum_ticket_prices() {
        let db = Database::open_in_memory().unwrap();
        let host = Uuid::new_v4();
        let fan = Uuid::new_v4();
        db.create_user(host, "host", "h@x.io", "h", Role::Host).unwrap();
        db.create_user(fan, "fan", "f@x.io", "h", Role::User).unwrap();
        let event = db.insert_event(&sample_event(host, 0)).unwrap();
        issue(&db, event.id, fan, 2);
        issue(&db, event.id, fan, 1);

        let totals = db.platform_totals().unwrap();
        assert_eq!(totals.users, 2);
        assert_eq!(totals.events, 1);
        assert_eq!(totals.tickets, 2);
        assert_eq!(totals.revenue, 300.0);

        let host_totals = db.host_totals(host).unwrap();
        assert_eq!(host_totals.events, 1);
        assert_eq!(host_totals.revenue, 300.0);

        let empty = db.host_totals(Uuid::new_v4()).unwrap();
        assert_eq!(empty.events, 0);
        assert_eq!(empty.revenue, 0.0);
    }

    #[test]
    fn event_stats_count_scans_and_filter_by_host() {
        let db = Database::open_in_memory().unwrap();
        let host = Uuid::new_v4();
        let other = Uuid::new_v4();
        let fan = Uuid::new_v4();
        let mine = db.insert_event(&sample_event(host, 0)).unwrap();
        db.insert_event(&sample_event(other, 0)).unwrap();

        let ticket = issue(&db, mine.id, fan, 1);
        issue(&db, mine.id, fan, 1);
        db.mark_scanned(ticket, host, Utc::now()).unwrap();

        let all = db.event_stats(None).unwrap();
        assert_eq!(all.len(), 2);

        let stats = db.event_stats(Some(host)).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].tickets_sold, 2);
        assert_eq!(stats[0].tickets_scanned, 1);
    }

    #[test]
    fn recent_activity_is_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let host = Uuid::new_v4();
        db.create_user(host, "host", "h@x.io", "h", Role::Host).unwrap();
        let first = db.insert_event(&sample_event(host, 0)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut second = sample_event(host, 0);
        second.title = "Later".to_string();
        db.insert_event(&second).unwrap();
        issue(&db, first.id, Uuid::new_v4(), 1);

        let events = db.recent_events(5).unwrap();
        assert_eq!(events[0].title, "Later");
        assert_eq!(events[0].host_username.as_deref(), Some("host"));

        let tickets = db.recent_tickets(5).unwrap();
        assert_eq!(tickets.len(), 1);
        assert!(tickets[0].username.is_none());
        assert_eq!(tickets[0].event_title.as_deref(), Some("Rust Meetup"));
    }
}
