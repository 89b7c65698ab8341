use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        // Users, events and tickets reference each other by id without foreign
        // keys: tickets outlive deleted events and users as historical records.
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL CHECK (role IN ('user', 'host', 'admin')),
                is_blocked  INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE events (
                id            TEXT PRIMARY KEY,
                title         TEXT NOT NULL,
                description   TEXT NOT NULL DEFAULT '',
                date_time     TEXT NOT NULL,
                venue         TEXT NOT NULL DEFAULT '',
                location      TEXT NOT NULL,
                price         REAL NOT NULL DEFAULT 0,
                ticket_limit  INTEGER NOT NULL DEFAULT 0,
                ticket_count  INTEGER NOT NULL DEFAULT 0,
                coordinates   TEXT NOT NULL DEFAULT '[]',
                category      TEXT NOT NULL DEFAULT 'General',
                banner        TEXT NOT NULL DEFAULT '',
                banner_id     TEXT NOT NULL DEFAULT '',
                host_id       TEXT NOT NULL,
                created_at    TEXT NOT NULL
            );

            CREATE INDEX idx_events_host ON events(host_id);

            CREATE TABLE tickets (
                id              TEXT PRIMARY KEY,
                event_id        TEXT NOT NULL,
                user_id         TEXT NOT NULL,
                qr_code_data    TEXT NOT NULL,
                qr_code_string  TEXT NOT NULL UNIQUE,
                is_scanned      INTEGER NOT NULL DEFAULT 0,
                seat_number     TEXT NOT NULL DEFAULT 'N/A',
                status          TEXT NOT NULL DEFAULT 'Pending'
                                CHECK (status IN ('Pending', 'Active', 'Used')),
                payment_ref     TEXT,
                event_date      TEXT,
                quantity        INTEGER NOT NULL DEFAULT 1,
                price           REAL NOT NULL DEFAULT 0,
                attendee_name   TEXT,
                notes           TEXT,
                scanned_at      TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_tickets_event ON tickets(event_id);
            CREATE INDEX idx_tickets_user ON tickets(user_id, created_at);
            CREATE UNIQUE INDEX idx_tickets_payment_ref
                ON tickets(payment_ref) WHERE payment_ref IS NOT NULL;

            CREATE TABLE scan_logs (
                id          TEXT PRIMARY KEY,
                ticket_id   TEXT NOT NULL,
                scanned_by  TEXT NOT NULL,
                scanned_at  TEXT NOT NULL
            );

            CREATE INDEX idx_scan_logs_ticket ON scan_logs(ticket_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
