use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, Row, params};
use uuid::Uuid;

use eventify_types::models::Role;

use crate::Database;
use crate::models::{
    EventPatch, EventRow, NewEvent, UserRow, fmt_ts, get_coordinates, get_role, get_ts, get_uuid,
};

const USER_COLUMNS: &str = "id, username, email, password, role, is_blocked, created_at";

pub(crate) const EVENT_SELECT: &str = "SELECT e.id, e.title, e.description, e.date_time, e.venue, e.location,
            e.price, e.ticket_limit, e.ticket_count, e.coordinates, e.category, e.banner,
            e.banner_id, e.host_id, u.username, u.email, e.created_at
     FROM events e
     LEFT JOIN users u ON u.id = e.host_id";

impl Database {
    // -- Users --

    /// Insert a user. Returns `false` if the email is already registered.
    pub fn create_user(
        &self,
        id: Uuid,
        username: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, email, password, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.to_string(),
                    username,
                    email,
                    password_hash,
                    role.as_str(),
                    fmt_ts(&Utc::now())
                ],
            );
            match inserted {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
                [email],
                map_user,
            )
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users ORDER BY created_at DESC",
                USER_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Change role and/or blocked flag. Returns the updated user, or `None`
    /// if no such user exists.
    pub fn update_user(
        &self,
        id: Uuid,
        role: Option<Role>,
        is_blocked: Option<bool>,
    ) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users
                 SET role = COALESCE(?2, role), is_blocked = COALESCE(?3, is_blocked)
                 WHERE id = ?1",
                params![id.to_string(), role.map(|r| r.as_str()), is_blocked],
            )?;
            query_user_by_id(conn, id)
        })
    }

    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM users WHERE id = ?1", [id.to_string()])?;
            Ok(deleted > 0)
        })
    }

    // -- Events --

    pub fn insert_event(&self, event: &NewEvent) -> Result<EventRow> {
        let coordinates = serde_json::to_string(&event.coordinates)?;
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO events (id, title, description, date_time, venue, location, price,
                                     ticket_limit, ticket_count, coordinates, category, banner,
                                     banner_id, host_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    event.id.to_string(),
                    event.title,
                    event.description,
                    fmt_ts(&event.date_time),
                    event.venue,
                    event.location,
                    event.price,
                    event.ticket_limit,
                    coordinates,
                    event.category,
                    event.banner,
                    event.banner_id,
                    event.host_id.to_string(),
                    fmt_ts(&Utc::now()),
                ],
            )?;
            query_event(conn, event.id)?
                .ok_or_else(|| anyhow::anyhow!("Event {} vanished after insert", event.id))
        })
    }

    pub fn get_event(&self, id: Uuid) -> Result<Option<EventRow>> {
        self.with_conn(|conn| query_event(conn, id))
    }

    pub fn list_events(&self) -> Result<Vec<EventRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{} ORDER BY e.date_time ASC", EVENT_SELECT))?;
            let rows = stmt
                .query_map([], map_event)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_events_by_host(&self, host_id: Uuid) -> Result<Vec<EventRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE e.host_id = ?1 ORDER BY e.date_time ASC",
                EVENT_SELECT
            ))?;
            let rows = stmt
                .query_map([host_id.to_string()], map_event)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Host events starting after `now`, soonest first.
    pub fn upcoming_events_by_host(
        &self,
        host_id: Uuid,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<EventRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE e.host_id = ?1 AND e.date_time > ?2 ORDER BY e.date_time ASC LIMIT ?3",
                EVENT_SELECT
            ))?;
            let rows = stmt
                .query_map(params![host_id.to_string(), fmt_ts(&now), limit], map_event)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Apply a partial update in one statement. Returns `None` if the event
    /// does not exist.
    pub fn update_event(&self, id: Uuid, patch: &EventPatch) -> Result<Option<EventRow>> {
        let coordinates = patch
            .coordinates
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE events SET
                    title        = COALESCE(?2, title),
                    description  = COALESCE(?3, description),
                    date_time    = COALESCE(?4, date_time),
                    venue        = COALESCE(?5, venue),
                    location     = COALESCE(?6, location),
                    price        = COALESCE(?7, price),
                    ticket_limit = COALESCE(?8, ticket_limit),
                    coordinates  = COALESCE(?9, coordinates),
                    category     = COALESCE(?10, category),
                    banner       = COALESCE(?11, banner),
                    banner_id    = COALESCE(?12, banner_id)
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    patch.title,
                    patch.description,
                    patch.date_time.as_ref().map(fmt_ts),
                    patch.venue,
                    patch.location,
                    patch.price,
                    patch.ticket_limit,
                    coordinates,
                    patch.category,
                    patch.banner,
                    patch.banner_id,
                ],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_event(conn, id)
        })
    }

    /// Delete an event and return the removed row so the caller can release
    /// its banner asset. Tickets are left in place.
    pub fn delete_event(&self, id: Uuid) -> Result<Option<EventRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let existing = query_event(&tx, id)?;
            if existing.is_some() {
                tx.execute("DELETE FROM events WHERE id = ?1", [id.to_string()])?;
            }
            tx.commit()?;
            Ok(existing)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: Uuid) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [id.to_string()],
        map_user,
    )
    .optional()
}

pub(crate) fn query_event(conn: &Connection, id: Uuid) -> Result<Option<EventRow>> {
    conn.query_row(&format!("{} WHERE e.id = ?1", EVENT_SELECT), [id.to_string()], map_event)
        .optional()
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: get_uuid(row, 0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        role: get_role(row, 4)?,
        is_blocked: row.get(5)?,
        created_at: get_ts(row, 6)?,
    })
}

pub(crate) fn map_event(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: get_uuid(row, 0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        date_time: get_ts(row, 3)?,
        venue: row.get(4)?,
        location: row.get(5)?,
        price: row.get(6)?,
        ticket_limit: row.get(7)?,
        ticket_count: row.get(8)?,
        coordinates: get_coordinates(row, 9)?,
        category: row.get(10)?,
        banner: row.get(11)?,
        banner_id: row.get(12)?,
        host_id: get_uuid(row, 13)?,
        // Host may have been deleted by an admin.
        host_username: row.get::<_, Option<String>>(14)?.unwrap_or_else(|| "unknown".to_string()),
        host_email: row.get::<_, Option<String>>(15)?.unwrap_or_default(),
        created_at: get_ts(row, 16)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
