use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Principal role. Stored lower-case in the database and in JWT claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Host,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Host => "host",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "host" => Ok(Self::Host),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Ticket lifecycle. `Used` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Pending,
    Active,
    Used,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Active => "Active",
            Self::Used => "Used",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Used)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Active" => Ok(Self::Active),
            "Used" => Ok(Self::Used),
            other => Err(format!("unknown ticket status '{}'", other)),
        }
    }
}

/// Public view of a user. The password hash never leaves the db crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}

/// Owner summary joined onto event projections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
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
    pub host: HostSummary,
    pub created_at: DateTime<Utc>,
}

/// Event fields joined onto ticket projections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: Uuid,
    pub title: String,
    pub date_time: DateTime<Utc>,
    pub venue: String,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub event: EventSummary,
    pub user: UserSummary,
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
}

/// Append-only scan audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanLog {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub scanned_by: Uuid,
    pub scanned_by_username: String,
    pub scanned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Host".parse::<Role>().unwrap(), Role::Host);
        assert_eq!(" admin ".parse::<Role>().unwrap(), Role::Admin);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn ticket_status_wire_format() {
        let json = serde_json::to_string(&TicketStatus::Used).unwrap();
        assert_eq!(json, "\"Used\"");
        assert!(TicketStatus::Used.is_terminal());
        assert!(!TicketStatus::Pending.is_terminal());
        assert_eq!("Active".parse::<TicketStatus>().unwrap(), TicketStatus::Active);
    }
}
