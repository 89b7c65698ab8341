//! Capability table: which roles may perform which operation. Handlers ask
//! once per request instead of comparing role strings inline.

use uuid::Uuid;

use eventify_types::models::Role;

use crate::error::{ApiError, ApiResult};
use crate::middleware::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ViewProfile,
    ManageEvents,
    PurchaseTicket,
    ListOwnTickets,
    ViewTicket,
    EditTicket,
    ScanTicket,
    Pay,
    Administer,
    ViewEventStats,
    ViewHostDashboard,
}

impl Operation {
    pub fn allowed_roles(self) -> &'static [Role] {
        use Role::*;
        match self {
            Self::ViewProfile | Self::ViewTicket | Self::Pay => &[User, Host, Admin],
            Self::ManageEvents | Self::ScanTicket | Self::ViewEventStats => &[Host, Admin],
            Self::PurchaseTicket | Self::ListOwnTickets => &[User],
            Self::EditTicket => &[User, Admin],
            Self::Administer => &[Admin],
            Self::ViewHostDashboard => &[Host],
        }
    }
}

pub fn authorize(op: Operation, principal: &Principal) -> ApiResult<()> {
    if op.allowed_roles().contains(&principal.role) {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}

/// Owner of the resource, or an admin.
pub fn require_owner_or_admin(principal: &Principal, owner_id: Uuid) -> ApiResult<()> {
    if principal.id == owner_id || principal.role == Role::Admin {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}

/// Ticket reads are open to the purchaser and to door staff.
pub fn can_view_ticket(principal: &Principal, ticket_owner: Uuid) -> ApiResult<()> {
    if principal.id == ticket_owner || matches!(principal.role, Role::Host | Role::Admin) {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}
