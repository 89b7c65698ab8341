use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events pushed to live observers over the WebSocket gateway. Advisory
/// only: nothing reads them back to decide ticket state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    #[serde(rename_all = "camelCase")]
    Ready { user_id: Uuid, username: String },

    /// A ticket was minted (direct purchase or settled payment)
    #[serde(rename_all = "camelCase")]
    TicketPurchased {
        ticket_id: Uuid,
        event_id: Uuid,
        user_id: Uuid,
        quantity: i64,
    },

    /// A ticket was validated at the door
    #[serde(rename_all = "camelCase")]
    TicketScanned {
        ticket_id: Uuid,
        event_id: Uuid,
        scanned_by: Uuid,
        scanned_at: chrono::DateTime<chrono::Utc>,
    },
}

impl GatewayEvent {
    /// Returns the event id if this gateway event concerns a single event.
    pub fn event_id(&self) -> Option<Uuid> {
        match self {
            Self::TicketPurchased { event_id, .. } => Some(*event_id),
            Self::TicketScanned { event_id, .. } => Some(*event_id),
            Self::Ready { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Only forward events for these event ids. An empty list means all.
    #[serde(rename_all = "camelCase")]
    Watch { event_ids: Vec<Uuid> },
}
