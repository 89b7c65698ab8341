use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use eventify_types::events::GatewayEvent;

/// Fans ticket lifecycle events out to every connected observer.
///
/// Delivery is best effort: a send with no subscribers is dropped, and a slow
/// observer that lags behind the channel simply misses events.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Live connections: conn_id -> user_id
    observers: RwLock<HashMap<Uuid, Uuid>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                observers: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Track a new observer connection. Returns its connection id.
    pub async fn register(&self, user_id: Uuid) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner.observers.write().await.insert(conn_id, user_id);
        conn_id
    }

    pub async fn unregister(&self, conn_id: Uuid) {
        self.inner.observers.write().await.remove(&conn_id);
    }

    pub async fn observer_count(&self) -> usize {
        self.inner.observers.read().await.len()
    }
}
