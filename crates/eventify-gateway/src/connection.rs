use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use eventify_db::Database;
use eventify_types::api::Claims;
use eventify_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Watched = Arc<RwLock<HashSet<Uuid>>>;

/// Handle one observer connection: identify with a JWT, receive Ready, then
/// stream ticket events until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let Some(user_id) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    // Tokens outlive blocks and deletions, so the account is checked again.
    let user = match tokio::task::spawn_blocking(move || db.get_user_by_id(user_id)).await {
        Ok(Ok(Some(user))) if !user.is_blocked => user,
        Ok(Ok(_)) => {
            warn!("Gateway identify rejected for {}", user_id);
            return;
        }
        Ok(Err(e)) => {
            warn!("Gateway user lookup failed: {}", e);
            return;
        }
        Err(e) => {
            warn!("Gateway user lookup panicked: {}", e);
            return;
        }
    };

    info!("{} ({}) connected to gateway", user.username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: user.username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, user_id, user.username).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    user_id: Uuid,
    username: String,
) {
    let conn_id = dispatcher.register(user_id).await;
    let mut broadcast_rx = dispatcher.subscribe();

    let watched: Watched = Arc::new(RwLock::new(HashSet::new()));
    let send_watched = watched.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let forward = match send_watched.read() {
                        Ok(filter) => should_forward(&event, &filter),
                        Err(_) => true,
                    };
                    if !forward {
                        continue;
                    }

                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(user_id, &username_recv, cmd, &watched),
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

fn handle_command(user_id: Uuid, username: &str, cmd: GatewayCommand, watched: &Watched) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Watch { event_ids } => {
            info!("{} ({}) watching {} events", username, user_id, event_ids.len());
            if let Ok(mut filter) = watched.write() {
                *filter = event_ids.into_iter().collect();
            }
        }
    }
}

/// An empty watch list forwards everything.
fn should_forward(event: &GatewayEvent, watched: &HashSet<Uuid>) -> bool {
    if watched.is_empty() {
        return true;
    }
    match event.event_id() {
        Some(event_id) => watched.contains(&event_id),
        None => true,
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Uuid> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims.sub);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanned(event_id: Uuid) -> GatewayEvent {
        GatewayEvent::TicketScanned {
            ticket_id: Uuid::new_v4(),
            event_id,
            scanned_by: Uuid::new_v4(),
            scanned_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn empty_watch_list_forwards_all() {
        assert!(should_forward(&scanned(Uuid::new_v4()), &HashSet::new()));
    }

    #[test]
    fn watch_list_filters_other_events() {
        let watched_event = Uuid::new_v4();
        let filter: HashSet<Uuid> = [watched_event].into_iter().collect();

        assert!(should_forward(&scanned(watched_event), &filter));
        assert!(!should_forward(&scanned(Uuid::new_v4()), &filter));
    }

    #[test]
    fn watch_command_replaces_filter() {
        let watched: Watched = Arc::new(RwLock::new(HashSet::new()));
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        handle_command(
            Uuid::new_v4(),
            "door",
            GatewayCommand::Watch { event_ids: ids.clone() },
            &watched,
        );
        assert_eq!(watched.read().unwrap().len(), 2);

        handle_command(
            Uuid::new_v4(),
            "door",
            GatewayCommand::Watch { event_ids: Vec::new() },
            &watched,
        );
        assert!(watched.read().unwrap().is_empty());
    }
}
