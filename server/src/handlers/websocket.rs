//! WebSocket handler for delta replication.
//!
//! Each connection is one observer of the authority map. Deltas are pushed
//! by the replication tick; this handler processes what the replica sends
//! back.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ServerMessage};
use crate::AppState;

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection and starts tracking the observer
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Drops the observer's baseline on disconnect
pub async fn handle_websocket_connection(socket: WebSocket, state: AppState, observer_id: String) {
    // Split the socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let Some(conn_id) = state.conn_manager.register(observer_id.clone(), tx) else {
        if let Ok(text) = serde_json::to_string(&ServerMessage::error("observer already connected")) {
            let _ = ws_sender.send(Message::Text(text.into())).await;
        }
        let _ = ws_sender.close().await;
        return;
    };

    if let Err(e) = track_observer(&state, &observer_id).await {
        tracing::error!(observer_id = %observer_id, "Cannot track observer: {}", e);
        state.conn_manager.unregister(&observer_id, &conn_id);
        return;
    }

    tracing::info!(
        conn_id = %conn_id,
        observer_id = %observer_id,
        "WebSocket client connected"
    );

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    // Process incoming messages
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(response) = process_message(&text, &state, &observer_id).await {
                    state.conn_manager.send_to(&observer_id, response);
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    // Clean up
    state.conn_manager.unregister(&observer_id, &conn_id);
    state.map.lock().await.remove_observer(&observer_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        observer_id = %observer_id,
        active_connections = state.conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Start replicating to a freshly connected observer.
///
/// Its replica may still hold contents from an earlier connection, so the
/// first batch it receives is a full resync.
pub(crate) async fn track_observer(
    state: &AppState,
    observer_id: &str,
) -> replimap_engine::Result<()> {
    let mut map = state.map.lock().await;
    map.add_observer(observer_id)?;
    map.resync_observer(observer_id)
}

/// Process a client message. Returns the reply, if any.
pub(crate) async fn process_message(
    text: &str,
    state: &AppState,
    observer_id: &str,
) -> Option<ServerMessage> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return Some(ServerMessage::error(format!(
                "Invalid message format: {}",
                e
            )));
        }
    };

    match client_msg {
        ClientMessage::Ack { version } => {
            let result = state.map.lock().await.acknowledge(observer_id, version);
            match result {
                Ok(advanced) => {
                    tracing::trace!(observer_id = %observer_id, version, advanced, "Acknowledged");
                    None
                }
                Err(e) => Some(ServerMessage::error(e.to_string())),
            }
        }

        ClientMessage::Resync => {
            let result = state.map.lock().await.resync_observer(observer_id);
            match result {
                Ok(()) => {
                    tracing::info!(observer_id = %observer_id, "Observer requested resync");
                    state.conn_manager.clear_last_sent(observer_id);
                    None
                }
                Err(e) => Some(ServerMessage::error(e.to_string())),
            }
        }

        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::replication::replicate_once;
    use crate::websocket::ConnectionManager;
    use replimap_engine::{
        ApplyOutcome, DeltaBatch, MapConfig, RecordKey, RecordValue, ReplicatedMap,
    };
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::Mutex;

    fn test_state() -> AppState {
        let config = Config::from_lookup(|_| None).unwrap();
        AppState {
            map: Arc::new(Mutex::new(ReplicatedMap::authority(MapConfig::default()))),
            config: Arc::new(config),
            conn_manager: ConnectionManager::new_shared(),
        }
    }

    async fn tick(state: &AppState) -> usize {
        let mut map = state.map.lock().await;
        replicate_once(
            &mut map,
            &state.conn_manager,
            Duration::from_secs(60),
            Instant::now(),
        )
    }

    fn next_delta(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> DeltaBatch {
        match rx.try_recv() {
            Ok(ServerMessage::Delta { batch }) => batch,
            other => panic!("expected a delta, got {:?}", other),
        }
    }

    async fn ack_applied(state: &AppState, observer_id: &str, replica: &ReplicatedMap) {
        let ack = format!(
            r#"{{"type":"ack","version":{}}}"#,
            replica.replica_baseline().applied_version()
        );
        assert_eq!(process_message(&ack, state, observer_id).await, None);
    }

    #[tokio::test]
    async fn ping_pong() {
        let state = test_state();
        let reply = process_message(r#"{"type":"ping"}"#, &state, "observer-1").await;
        assert_eq!(reply, Some(ServerMessage::Pong));
    }

    #[tokio::test]
    async fn invalid_message() {
        let state = test_state();
        let reply = process_message("not json", &state, "observer-1").await;
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));
    }

    #[tokio::test]
    async fn ack_from_unknown_observer() {
        let state = test_state();
        let reply = process_message(r#"{"type":"ack","version":3}"#, &state, "ghost").await;
        assert!(matches!(reply, Some(ServerMessage::Error { message }) if message.contains("ghost")));
    }

    #[tokio::test]
    async fn replica_round_trip() {
        let state = test_state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.conn_manager.register("observer-1".into(), tx).unwrap();
        state.map.lock().await.add_observer("observer-1").unwrap();

        let mut replica = ReplicatedMap::replica(MapConfig::default());

        state
            .map
            .lock()
            .await
            .set_data(RecordKey::new("a"), RecordValue::new(1i64))
            .unwrap();

        assert_eq!(tick(&state).await, 1);
        let batch = next_delta(&mut rx);
        replica.apply_delta(&batch).unwrap();

        ack_applied(&state, "observer-1", &replica).await;
        assert_eq!(tick(&state).await, 0);

        // Resync request: the next tick carries a full resync right away
        replica.request_resync().unwrap();
        assert_eq!(
            process_message(r#"{"type":"resync"}"#, &state, "observer-1").await,
            None
        );
        assert_eq!(tick(&state).await, 1);
        let batch = next_delta(&mut rx);
        assert!(batch.full_resync);
        replica.apply_delta(&batch).unwrap();
        assert_eq!(
            replica.get_data(&RecordKey::new("a")),
            Some(&RecordValue::new(1i64))
        );
    }

    #[tokio::test]
    async fn reconnecting_replica_is_resynced() {
        let state = test_state();
        let mut replica = ReplicatedMap::replica(MapConfig::default());
        state
            .map
            .lock()
            .await
            .set_data(RecordKey::new("a"), RecordValue::new(1i64))
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = state.conn_manager.register("observer-1".into(), tx).unwrap();
        track_observer(&state, "observer-1").await.unwrap();

        assert_eq!(tick(&state).await, 1);
        replica.apply_delta(&next_delta(&mut rx)).unwrap();
        ack_applied(&state, "observer-1", &replica).await;
        assert_eq!(tick(&state).await, 0);

        // Drop the connection, then come back with the same contents
        state.conn_manager.unregister("observer-1", &conn_id);
        state.map.lock().await.remove_observer("observer-1");

        let (tx, mut rx) = mpsc::unbounded_channel();
        state.conn_manager.register("observer-1".into(), tx).unwrap();
        track_observer(&state, "observer-1").await.unwrap();

        assert_eq!(tick(&state).await, 1);
        let batch = next_delta(&mut rx);
        assert!(batch.full_resync);
        assert_eq!(batch.target_version, 1);
        assert!(matches!(
            replica.apply_delta(&batch).unwrap(),
            ApplyOutcome::Applied { updated: 1, .. }
        ));
        ack_applied(&state, "observer-1", &replica).await;
        assert_eq!(tick(&state).await, 0);
    }

    #[tokio::test]
    async fn new_observer_of_empty_map_settles() {
        let state = test_state();
        let mut replica = ReplicatedMap::replica(MapConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.conn_manager.register("observer-1".into(), tx).unwrap();
        track_observer(&state, "observer-1").await.unwrap();

        assert_eq!(tick(&state).await, 1);
        let batch = next_delta(&mut rx);
        assert!(batch.full_resync);
        assert!(batch.changed.is_empty());
        replica.apply_delta(&batch).unwrap();
        ack_applied(&state, "observer-1", &replica).await;
        assert_eq!(tick(&state).await, 0);
    }
}
