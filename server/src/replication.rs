//! Replication tick.
//!
//! On every tick the authority computes a delta for each connected observer
//! and pushes it when there is something new to say, or when the last batch
//! went unacknowledged for longer than the resend interval.

use std::time::{Duration, Instant};

use replimap_engine::ReplicatedMap;

use crate::websocket::ConnectionManager;
use crate::AppState;

/// Start the background replication task.
pub fn start_replication_task(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let mut map = state.map.lock().await;
            let sent = replicate_once(
                &mut map,
                &state.conn_manager,
                state.config.resend_interval,
                Instant::now(),
            );
            if sent > 0 {
                tracing::trace!(sent, "Replication tick");
            }
        }
    })
}

/// Push due batches to every connected observer. Returns how many were sent.
///
/// Every batch is computed against the same state of the map.
pub fn replicate_once(
    map: &mut ReplicatedMap,
    conn_manager: &ConnectionManager,
    resend_interval: Duration,
    now: Instant,
) -> usize {
    let mut sent = 0;

    for observer_id in conn_manager.observer_ids() {
        let batch = match map.peek_delta(&observer_id) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(observer_id = %observer_id, "Cannot compute delta: {}", e);
                continue;
            }
        };

        if !conn_manager.should_send(&observer_id, &batch, resend_interval, now) {
            continue;
        }

        let target_version = batch.target_version;
        let full_resync = batch.full_resync;
        if let Err(e) = map.record_sent(&observer_id, &batch) {
            tracing::warn!(observer_id = %observer_id, "Cannot record delta: {}", e);
            continue;
        }
        if conn_manager.send_delta(&observer_id, batch, now) {
            tracing::debug!(
                observer_id = %observer_id,
                target_version,
                full_resync,
                "Sent delta"
            );
            sent += 1;
        }
    }

    sent
}
