//! WebSocket upgrade route.

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::handlers::handle_websocket_connection;
use crate::AppState;

/// Query parameters for the upgrade request.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub observer_id: String,
}

/// Create WebSocket routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade_handler))
}

/// GET /ws?observer_id=... - Start replicating to an observer.
async fn upgrade_handler(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let observer_id = query.observer_id.trim().to_string();
    if observer_id.is_empty() {
        return Err(AppError::BadRequest("observer_id must not be empty".into()));
    }
    if state.conn_manager.is_connected(&observer_id) {
        return Err(AppError::BadRequest(format!(
            "observer {} is already connected",
            observer_id
        )));
    }

    Ok(ws.on_upgrade(move |socket| handle_websocket_connection(socket, state, observer_id)))
}
