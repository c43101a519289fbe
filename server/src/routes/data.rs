//! Data endpoint routes.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::auth::AuthorityUser;
use crate::error::Result;
use crate::handlers::{
    handle_all, handle_find, handle_keys, handle_remove, handle_set, DataResponse, FindResponse,
    KeyRequest, KeysResponse, RemoveDataResponse, SetDataRequest, SetDataResponse,
};
use crate::AppState;

/// Create data routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/data",
            get(all_handler).post(set_handler).delete(remove_handler),
        )
        .route("/data/find", post(find_handler))
        .route("/keys", get(keys_handler))
}

/// POST /data - Insert or replace an entry.
async fn set_handler(
    State(state): State<AppState>,
    _auth: AuthorityUser,
    Json(request): Json<SetDataRequest>,
) -> Result<Json<SetDataResponse>> {
    let mut map = state.map.lock().await;
    Ok(Json(handle_set(&mut map, request)?))
}

/// DELETE /data - Remove an entry.
async fn remove_handler(
    State(state): State<AppState>,
    _auth: AuthorityUser,
    Json(request): Json<KeyRequest>,
) -> Result<Json<RemoveDataResponse>> {
    let mut map = state.map.lock().await;
    Ok(Json(handle_remove(&mut map, request)?))
}

/// POST /data/find - Look up one entry.
async fn find_handler(
    State(state): State<AppState>,
    Json(request): Json<KeyRequest>,
) -> Result<Json<FindResponse>> {
    let map = state.map.lock().await;
    Ok(Json(handle_find(&map, request)?))
}

/// GET /data - Every entry.
async fn all_handler(State(state): State<AppState>) -> Json<DataResponse> {
    let map = state.map.lock().await;
    Json(handle_all(&map))
}

/// GET /keys - Every key, in storage order.
async fn keys_handler(State(state): State<AppState>) -> Json<KeysResponse> {
    let map = state.map.lock().await;
    Json(handle_keys(&map))
}
