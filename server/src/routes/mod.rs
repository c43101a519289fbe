//! HTTP route definitions.

mod data;
mod health;
mod ws;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(data::routes())
        .merge(ws::routes())
}
