//! Replimap Server - authority host for a replicated key/value map.
//!
//! This server owns the authority copy of the map. Writes arrive over HTTP;
//! replicas connect over WebSocket and receive delta batches on every
//! replication tick.

mod auth;
mod config;
mod error;
mod handlers;
mod replication;
mod routes;
mod websocket;

use crate::config::Config;
use crate::websocket::ConnectionManager;
use axum::Router;
use replimap_engine::{ChangeEvent, ReplicatedMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub map: Arc<Mutex<ReplicatedMap>>,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
}

/// Build the authority map and log every change it makes.
fn create_map(config: &Config) -> ReplicatedMap {
    let map = ReplicatedMap::authority(config.map.clone());
    map.subscribe_fn(|event| match event {
        ChangeEvent::Added { key, value } => tracing::debug!(%key, %value, "Key added"),
        ChangeEvent::Updated { key, value } => tracing::debug!(%key, %value, "Key updated"),
        ChangeEvent::Removed { key } => tracing::debug!(%key, "Key removed"),
    });
    map
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "replimap_server=debug,replimap_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Replimap Server on {}:{}", config.host, config.port);
    tracing::info!(
        key_shape = ?config.map.restricted_key_shape,
        value_shape = ?config.map.restricted_value_shape,
        removal_history_limit = config.map.removal_history_limit,
        tick_ms = config.tick_interval.as_millis() as u64,
        "Map configuration"
    );

    // Build application state
    let state = AppState {
        map: Arc::new(Mutex::new(create_map(&config))),
        config: Arc::new(config.clone()),
        conn_manager: ConnectionManager::new_shared(),
    };

    let replication = replication::start_replication_task(state.clone());

    // Build router
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    replication.abort();

    Ok(())
}
