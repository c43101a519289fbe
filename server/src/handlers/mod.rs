//! Request handlers for map access and replication.

mod data;
mod websocket;

pub use data::*;
pub use websocket::handle_websocket_connection;
