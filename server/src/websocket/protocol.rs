//! WebSocket message protocol definitions.
//!
//! All envelopes are JSON-encoded and use snake_case for field names. The
//! delta batch itself keeps the engine's wire format.

use replimap_engine::{DeltaBatch, Version};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The replica applied everything up to `version`.
    Ack {
        /// Replica's applied version after the last batch
        version: Version,
    },

    /// The replica cannot trust its contents; send a full resync.
    Resync,

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Changes since the replica's acknowledged baseline.
    Delta { batch: DeltaBatch },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn delta(batch: DeltaBatch) -> Self {
        ServerMessage::Delta { batch }
    }
}
