//! WebSocket support for delta replication.
//!
//! Each connection is one observer. The server pushes delta batches; the
//! client answers with acknowledgements and resync requests.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;
