//! # Replimap Engine
//!
//! Delta replication for a typed key/value map.
//!
//! One authority owns the map and is the only writer. Any number of replicas
//! hold derived copies that are updated exclusively through delta batches:
//! the minimal set of additions, updates and removals that brings a replica
//! from the last version it confirmed to the authority's current state.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine computes and applies batches; moving them is the
//!   caller's job
//! - **Deterministic**: batches list changes oldest first and removals before
//!   changes
//! - **Loss tolerant**: a lost batch is recovered by the next one, a late one
//!   is dropped
//!
//! ## Core Concepts
//!
//! ### Typed values
//!
//! Keys and values are [`TypedValue`]s: a shape tag from a closed set
//! ([`ShapeId`]) plus a payload. Equality and hashing are structural, with
//! canonical float handling.
//!
//! ### Store
//!
//! The [`RecordStore`] keeps entries in insertion order, stamps every change
//! with a fresh version and remembers recent removals as [`Tombstone`]s.
//!
//! ### Synchronization
//!
//! The [`DeltaSynchronizer`] tracks one [`ObserverBaseline`] per observer and
//! produces [`DeltaBatch`]es. Replicas apply them with [`apply_delta`].
//!
//! ### Notifications
//!
//! Every change fires one [`ChangeEvent`] through the
//! [`NotificationDispatcher`], synchronously and in subscription order.
//!
//! ## Quick Start
//!
//! ```rust
//! use replimap_engine::{MapConfig, RecordKey, RecordValue, ReplicatedMap};
//!
//! // 1. Create both sides
//! let mut authority = ReplicatedMap::authority(MapConfig::default());
//! let mut replica = ReplicatedMap::replica(MapConfig::default());
//! authority.add_observer("replica-1").unwrap();
//!
//! // 2. Write on the authority
//! authority
//!     .set_data(RecordKey::new("score"), RecordValue::new(10i64))
//!     .unwrap();
//!
//! // 3. Ship a delta and acknowledge it
//! let batch = authority.prepare_delta("replica-1").unwrap();
//! replica.apply_delta(&batch).unwrap();
//! let applied = replica.replica_baseline().applied_version();
//! authority.acknowledge("replica-1", applied).unwrap();
//!
//! // 4. Read on the replica
//! assert_eq!(
//!     replica.get_data(&RecordKey::new("score")),
//!     Some(&RecordValue::new(10i64))
//! );
//! ```
//!
//! ## Persistence
//!
//! Use [`ReplicatedMap::export_snapshot`] and
//! [`ReplicatedMap::import_snapshot`] with [`StoreSnapshot`]. Snapshots keep
//! the version counter and removal history, so replication resumes without
//! reusing versions.

pub mod dispatch;
pub mod error;
pub mod history;
pub mod map;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod value;

// Re-export main types at crate root
pub use dispatch::{
    ChangeEvent, ChangeListener, NotificationDispatcher, NotificationSink, SubscriptionHandle,
};
#[cfg(test)]
pub(crate) use dispatch::EventRecorder;
pub use error::{Error, Result, SchemaField};
pub use history::{RemovalHistory, Tombstone, DEFAULT_REMOVAL_HISTORY_LIMIT};
pub use map::{MapConfig, ReplicatedMap, Role};
pub use record::{ChangeKind, Entry, RecordKey, RecordValue};
pub use schema::SchemaEnforcer;
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{RecordStore, StoreChange};
pub use sync::{
    apply_delta, compute_delta, full_resync, ApplyOutcome, ChangedEntry, DeltaBatch,
    DeltaSynchronizer, ObserverBaseline, ReplicaBaseline,
};
pub use value::{Shape, ShapeId, StringInt, StringIntFloat, TypedValue, Vector3};

/// Type aliases for clarity
pub type Version = u64;
pub type ObserverId = String;
