//! The replicated map component.
//!
//! [`ReplicatedMap`] ties the pieces together: a [`RecordStore`] holding the
//! entries, a [`SchemaEnforcer`] gating writes, a [`NotificationDispatcher`]
//! receiving every change, and either a [`DeltaSynchronizer`] (authority) or
//! a [`ReplicaBaseline`] (replica).

use crate::{
    error::Result, sync, ApplyOutcome, ChangeEvent, ChangeListener, DeltaBatch,
    DeltaSynchronizer, Error, NotificationDispatcher, NotificationSink, ObserverId, RecordKey,
    RecordStore, RecordValue, ReplicaBaseline, SchemaEnforcer, Shape, ShapeId, StoreSnapshot,
    SubscriptionHandle, Version, DEFAULT_REMOVAL_HISTORY_LIMIT,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Static configuration of a map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MapConfig {
    /// Only keys of this shape may be written
    pub restricted_key_shape: Option<ShapeId>,
    /// Only values of this shape may be written
    pub restricted_value_shape: Option<ShapeId>,
    /// Tombstones retained for delta computation
    pub removal_history_limit: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            restricted_key_shape: None,
            restricted_value_shape: None,
            removal_history_limit: DEFAULT_REMOVAL_HISTORY_LIMIT,
        }
    }
}

impl MapConfig {
    pub fn with_key_shape(mut self, shape: ShapeId) -> Self {
        self.restricted_key_shape = Some(shape);
        self
    }

    pub fn with_value_shape(mut self, shape: ShapeId) -> Self {
        self.restricted_value_shape = Some(shape);
        self
    }

    pub fn with_removal_history_limit(mut self, limit: usize) -> Self {
        self.removal_history_limit = limit;
        self
    }

    /// The enforcer described by this configuration.
    pub fn enforcer(&self) -> SchemaEnforcer {
        SchemaEnforcer {
            allowed_key_shape: self.restricted_key_shape,
            allowed_value_shape: self.restricted_value_shape,
        }
    }
}

/// Which side of replication a map sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sole writer; serves deltas to observers
    Authority,
    /// Read-only copy updated from deltas
    Replica,
}

/// A key/value map replicated from one authority to many replicas.
#[derive(Debug)]
pub struct ReplicatedMap {
    role: Role,
    config: MapConfig,
    store: RecordStore,
    schema: SchemaEnforcer,
    dispatcher: Arc<NotificationDispatcher>,
    synchronizer: DeltaSynchronizer,
    replica_baseline: ReplicaBaseline,
}

impl ReplicatedMap {
    /// Create the writable side.
    pub fn authority(config: MapConfig) -> Self {
        Self::with_role(Role::Authority, config)
    }

    /// Create a replica fed by [`ReplicatedMap::apply_delta`].
    pub fn replica(config: MapConfig) -> Self {
        Self::with_role(Role::Replica, config)
    }

    fn with_role(role: Role, config: MapConfig) -> Self {
        let dispatcher = NotificationDispatcher::new_shared();
        let mut store = RecordStore::with_removal_history_limit(config.removal_history_limit);
        store.set_owner(Self::sink(&dispatcher));
        Self {
            role,
            schema: config.enforcer(),
            config,
            store,
            dispatcher,
            synchronizer: DeltaSynchronizer::new(),
            replica_baseline: ReplicaBaseline::new(),
        }
    }

    fn sink(dispatcher: &Arc<NotificationDispatcher>) -> std::sync::Weak<dyn NotificationSink> {
        let sink: Arc<dyn NotificationSink> = dispatcher.clone();
        Arc::downgrade(&sink)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_authority(&self) -> bool {
        self.role == Role::Authority
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn schema(&self) -> &SchemaEnforcer {
        &self.schema
    }

    /// Restrict the key shape of future writes. Stored entries are kept.
    pub fn set_allowed_key_shape(&mut self, shape: Option<ShapeId>) {
        self.config.restricted_key_shape = shape;
        self.schema.set_allowed_key_shape(shape);
    }

    /// Restrict the value shape of future writes. Stored entries are kept.
    pub fn set_allowed_value_shape(&mut self, shape: Option<ShapeId>) {
        self.config.restricted_value_shape = shape;
        self.schema.set_allowed_value_shape(shape);
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn require_authority(&self) -> Result<()> {
        if self.role != Role::Authority {
            return Err(Error::NotAuthority);
        }
        Ok(())
    }

    fn require_replica(&self) -> Result<()> {
        if self.role != Role::Replica {
            return Err(Error::NotReplica);
        }
        Ok(())
    }

    // Data

    /// Insert or replace the value for `key`.
    ///
    /// Rejected writes leave the map untouched and fire no events.
    pub fn set_data(&mut self, key: RecordKey, value: RecordValue) -> Result<()> {
        self.require_authority()?;
        if let Err(err) = self.schema.validate(&key, &value) {
            tracing::warn!(%key, %err, "rejecting write");
            return Err(err);
        }
        let change = self.store.add_or_update(key, value);
        tracing::trace!(kind = ?change.kind, version = change.version, "entry written");
        Ok(())
    }

    /// Remove `key`. Returns false if it was not present.
    pub fn remove_data(&mut self, key: &RecordKey) -> Result<bool> {
        self.require_authority()?;
        Ok(self.store.remove(key))
    }

    pub fn get_data(&self, key: &RecordKey) -> Option<&RecordValue> {
        self.store.find(key)
    }

    /// Keys in storage order.
    pub fn get_keys(&self) -> Vec<RecordKey> {
        self.store.keys()
    }

    pub fn contains_key(&self, key: &RecordKey) -> bool {
        self.store.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Typed form of [`ReplicatedMap::set_data`].
    pub fn set_typed<K: Shape, V: Shape>(&mut self, key: K, value: V) -> Result<()> {
        self.set_data(
            RecordKey::from(key.into_value()),
            RecordValue::from(value.into_value()),
        )
    }

    /// Typed lookup. A stored value of another shape is a `ShapeMismatch`.
    pub fn get_typed<K: Shape, V: Shape>(&self, key: K) -> Result<Option<V>> {
        let key = RecordKey::from(key.into_value());
        match self.store.find(&key) {
            Some(value) => value.try_get_as::<V>().map(|v| Some(v.clone())),
            None => Ok(None),
        }
    }

    // Events

    pub fn subscribe(&self, listener: impl ChangeListener + 'static) -> SubscriptionHandle {
        self.dispatcher.subscribe(listener)
    }

    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: FnMut(&ChangeEvent) + Send + 'static,
    {
        self.dispatcher.subscribe_fn(callback)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.dispatcher.unsubscribe(handle)
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    // Authority replication

    /// Start replicating to `observer` from an empty baseline.
    pub fn add_observer(&mut self, observer: impl Into<ObserverId>) -> Result<bool> {
        self.require_authority()?;
        Ok(self.synchronizer.subscribe(observer))
    }

    pub fn remove_observer(&mut self, observer: &str) -> bool {
        self.synchronizer.disconnect(observer)
    }

    pub fn observer_ids(&self) -> Vec<ObserverId> {
        self.synchronizer.observer_ids()
    }

    pub fn synchronizer(&self) -> &DeltaSynchronizer {
        &self.synchronizer
    }

    /// Compute the next batch for `observer` and record it as sent.
    pub fn prepare_delta(&mut self, observer: &str) -> Result<DeltaBatch> {
        self.require_authority()?;
        self.synchronizer.prepare(observer, &self.store)
    }

    /// Compute batches for every observer against the current state.
    pub fn prepare_all_deltas(&mut self) -> Result<Vec<(ObserverId, DeltaBatch)>> {
        self.require_authority()?;
        Ok(self.synchronizer.prepare_all(&self.store))
    }

    /// Compute the next batch without recording it as sent.
    pub fn peek_delta(&self, observer: &str) -> Result<DeltaBatch> {
        self.synchronizer.compute(observer, &self.store)
    }

    /// Record that a batch from [`ReplicatedMap::peek_delta`] was sent.
    pub fn record_sent(&mut self, observer: &str, batch: &DeltaBatch) -> Result<()> {
        self.require_authority()?;
        self.synchronizer.record_sent(observer, batch)
    }

    pub fn acknowledge(&mut self, observer: &str, version: Version) -> Result<bool> {
        self.synchronizer.acknowledge(observer, version)
    }

    /// Serve `observer` full resyncs until it acknowledges one.
    pub fn resync_observer(&mut self, observer: &str) -> Result<()> {
        self.synchronizer.reset(observer)
    }

    // Replica

    /// Apply a batch received from the authority.
    pub fn apply_delta(&mut self, batch: &DeltaBatch) -> Result<ApplyOutcome> {
        self.require_replica()?;
        sync::apply_delta(&mut self.store, &mut self.replica_baseline, batch)
    }

    pub fn replica_baseline(&self) -> &ReplicaBaseline {
        &self.replica_baseline
    }

    /// Forget the applied version before asking the authority for a full
    /// resync. Incremental batches are dropped until the resync is applied.
    pub fn request_resync(&mut self) -> Result<()> {
        self.require_replica()?;
        tracing::debug!(
            applied = self.replica_baseline.applied_version(),
            "replica requested resync"
        );
        self.replica_baseline.reset();
        Ok(())
    }

    // Persistence

    pub fn export_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::from_store(&self.store)
    }

    /// Replace the contents of the map with `snapshot`.
    ///
    /// No events fire. On an authority the version counter moves past every
    /// version handed out before the import, even when the snapshot is
    /// older, and every observer is moved to full resync. A replica drops
    /// incremental batches until its authority sends a full resync.
    pub fn import_snapshot(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate(&self.schema)?;
        let mut store = snapshot.into_store()?;
        if self.is_authority() {
            store.advance_version_past(self.store.current_version());
        }
        store.set_owner(Self::sink(&self.dispatcher));
        self.store = store;
        self.synchronizer.reset_all();
        self.replica_baseline.reset();
        tracing::debug!(
            role = ?self.role,
            entries = self.store.len(),
            version = self.store.current_version(),
            "imported snapshot"
        );
        Ok(())
    }
}
