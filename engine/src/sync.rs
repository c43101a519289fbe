//! Delta synchronization between the authority and its observers.
//!
//! This is the protocol core. Each observer is tracked by an
//! [`ObserverBaseline`]: the highest version it confirmed, and the set of
//! keys the authority believes it holds. A [`DeltaBatch`] carries everything
//! that changed after the baseline.
//!
//! # Algorithm
//!
//! 1. `removed`: tombstones newer than the baseline whose key is not present
//!    again. A remove followed by a re-add collapses into the changed entry.
//! 2. `changed`: entries newer than the baseline, oldest change first, tagged
//!    `Added` or `Updated` against the known-key set.
//! 3. Receivers apply `removed` strictly before `changed`.
//! 4. `target_version` is the newest version carried, or the baseline if the
//!    batch is empty. Receivers advance to it only after applying everything.
//! 5. The authority moves a baseline only on acknowledgements of versions it
//!    actually sent.
//!
//! If removals newer than the baseline were compacted out of the store's
//! history, the batch becomes a full resync: every entry, and an instruction
//! to drop any key not listed.

use crate::{
    error::Result, ChangeKind, Error, ObserverId, RecordKey, RecordStore, RecordValue, Version,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// An entry carried by a delta batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedEntry {
    pub key: RecordKey,
    pub value: RecordValue,
    pub kind: ChangeKind,
    /// Authority version of this change
    pub version: Version,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The changes bringing an observer from its baseline to `target_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaBatch {
    /// Version the receiver advances to after applying the batch
    pub target_version: Version,
    /// Receiver must drop every key not listed in `changed`
    #[serde(default, skip_serializing_if = "is_false")]
    pub full_resync: bool,
    /// Keys to remove, applied before `changed`
    #[serde(default)]
    pub removed: Vec<RecordKey>,
    /// Entries to add or update, in order
    #[serde(default)]
    pub changed: Vec<ChangedEntry>,
}

impl DeltaBatch {
    /// A batch carrying nothing.
    pub fn empty(target_version: Version) -> Self {
        Self {
            target_version,
            full_resync: false,
            removed: Vec::new(),
            changed: Vec::new(),
        }
    }

    /// True if applying the batch cannot change a replica.
    pub fn is_empty(&self) -> bool {
        !self.full_resync && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Check internal consistency before anything is applied.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for change in &self.changed {
            if change.version > self.target_version {
                return Err(Error::MalformedBatch(format!(
                    "change of {} at version {} exceeds target {}",
                    change.key, change.version, self.target_version
                )));
            }
            if !seen.insert(&change.key) {
                return Err(Error::MalformedBatch(format!(
                    "key {} changed more than once",
                    change.key
                )));
            }
        }
        Ok(())
    }
}

/// Authority-side replication state for one observer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObserverBaseline {
    acknowledged_version: Version,
    /// Highest target handed to the transport
    sent_version: Version,
    known_keys: HashSet<RecordKey>,
    /// Serve full resyncs until one of them is acknowledged
    resync_pending: bool,
    /// Target of the first full resync sent while `resync_pending`
    resync_target: Option<Version>,
}

impl ObserverBaseline {
    /// Baseline of an observer that has received nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Baseline of an observer whose replica contents cannot be trusted.
    pub fn pending_resync() -> Self {
        Self {
            resync_pending: true,
            ..Self::default()
        }
    }

    pub fn resync_pending(&self) -> bool {
        self.resync_pending
    }

    pub fn acknowledged_version(&self) -> Version {
        self.acknowledged_version
    }

    /// Highest target version recorded as sent.
    pub fn sent_version(&self) -> Version {
        self.sent_version
    }

    /// Whether the observer is believed to hold `key`.
    pub fn knows(&self, key: &RecordKey) -> bool {
        self.known_keys.contains(key)
    }

    pub fn known_key_count(&self) -> usize {
        self.known_keys.len()
    }

    fn kind_for(&self, key: &RecordKey) -> ChangeKind {
        if self.knows(key) {
            ChangeKind::Updated
        } else {
            ChangeKind::Added
        }
    }

    /// Update the known-key set for a batch that was handed to the transport.
    pub fn record_sent(&mut self, batch: &DeltaBatch) {
        self.sent_version = self.sent_version.max(batch.target_version);
        if batch.full_resync {
            if self.resync_pending && self.resync_target.is_none() {
                self.resync_target = Some(batch.target_version);
            }
            self.known_keys = batch.changed.iter().map(|c| c.key.clone()).collect();
            return;
        }
        for key in &batch.removed {
            self.known_keys.remove(key);
        }
        for change in &batch.changed {
            self.known_keys.insert(change.key.clone());
        }
    }

    /// Advance to `version`. Returns false, leaving the baseline untouched,
    /// if no batch up to `version` was sent.
    ///
    /// While a resync is pending only an acknowledgement covering a sent full
    /// resync counts; anything else may describe contents the observer has
    /// since discarded. Otherwise the version must be newer than the
    /// baseline.
    pub fn acknowledge(&mut self, version: Version) -> bool {
        if version > self.sent_version {
            return false;
        }
        if self.resync_pending {
            match self.resync_target {
                Some(target) if version >= target => {}
                _ => return false,
            }
            self.resync_pending = false;
            self.resync_target = None;
            self.acknowledged_version = self.acknowledged_version.max(version);
            return true;
        }
        if version <= self.acknowledged_version {
            return false;
        }
        self.acknowledged_version = version;
        true
    }
}

/// Compute the delta bringing `baseline` up to the store's current state.
///
/// Pure with respect to both arguments; call [`ObserverBaseline::record_sent`]
/// once the batch is actually sent.
pub fn compute_delta(store: &RecordStore, baseline: &ObserverBaseline) -> DeltaBatch {
    if baseline.resync_pending {
        return full_resync(store, baseline);
    }

    let since = baseline.acknowledged_version;

    let tombstones = match store.removals_since(since) {
        Ok(tombstones) => tombstones,
        Err(err) => {
            tracing::debug!(%err, "removal history exhausted, sending full resync");
            return full_resync(store, baseline);
        }
    };

    let mut target_version = since;

    let removed = tombstones
        .into_iter()
        .filter(|t| !store.contains_key(&t.key))
        .map(|t| {
            target_version = target_version.max(t.removed_version);
            t.key.clone()
        })
        .collect();

    let changed = store
        .changed_since(since)
        .into_iter()
        .map(|entry| {
            target_version = target_version.max(entry.replication_version);
            ChangedEntry {
                key: entry.key.clone(),
                value: entry.value.clone(),
                kind: baseline.kind_for(&entry.key),
                version: entry.replication_version,
            }
        })
        .collect();

    DeltaBatch {
        target_version,
        full_resync: false,
        removed,
        changed,
    }
}

/// A batch replacing the receiver's contents with the store's.
pub fn full_resync(store: &RecordStore, baseline: &ObserverBaseline) -> DeltaBatch {
    let changed = store
        .changed_since(0)
        .into_iter()
        .map(|entry| ChangedEntry {
            key: entry.key.clone(),
            value: entry.value.clone(),
            kind: baseline.kind_for(&entry.key),
            version: entry.replication_version,
        })
        .collect();

    DeltaBatch {
        target_version: store.current_version(),
        full_resync: true,
        removed: Vec::new(),
        changed,
    }
}

/// Per-observer replication bookkeeping on the authority.
#[derive(Debug, Clone, Default)]
pub struct DeltaSynchronizer {
    observers: HashMap<ObserverId, ObserverBaseline>,
}

impl DeltaSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an observer with an empty baseline.
    ///
    /// Returns false if it was already tracked; its baseline is kept.
    pub fn subscribe(&mut self, observer: impl Into<ObserverId>) -> bool {
        let observer = observer.into();
        if self.observers.contains_key(&observer) {
            return false;
        }
        tracing::debug!(observer = %observer, "observer subscribed");
        self.observers.insert(observer, ObserverBaseline::new());
        true
    }

    /// Stop tracking an observer and discard its baseline.
    pub fn disconnect(&mut self, observer: &str) -> bool {
        let removed = self.observers.remove(observer).is_some();
        if removed {
            tracing::debug!(observer = %observer, "observer disconnected");
        }
        removed
    }

    /// Forget everything about an observer and serve it full resyncs until
    /// it acknowledges one.
    pub fn reset(&mut self, observer: &str) -> Result<()> {
        *self.baseline_mut(observer)? = ObserverBaseline::pending_resync();
        Ok(())
    }

    /// Reset every observer.
    pub fn reset_all(&mut self) {
        for baseline in self.observers.values_mut() {
            *baseline = ObserverBaseline::pending_resync();
        }
    }

    pub fn baseline(&self, observer: &str) -> Option<&ObserverBaseline> {
        self.observers.get(observer)
    }

    fn baseline_mut(&mut self, observer: &str) -> Result<&mut ObserverBaseline> {
        self.observers
            .get_mut(observer)
            .ok_or_else(|| Error::UnknownObserver(observer.to_string()))
    }

    /// Tracked observers, sorted.
    pub fn observer_ids(&self) -> Vec<ObserverId> {
        let mut ids: Vec<_> = self.observers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Compute the next batch for an observer without recording it as sent.
    pub fn compute(&self, observer: &str, store: &RecordStore) -> Result<DeltaBatch> {
        let baseline = self
            .observers
            .get(observer)
            .ok_or_else(|| Error::UnknownObserver(observer.to_string()))?;
        Ok(compute_delta(store, baseline))
    }

    /// Record that `batch` was handed to the transport for `observer`.
    pub fn record_sent(&mut self, observer: &str, batch: &DeltaBatch) -> Result<()> {
        self.baseline_mut(observer)?.record_sent(batch);
        Ok(())
    }

    /// Compute a batch and record it as sent.
    pub fn prepare(&mut self, observer: &str, store: &RecordStore) -> Result<DeltaBatch> {
        let batch = self.compute(observer, store)?;
        self.record_sent(observer, &batch)?;
        Ok(batch)
    }

    /// Prepare batches for every observer against one state of the store.
    pub fn prepare_all(&mut self, store: &RecordStore) -> Vec<(ObserverId, DeltaBatch)> {
        let mut batches: Vec<_> = self
            .observers
            .iter_mut()
            .map(|(id, baseline)| {
                let batch = compute_delta(store, baseline);
                baseline.record_sent(&batch);
                (id.clone(), batch)
            })
            .collect();
        batches.sort_by(|a, b| a.0.cmp(&b.0));
        batches
    }

    /// Confirm that `observer` applied everything up to `version`.
    ///
    /// Acknowledgements that do not advance the baseline, or that name a
    /// version never sent to the observer, are ignored and return
    /// `Ok(false)`.
    pub fn acknowledge(&mut self, observer: &str, version: Version) -> Result<bool> {
        let baseline = self.baseline_mut(observer)?;
        let advanced = baseline.acknowledge(version);
        if !advanced {
            tracing::debug!(
                observer = %observer,
                version,
                baseline = baseline.acknowledged_version(),
                sent = baseline.sent_version(),
                resync_pending = baseline.resync_pending(),
                "ignoring acknowledgement"
            );
        }
        Ok(advanced)
    }
}

/// Outcome of [`apply_delta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ApplyOutcome {
    /// The batch was applied and the baseline advanced
    Applied {
        added: usize,
        updated: usize,
        removed: usize,
    },
    /// The batch was not newer than the baseline and was dropped
    Stale,
    /// The batch carried nothing and matched the baseline
    Empty,
}

/// Replica-side replication state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaBaseline {
    applied_version: Version,
    stale_batches: u64,
    /// Only a full resync is accepted until one has been applied
    #[serde(default)]
    awaiting_resync: bool,
}

impl ReplicaBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest authority version fully applied.
    pub fn applied_version(&self) -> Version {
        self.applied_version
    }

    /// Number of batches dropped for not being newer than the baseline.
    pub fn stale_batches(&self) -> u64 {
        self.stale_batches
    }

    /// Whether incremental batches are dropped until a full resync arrives.
    pub fn awaiting_resync(&self) -> bool {
        self.awaiting_resync
    }

    /// Forget the applied version and wait for a full resync. Incremental
    /// batches still in flight are dropped as stale. The stale counter is
    /// kept.
    pub fn reset(&mut self) {
        self.applied_version = 0;
        self.awaiting_resync = true;
    }

    /// A full resync at the current baseline is still accepted; it restates
    /// the contents the replica should already hold.
    fn check(&self, batch: &DeltaBatch) -> Result<()> {
        let target = batch.target_version;
        let fresh = if batch.full_resync {
            target >= self.applied_version
        } else {
            target > self.applied_version
        };
        if !fresh {
            return Err(Error::OutOfOrderApply {
                target,
                baseline: self.applied_version,
            });
        }
        Ok(())
    }
}

/// Apply a received batch to a replica store.
///
/// Stale batches are dropped and counted. A malformed batch is rejected
/// before anything is applied. The baseline advances only once every
/// removal and change has been applied.
pub fn apply_delta(
    store: &mut RecordStore,
    baseline: &mut ReplicaBaseline,
    batch: &DeltaBatch,
) -> Result<ApplyOutcome> {
    if batch.is_empty() && batch.target_version == baseline.applied_version {
        return Ok(ApplyOutcome::Empty);
    }

    if baseline.awaiting_resync && !batch.full_resync {
        baseline.stale_batches += 1;
        tracing::debug!(
            target_version = batch.target_version,
            stale_batches = baseline.stale_batches,
            "dropping incremental batch while awaiting resync"
        );
        return Ok(ApplyOutcome::Stale);
    }

    if let Err(err) = baseline.check(batch) {
        baseline.stale_batches += 1;
        tracing::debug!(%err, stale_batches = baseline.stale_batches, "dropping stale batch");
        return Ok(ApplyOutcome::Stale);
    }

    batch.validate()?;

    let mut added = 0;
    let mut updated = 0;
    let mut removed = 0;

    if batch.full_resync {
        let listed: HashSet<_> = batch.changed.iter().map(|c| &c.key).collect();
        for key in store.keys() {
            if !listed.contains(&key) && store.remove(&key) {
                removed += 1;
            }
        }
    }

    for key in &batch.removed {
        if store.remove(key) {
            removed += 1;
        }
    }

    for change in &batch.changed {
        let result = store.add_or_update(change.key.clone(), change.value.clone());
        match result.kind {
            ChangeKind::Added => {
                if change.kind == ChangeKind::Updated {
                    tracing::debug!(key = %change.key, "update for absent key applied as add");
                }
                added += 1;
            }
            ChangeKind::Updated => updated += 1,
        }
    }

    baseline.applied_version = batch.target_version;
    baseline.awaiting_resync = false;

    Ok(ApplyOutcome::Applied {
        added,
        updated,
        removed,
    })
}
