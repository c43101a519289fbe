//! Store - the ordered collection of replicated entries.
//!
//! The store owns mutation and replication versions. Every creation, value
//! change and removal allocates a fresh version from a store-local counter;
//! the delta synchronizer compares those versions against each observer's
//! baseline. Notifications are routed to the owning component through a weak
//! handle, so the store never keeps its owner alive.

use crate::{
    error::Result, ChangeEvent, ChangeKind, Entry, NotificationSink, RecordKey, RecordValue,
    RemovalHistory, Tombstone, Version,
};
use std::collections::HashMap;
use std::sync::Weak;

/// Result of [`RecordStore::add_or_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChange {
    pub kind: ChangeKind,
    pub version: Version,
}

/// Ordered store of entries, at most one per key.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    /// Entries in insertion order
    entries: Vec<Entry>,
    /// Position of each key in `entries`
    index: HashMap<RecordKey, usize>,
    /// Last version allocated
    current_version: Version,
    /// Highest version at which an entry was removed
    removed_version_high_water: Version,
    removals: RemovalHistory,
    owner: Option<Weak<dyn NotificationSink>>,
}

impl RecordStore {
    /// Create an empty store with the default removal history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store retaining at most `limit` tombstones.
    pub fn with_removal_history_limit(limit: usize) -> Self {
        Self {
            removals: RemovalHistory::with_limit(limit),
            ..Self::default()
        }
    }

    /// Rebuild a store from exported state. No notifications are fired.
    pub fn from_parts(
        entries: Vec<Entry>,
        current_version: Version,
        removed_version_high_water: Version,
        removals: RemovalHistory,
    ) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key.clone(), i))
            .collect();
        Self {
            entries,
            index,
            current_version,
            removed_version_high_water,
            removals,
            owner: None,
        }
    }

    /// Route notifications to `owner` while it is alive.
    pub fn set_owner(&mut self, owner: Weak<dyn NotificationSink>) {
        self.owner = Some(owner);
    }

    /// Stop routing notifications.
    pub fn clear_owner(&mut self) {
        self.owner = None;
    }

    fn notify(&self, event: ChangeEvent) {
        if let Some(sink) = self.owner.as_ref().and_then(Weak::upgrade) {
            sink.notify(&event);
        }
    }

    fn allocate_version(&mut self) -> Version {
        self.current_version += 1;
        self.current_version
    }

    /// Move the version counter past `floor` and return the new version.
    ///
    /// Used when the store replaces one that already handed out versions up
    /// to `floor`; the store's next state is newer than all of them.
    pub fn advance_version_past(&mut self, floor: Version) -> Version {
        self.current_version = self.current_version.max(floor);
        self.allocate_version()
    }

    /// Insert or replace the value for `key`.
    ///
    /// Fires `Added` for a new key and `Updated` for an existing one, after
    /// the store reflects the change.
    pub fn add_or_update(&mut self, key: RecordKey, value: RecordValue) -> StoreChange {
        let version = self.allocate_version();

        let kind = match self.index.get(&key) {
            Some(&pos) => {
                self.entries[pos].update_value(value.clone(), version);
                ChangeKind::Updated
            }
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries
                    .push(Entry::new(key.clone(), value.clone(), version));
                ChangeKind::Added
            }
        };

        tracing::trace!(key = %key, version, ?kind, "entry written");

        self.notify(match kind {
            ChangeKind::Added => ChangeEvent::Added { key, value },
            ChangeKind::Updated => ChangeEvent::Updated { key, value },
        });

        StoreChange { kind, version }
    }

    /// Remove `key`. Returns false, without notifying, if it is absent.
    ///
    /// `Removed` fires while the entry is still readable.
    pub fn remove(&mut self, key: &RecordKey) -> bool {
        let Some(&pos) = self.index.get(key) else {
            return false;
        };

        self.notify(ChangeEvent::Removed { key: key.clone() });

        let version = self.allocate_version();
        self.removed_version_high_water = self.removed_version_high_water.max(version);
        self.removals.record(key.clone(), version);

        self.entries.remove(pos);
        self.index.remove(key);
        for (i, entry) in self.entries.iter().enumerate().skip(pos) {
            self.index.insert(entry.key.clone(), i);
        }

        tracing::trace!(key = %key, version, "entry removed");
        true
    }

    /// Look up the value for `key`.
    pub fn find(&self, key: &RecordKey) -> Option<&RecordValue> {
        self.entry(key).map(|e| &e.value)
    }

    /// Look up the full entry for `key`.
    pub fn entry(&self, key: &RecordKey) -> Option<&Entry> {
        self.index.get(key).map(|&pos| &self.entries[pos])
    }

    pub fn contains_key(&self, key: &RecordKey) -> bool {
        self.index.contains_key(key)
    }

    /// Keys in storage order. Later mutations do not affect the returned list.
    pub fn keys(&self) -> Vec<RecordKey> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    /// All entries in storage order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Entries changed after `baseline`, oldest change first.
    pub fn changed_since(&self, baseline: Version) -> Vec<&Entry> {
        let mut changed: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.is_newer_than(baseline))
            .collect();
        changed.sort_by_key(|e| e.replication_version);
        changed
    }

    /// Tombstones newer than `baseline`.
    ///
    /// Fails with [`crate::Error::StaleBaseline`] if the history no longer
    /// covers `baseline`.
    pub fn removals_since(&self, baseline: Version) -> Result<Vec<&Tombstone>> {
        if self.removed_version_high_water <= baseline {
            return Ok(Vec::new());
        }
        Ok(self.removals.since(baseline)?.collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last version allocated by this store.
    pub fn current_version(&self) -> Version {
        self.current_version
    }

    pub fn removed_version_high_water(&self) -> Version {
        self.removed_version_high_water
    }

    pub fn removals(&self) -> &RemovalHistory {
        &self.removals
    }
}
