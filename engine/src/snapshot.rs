//! Snapshot types for persisting and restoring store state.
//!
//! A snapshot captures everything the delta protocol depends on: entries in
//! storage order, the version counter and the removal history.
//! [`StoreSnapshot::into_store`] restores the counter exactly as captured;
//! importing into a live authority through
//! [`crate::ReplicatedMap::import_snapshot`] additionally moves it past every
//! version that authority already handed out.

use crate::{
    error::Result, Entry, Error, RecordStore, RemovalHistory, SchemaEnforcer, Tombstone, Version,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Last version allocated by the store
    pub current_version: Version,
    pub removed_version_high_water: Version,
    /// Entries in storage order
    pub entries: Vec<Entry>,
    /// Retained tombstones, oldest first
    pub tombstones: Vec<Tombstone>,
    pub removal_history_limit: usize,
    pub compacted_through: Version,
}

impl StoreSnapshot {
    /// Capture the state of a store.
    pub fn from_store(store: &RecordStore) -> Self {
        let removals = store.removals();
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            current_version: store.current_version(),
            removed_version_high_water: store.removed_version_high_water(),
            entries: store.entries().to_vec(),
            tombstones: removals.tombstones().cloned().collect(),
            removal_history_limit: removals.limit(),
            compacted_through: removals.compacted_through(),
        }
    }

    /// Check internal consistency.
    pub fn check_consistency(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !seen.insert(&entry.key) {
                return Err(Error::InvalidSnapshot(format!(
                    "duplicate key: {}",
                    entry.key
                )));
            }
            if entry.replication_version > self.current_version {
                return Err(Error::InvalidSnapshot(format!(
                    "entry {} at version {} is newer than the store ({})",
                    entry.key, entry.replication_version, self.current_version
                )));
            }
        }

        if let Some(t) = self
            .tombstones
            .iter()
            .find(|t| t.removed_version > self.removed_version_high_water)
        {
            return Err(Error::InvalidSnapshot(format!(
                "tombstone for {} at version {} is above the removal high-water mark ({})",
                t.key, t.removed_version, self.removed_version_high_water
            )));
        }

        if self.removed_version_high_water > self.current_version {
            return Err(Error::InvalidSnapshot(
                "removal high-water mark is newer than the store".into(),
            ));
        }

        Ok(())
    }

    /// Validate against schema restrictions and internal consistency.
    pub fn validate(&self, schema: &SchemaEnforcer) -> Result<()> {
        self.check_consistency()?;
        for entry in &self.entries {
            schema
                .validate(&entry.key, &entry.value)
                .map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        }
        Ok(())
    }

    /// Rebuild the store. No notifications are fired.
    pub fn into_store(self) -> Result<RecordStore> {
        self.check_consistency()?;
        let removals = RemovalHistory::from_parts(
            self.tombstones,
            self.removal_history_limit,
            self.compacted_through,
        );
        Ok(RecordStore::from_parts(
            self.entries,
            self.current_version,
            self.removed_version_high_water,
            removals,
        ))
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        // Validate format version
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub current_version: Version,
    pub entry_count: usize,
    pub tombstone_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            current_version: snapshot.current_version,
            entry_count: snapshot.entries.len(),
            tombstone_count: snapshot.tombstones.len(),
        }
    }
}
