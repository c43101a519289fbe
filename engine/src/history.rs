//! Bounded history of removals.
//!
//! Removals leave no entry behind, so the store records a [`Tombstone`] for
//! each one. Observers whose baseline predates a tombstone learn about the
//! removal from it. The history is a FIFO with a fixed capacity; when the
//! oldest tombstone is dropped, `compacted_through` rises to its version and
//! any baseline below that can no longer be served incrementally.

use crate::{error::Result, Error, RecordKey, Version};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of tombstones retained.
pub const DEFAULT_REMOVAL_HISTORY_LIMIT: usize = 256;

/// Record of a removed key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub key: RecordKey,
    /// Version allocated for the removal
    pub removed_version: Version,
}

/// FIFO of tombstones ordered by removal version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalHistory {
    tombstones: VecDeque<Tombstone>,
    limit: usize,
    compacted_through: Version,
}

impl Default for RemovalHistory {
    fn default() -> Self {
        Self::with_limit(DEFAULT_REMOVAL_HISTORY_LIMIT)
    }
}

impl RemovalHistory {
    /// Create a history retaining at most `limit` tombstones.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            tombstones: VecDeque::new(),
            limit,
            compacted_through: 0,
        }
    }

    /// Rebuild a history from exported parts.
    pub fn from_parts(
        tombstones: impl IntoIterator<Item = Tombstone>,
        limit: usize,
        compacted_through: Version,
    ) -> Self {
        let mut history = Self::with_limit(limit);
        history.compacted_through = compacted_through;
        for tombstone in tombstones {
            history.record(tombstone.key, tombstone.removed_version);
        }
        history
    }

    /// Record a removal. A previous tombstone for the same key is superseded.
    pub fn record(&mut self, key: RecordKey, removed_version: Version) {
        self.tombstones.retain(|t| t.key != key);
        self.tombstones.push_back(Tombstone {
            key,
            removed_version,
        });

        while self.tombstones.len() > self.limit {
            if let Some(oldest) = self.tombstones.pop_front() {
                self.compacted_through = self.compacted_through.max(oldest.removed_version);
            }
        }
    }

    /// Tombstones newer than `baseline`, oldest first.
    ///
    /// Fails with [`Error::StaleBaseline`] if removals newer than `baseline`
    /// may have been compacted away.
    pub fn since(&self, baseline: Version) -> Result<impl Iterator<Item = &Tombstone> + '_> {
        if baseline < self.compacted_through {
            return Err(Error::StaleBaseline {
                baseline,
                compacted_through: self.compacted_through,
            });
        }
        Ok(self
            .tombstones
            .iter()
            .filter(move |t| t.removed_version > baseline))
    }

    /// Highest removal version that was dropped from the history.
    pub fn compacted_through(&self) -> Version {
        self.compacted_through
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn tombstones(&self) -> impl Iterator<Item = &Tombstone> {
        self.tombstones.iter()
    }

    pub fn len(&self) -> usize {
        self.tombstones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tombstones.is_empty()
    }
}
