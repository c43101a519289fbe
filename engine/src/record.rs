//! Record types: keys, values and store entries.

use crate::{error::Result, Shape, ShapeId, TypedValue, Version};
use serde::{Deserialize, Serialize};

/// Key of a replicated entry.
///
/// Equality and hashing follow the wrapped [`TypedValue`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(TypedValue);

impl RecordKey {
    /// Create a key from anything convertible into a typed value.
    pub fn new(value: impl Into<TypedValue>) -> Self {
        Self(value.into())
    }

    /// Build a key from a shape name and dynamic payload.
    pub fn make(shape: &str, payload: serde_json::Value) -> Result<Self> {
        TypedValue::make(shape, payload).map(Self)
    }

    pub fn shape(&self) -> ShapeId {
        self.0.shape()
    }

    pub fn value(&self) -> &TypedValue {
        &self.0
    }

    pub fn get_as<S: Shape>(&self) -> Option<&S> {
        self.0.get_as()
    }
}

impl From<TypedValue> for RecordKey {
    fn from(value: TypedValue) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Payload of a replicated entry. Replaced wholesale on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordValue(TypedValue);

impl RecordValue {
    /// Create a value from anything convertible into a typed value.
    pub fn new(value: impl Into<TypedValue>) -> Self {
        Self(value.into())
    }

    /// Build a value from a shape name and dynamic payload.
    pub fn make(shape: &str, payload: serde_json::Value) -> Result<Self> {
        TypedValue::make(shape, payload).map(Self)
    }

    pub fn shape(&self) -> ShapeId {
        self.0.shape()
    }

    pub fn value(&self) -> &TypedValue {
        &self.0
    }

    pub fn get_as<S: Shape>(&self) -> Option<&S> {
        self.0.get_as()
    }

    pub fn try_get_as<S: Shape>(&self) -> Result<&S> {
        self.0.try_get_as()
    }
}

impl From<TypedValue> for RecordValue {
    fn from(value: TypedValue) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for RecordValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// How a changed entry relates to what the receiver already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Updated,
}

/// A single entry in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub key: RecordKey,
    pub value: RecordValue,
    /// Store version at which this entry was created or last changed
    pub replication_version: Version,
}

impl Entry {
    /// Create a new entry.
    pub fn new(key: RecordKey, value: RecordValue, replication_version: Version) -> Self {
        Self {
            key,
            value,
            replication_version,
        }
    }

    /// Replace the value and stamp the new version.
    pub fn update_value(&mut self, value: RecordValue, replication_version: Version) {
        self.value = value;
        self.replication_version = replication_version;
    }

    /// Whether this entry changed after `baseline`.
    pub fn is_newer_than(&self, baseline: Version) -> bool {
        self.replication_version > baseline
    }
}
