//! Optional shape restrictions for keys and values.
//!
//! When a restriction is set, mutations whose key or value carries another
//! shape are rejected before they reach the store.

use crate::{error::Result, Error, RecordKey, RecordValue, SchemaField, ShapeId};
use serde::{Deserialize, Serialize};

/// Gate checking key and value shapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaEnforcer {
    /// Only keys of this shape are accepted
    #[serde(default)]
    pub allowed_key_shape: Option<ShapeId>,
    /// Only values of this shape are accepted
    #[serde(default)]
    pub allowed_value_shape: Option<ShapeId>,
}

impl SchemaEnforcer {
    /// An enforcer that accepts everything.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Builder-style key restriction.
    pub fn with_key_shape(mut self, shape: ShapeId) -> Self {
        self.allowed_key_shape = Some(shape);
        self
    }

    /// Builder-style value restriction.
    pub fn with_value_shape(mut self, shape: ShapeId) -> Self {
        self.allowed_value_shape = Some(shape);
        self
    }

    pub fn set_allowed_key_shape(&mut self, shape: Option<ShapeId>) {
        self.allowed_key_shape = shape;
    }

    pub fn set_allowed_value_shape(&mut self, shape: Option<ShapeId>) {
        self.allowed_value_shape = shape;
    }

    /// Whether any restriction is configured.
    pub fn is_restricted(&self) -> bool {
        self.allowed_key_shape.is_some() || self.allowed_value_shape.is_some()
    }

    /// Check a key/value pair. The key is checked first.
    pub fn validate(&self, key: &RecordKey, value: &RecordValue) -> Result<()> {
        check(SchemaField::Key, self.allowed_key_shape, key.shape())?;
        check(SchemaField::Value, self.allowed_value_shape, value.shape())
    }
}

fn check(field: SchemaField, allowed: Option<ShapeId>, actual: ShapeId) -> Result<()> {
    match allowed {
        Some(expected) if expected != actual => Err(Error::SchemaViolation {
            field,
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}
