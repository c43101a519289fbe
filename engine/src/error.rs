//! Error types for the replimap engine.

use crate::{ObserverId, ShapeId, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which half of an entry a schema restriction rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaField {
    Key,
    Value,
}

impl std::fmt::Display for SchemaField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaField::Key => write!(f, "key"),
            SchemaField::Value => write!(f, "value"),
        }
    }
}

/// All possible errors from the replimap engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Typed value errors
    #[error("unknown shape: {0}")]
    UnknownShape(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: ShapeId, actual: ShapeId },

    // Mutation errors
    #[error("schema violation on {field}: expected {expected}, got {actual}")]
    SchemaViolation {
        field: SchemaField,
        expected: ShapeId,
        actual: ShapeId,
    },

    #[error("operation requires authority")]
    NotAuthority,

    #[error("operation requires a replica")]
    NotReplica,

    // Replication errors
    #[error("unknown observer: {0}")]
    UnknownObserver(ObserverId),

    #[error("baseline {baseline} predates retained removal history (compacted through {compacted_through})")]
    StaleBaseline {
        baseline: Version,
        compacted_through: Version,
    },

    #[error("batch target {target} is not newer than baseline {baseline}")]
    OutOfOrderApply { target: Version, baseline: Version },

    #[error("malformed delta batch: {0}")]
    MalformedBatch(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::UnknownShape("quaternion".into());
        assert_eq!(err.to_string(), "unknown shape: quaternion");

        let err = Error::SchemaViolation {
            field: SchemaField::Value,
            expected: ShapeId::Int,
            actual: ShapeId::Text,
        };
        assert_eq!(
            err.to_string(),
            "schema violation on value: expected int, got text"
        );

        let err = Error::StaleBaseline {
            baseline: 3,
            compacted_through: 9,
        };
        assert_eq!(
            err.to_string(),
            "baseline 3 predates retained removal history (compacted through 9)"
        );
    }
}
