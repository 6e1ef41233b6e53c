//! Error types for healthgraph.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions. Cycles are never errors; they surface only through
//! cycle detection.

use thiserror::Error;

use crate::node::CheckError;

/// Validation errors raised before any state is created.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Node name cannot be empty")]
    EmptyNodeName,

    #[error("A node named '{name}' already exists in this registry")]
    DuplicateNodeName {
        name: String,
    },

    #[error("A graph needs at least one root node")]
    NoRoots,
}

/// Errors raised by edge mutation.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("'{source_name}' already depends on '{target}'")]
    DuplicateDependency {
        source_name: String,
        target: String,
    },

    #[error("Node '{name}' belongs to a different registry")]
    ForeignNode {
        name: String,
    },
}

/// Errors raised by strict graph lookups.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Node not found in graph: {name}")]
    NodeNotFound {
        name: String,
    },
}

/// Errors raised by subscription streams.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Stream disconnected")]
    Disconnected,

    #[error("Stream receive timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for healthgraph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Intrinsic check of '{node}' failed: {source}")]
    CheckFailed {
        node: String,
        #[source]
        source: CheckError,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl GraphError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a topology error.
    #[must_use]
    pub const fn is_topology(&self) -> bool {
        matches!(self, Self::Topology(_))
    }

    /// Returns true if this is a lookup error.
    #[must_use]
    pub const fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup(_))
    }

    /// Returns true if an intrinsic check failed.
    #[must_use]
    pub const fn is_check_failure(&self) -> bool {
        matches!(self, Self::CheckFailed { .. })
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for healthgraph operations.
pub type GraphResult<T> = Result<T, GraphError>;

pub(crate) fn lock_err(context: &'static str) -> GraphError {
    GraphError::internal(format!("poisoned lock: {context}"))
}
