//! Health status values and edge importance.
//!
//! `HealthStatus` is ordered worst-is-highest so that aggregation is a plain
//! maximum over contributions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Health of a single node.
///
/// Ordering: `Healthy < Unknown < Degraded < Unhealthy`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Fully operational.
    #[default]
    Healthy,
    /// Status could not be determined.
    Unknown,
    /// Operational with reduced capability.
    Degraded,
    /// Not operational.
    Unhealthy,
}

impl HealthStatus {
    /// Returns the worse of two statuses.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }

    /// Returns true for `Healthy`.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unknown => write!(f, "unknown"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// How strongly a dependency's status affects the node that depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    /// The dependency's status passes through unchanged.
    Required,
    /// An unhealthy dependency only degrades the parent.
    Important,
    /// The dependency never affects the parent.
    Optional,
    /// Redundant peer: unhealthy degrades the parent as long as some other
    /// resilient dependency of the same parent is healthy.
    Resilient,
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::Important => write!(f, "important"),
            Self::Optional => write!(f, "optional"),
            Self::Resilient => write!(f, "resilient"),
        }
    }
}

/// Result of one intrinsic check or one aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HealthEvaluation {
    /// Effective status.
    pub status: HealthStatus,
    /// Why the status is not healthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HealthEvaluation {
    /// Creates an evaluation.
    #[must_use]
    pub const fn new(status: HealthStatus, reason: Option<String>) -> Self {
        Self { status, reason }
    }

    /// A healthy evaluation without reason.
    #[must_use]
    pub const fn healthy() -> Self {
        Self::new(HealthStatus::Healthy, None)
    }

    /// An unknown evaluation.
    #[must_use]
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unknown, Some(reason.into()))
    }

    /// A degraded evaluation.
    #[must_use]
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded, Some(reason.into()))
    }

    /// An unhealthy evaluation.
    #[must_use]
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, Some(reason.into()))
    }

    /// Returns true if the status is `Healthy`.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}
