//! Status aggregation.
//!
//! Aggregation reads only the cached evaluations of direct dependencies. It
//! never recomputes a dependency, which keeps it O(out-degree) and safe on
//! cyclic topologies.

use crate::status::{HealthEvaluation, HealthStatus, Importance};

/// One dependency as seen by the aggregator.
#[derive(Debug, Clone, Copy)]
pub struct DependencyInput<'a> {
    /// Name of the dependency, used to chain reasons.
    pub name: &'a str,
    /// The dependency's cached evaluation.
    pub evaluation: &'a HealthEvaluation,
    /// Importance of the edge.
    pub importance: Importance,
}

/// Computes the effective evaluation of a node.
///
/// The result starts from `intrinsic` and is replaced by a dependency's
/// contribution only when that contribution is strictly worse, so the first
/// worst contribution wins ties.
#[must_use]
pub fn aggregate(intrinsic: &HealthEvaluation, dependencies: &[DependencyInput<'_>]) -> HealthEvaluation {
    let resilient_healthy = dependencies
        .iter()
        .any(|dep| dep.importance == Importance::Resilient && dep.evaluation.is_healthy());

    let mut worst = intrinsic.clone();
    for dep in dependencies {
        let status = contribution(dep.importance, dep.evaluation.status, resilient_healthy);
        if status > worst.status {
            worst = HealthEvaluation::new(status, Some(chain_reason(dep)));
        }
    }
    worst
}

/// Status a dependency passes on to its parent.
#[must_use]
pub fn contribution(importance: Importance, status: HealthStatus, resilient_healthy: bool) -> HealthStatus {
    match importance {
        Importance::Required => status,
        Importance::Important => cap_unhealthy(status),
        Importance::Optional => HealthStatus::Healthy,
        Importance::Resilient if resilient_healthy => cap_unhealthy(status),
        Importance::Resilient => status,
    }
}

const fn cap_unhealthy(status: HealthStatus) -> HealthStatus {
    match status {
        HealthStatus::Unhealthy => HealthStatus::Degraded,
        other => other,
    }
}

fn chain_reason(dep: &DependencyInput<'_>) -> String {
    match dep.evaluation.reason.as_deref() {
        Some(reason) => format!("{}: {reason}", dep.name),
        None => format!("{} is {}", dep.name, dep.evaluation.status),
    }
}
