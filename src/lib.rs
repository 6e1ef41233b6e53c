//! # healthgraph - Dependency-aware service health
//!
//! healthgraph models the operational health of interdependent services as a
//! directed graph. Every node combines its own check result with the health of
//! everything it depends on, weighted by how important each dependency is.
//!
//! ## Core Concepts
//!
//! - **Node**: A named service with an intrinsic check and weighted dependency edges
//! - **Importance**: How a dependency's status reaches the node depending on it
//! - **Graph**: A materialized view over one or more roots that serializes
//!   propagation waves, caches the current report and streams changes
//! - **Poller**: Timer loop re-probing a graph whose checks change silently
//!
//! ## Usage
//!
//! ```rust
//! use healthgraph::{Graph, HealthEvaluation, HealthRegistry, HealthStatus, Importance};
//!
//! let registry = HealthRegistry::new();
//! let payment = registry.check_node("payment", || HealthEvaluation::unhealthy("gateway timeout"))?;
//! let fraud = registry.healthy_node("fraud")?;
//! let checkout = registry.aggregation_node("checkout")?;
//! checkout
//!     .depends_on(&payment, Importance::Required)?
//!     .depends_on(&fraud, Importance::Important)?;
//!
//! let graph = Graph::new(&[checkout])?;
//! let report = graph.create_report();
//! assert_eq!(report.get("checkout").unwrap().status, HealthStatus::Unhealthy);
//! # Ok::<(), healthgraph::GraphError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregate;
pub mod error;
pub mod graph;
pub mod node;
pub mod poller;
pub mod status;
pub mod stream;

mod walk;

// Re-export primary types at crate root for convenience
pub use aggregate::{aggregate, DependencyInput};
pub use error::{GraphError, GraphResult, LookupError, StreamError, TopologyError, ValidationError};
pub use graph::{
	Graph, GraphConfig, GraphId, NodeReport, Report, StatusChange, TopologyChange, TreeNode,
	TreeSnapshot,
};
pub use node::{CheckError, CheckResult, Dependency, HealthRegistry, Node, NodeId, NodeKind};
pub use poller::{Poller, PollerConfig};
pub use status::{HealthEvaluation, HealthStatus, Importance};
pub use stream::{Subscription, SubscriptionId};
