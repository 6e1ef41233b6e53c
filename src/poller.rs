//! Timer-driven re-evaluation.
//!
//! Some nodes change state without any edge mutation or explicit refresh
//! (their intrinsic check simply starts returning something else). The poller
//! re-probes a whole graph on a fixed interval. It keeps no report state of its
//! own; duplicate suppression is the graph's job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{GraphError, GraphResult};
use crate::graph::{Graph, Report};

/// Poller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Time between two refreshes.
    pub interval: Duration,
    /// Name of the worker thread.
    pub thread_name: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            thread_name: "healthgraph-poller".to_string(),
        }
    }
}

/// Periodically calls [`Graph::refresh_all`] on a dedicated thread.
///
/// Dropping the poller stops it and waits for an in-flight refresh.
#[derive(Debug)]
pub struct Poller {
    graph: Graph,
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
    ticks: Arc<AtomicU64>,
}

impl Poller {
    /// Starts polling `graph`.
    ///
    /// # Errors
    ///
    /// `GraphError::Internal` if the worker thread cannot be spawned.
    pub fn start(graph: Graph, config: PollerConfig) -> GraphResult<Self> {
        let interval = config.interval.max(Duration::from_millis(1));
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticks = Arc::new(AtomicU64::new(0));

        let worker_graph = graph.clone();
        let worker_ticks = Arc::clone(&ticks);
        let join = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || poll_loop(&worker_graph, interval, stop_rx, &worker_ticks))
            .map_err(|e| GraphError::internal(format!("failed to spawn poller thread: {e}")))?;

        info!(graph = %graph.id(), interval_ms = interval.as_millis() as u64, "poller started");
        Ok(Self {
            graph,
            stop_tx: Some(stop_tx),
            join: Some(join),
            ticks,
        })
    }

    /// Refreshes the graph now, on the calling thread.
    pub fn poll_now(&self) -> GraphResult<Arc<Report>> {
        self.graph.refresh_all()
    }

    /// Number of timer ticks handled so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// The polled graph.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Stops the timer and waits for the worker to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the channel wakes the worker out of its timed wait.
        drop(self.stop_tx.take());
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                warn!(graph = %self.graph.id(), "poller thread panicked");
            }
            info!(graph = %self.graph.id(), ticks = self.ticks(), "poller stopped");
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(graph: &Graph, interval: Duration, stop_rx: Receiver<()>, ticks: &AtomicU64) {
    loop {
        let stopped = select! {
            recv(stop_rx) -> _ => true,
            default(interval) => {
                let tick = ticks.fetch_add(1, Ordering::Relaxed) + 1;
                match graph.refresh_all() {
                    Ok(report) => {
                        debug!(graph = %graph.id(), tick, wave = report.wave, "poll complete");
                    }
                    Err(err) => {
                        warn!(graph = %graph.id(), tick, error = %err, "poll refresh failed");
                    }
                }
                false
            }
        };
        if stopped {
            break;
        }
    }
}
