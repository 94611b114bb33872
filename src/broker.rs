//! Read-only telemetry snapshots for presentation layers
//!
//! The broker holds no state of its own. Every snapshot is assembled from
//! the live components at call time; the caller decides how often to poll.

use crate::adaptive::{AdaptiveConfig, AdaptiveConfigState};
use crate::cache::{CacheStatistics, CacheStatisticsAggregator};
use crate::memory::{MemoryMonitor, MemoryState, MemoryStatistics};
use crate::probe::{TestOrchestrator, TestRunSession};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Composite view of every telemetry component
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub memory: MemoryStatistics,
    pub memory_state: MemoryState,
    pub cache: CacheStatistics,
    /// `None` until the first run starts
    pub session: Option<TestRunSession>,
    pub toggles: AdaptiveConfigState,
    pub taken_at: DateTime<Utc>,
}

impl TelemetrySnapshot {
    pub fn is_low_memory(&self) -> bool {
        self.memory_state == MemoryState::LowMemory
    }
}

#[derive(Clone)]
pub struct PollingSnapshotBroker {
    memory: Arc<MemoryMonitor>,
    cache: Arc<CacheStatisticsAggregator>,
    orchestrator: Arc<TestOrchestrator>,
    adaptive: Arc<AdaptiveConfig>,
}

impl PollingSnapshotBroker {
    pub fn new(
        memory: Arc<MemoryMonitor>,
        cache: Arc<CacheStatisticsAggregator>,
        orchestrator: Arc<TestOrchestrator>,
        adaptive: Arc<AdaptiveConfig>,
    ) -> Self {
        Self {
            memory,
            cache,
            orchestrator,
            adaptive,
        }
    }

    /// Assemble a snapshot from current state.
    ///
    /// Reads the last memory sample rather than taking a new one, and copies
    /// the orchestrator session without waiting for a live run.
    pub fn current_snapshot(&self) -> TelemetrySnapshot {
        let session = self.orchestrator.session();
        let session = session.started_at.is_some().then_some(session);

        TelemetrySnapshot {
            memory: self.memory.latest().unwrap_or_default(),
            memory_state: self.memory.state(),
            cache: self.cache.snapshot(),
            session,
            toggles: self.adaptive.state(),
            taken_at: Utc::now(),
        }
    }

    /// Publish a snapshot every `interval` until `shutdown` turns true, its
    /// sender drops, or every receiver is gone
    pub fn spawn_poller(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> (watch::Receiver<TelemetrySnapshot>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(self.current_snapshot());
        let broker = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately and the channel already
            // holds that snapshot
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if tx.send(broker.current_snapshot()).is_err() {
                            debug!("snapshot poller stopped: no receivers");
                            break;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("snapshot poller stopped");
                            break;
                        }
                    }
                }
            }
        });

        (rx, handle)
    }
}
