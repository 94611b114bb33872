//! Process memory monitoring with low-memory mode detection
//!
//! The monitor has two states. It enters [`MemoryState::LowMemory`] when a
//! sample exceeds the configured threshold or the host signals memory
//! pressure, and only returns to [`MemoryState::Normal`] after a fresh
//! sample below threshold with no unconsumed pressure signal.

pub mod host;

pub use host::{HostError, MemoryHost, StaticHost};
#[cfg(feature = "monitoring")]
pub use host::SysinfoHost;

use parking_lot::{Mutex, RwLock};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Raw figures reported by a [`MemoryHost`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// Memory usage at the time of the last sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStatistics {
    pub current_usage_bytes: u64,
    pub total_memory_bytes: u64,
}

impl MemoryStatistics {
    pub fn new(current_usage_bytes: u64, total_memory_bytes: u64) -> Self {
        Self {
            current_usage_bytes,
            total_memory_bytes,
        }
    }

    /// Usage as a percentage of total, clamped to [0, 100]; 0 when total is unknown
    pub fn usage_percentage(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 0.0;
        }
        let pct = self.current_usage_bytes as f64 * 100.0 / self.total_memory_bytes as f64;
        pct.clamp(0.0, 100.0)
    }
}

impl From<MemoryReading> for MemoryStatistics {
    fn from(reading: MemoryReading) -> Self {
        Self::new(reading.used_bytes, reading.total_bytes)
    }
}

impl Serialize for MemoryStatistics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MemoryStatistics", 3)?;
        state.serialize_field("current_usage_bytes", &self.current_usage_bytes)?;
        state.serialize_field("total_memory_bytes", &self.total_memory_bytes)?;
        state.serialize_field("usage_percentage", &self.usage_percentage())?;
        state.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MemoryState {
    #[default]
    Normal,
    LowMemory,
}

/// Something that can give memory back when asked
pub trait CleanupTarget: Send + Sync {
    fn name(&self) -> &str;

    /// Release whatever is not strictly needed. Returns items released.
    fn release(&self) -> u64;
}

/// Outcome of [`MemoryMonitor::perform_manual_cleanup`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub targets: usize,
    pub items_released: u64,
}

#[derive(Debug, Default)]
struct MonitorState {
    last: Option<MemoryStatistics>,
    mode: MemoryState,
    pressure_pending: bool,
    failed_samples: u64,
}

/// Samples host memory and tracks low-memory mode
pub struct MemoryMonitor {
    host: Arc<dyn MemoryHost>,
    threshold_percent: f64,
    state: Mutex<MonitorState>,
    cleanup_targets: RwLock<Vec<Weak<dyn CleanupTarget>>>,
}

impl MemoryMonitor {
    pub fn new(host: Arc<dyn MemoryHost>, threshold_percent: f64) -> Self {
        Self {
            host,
            threshold_percent,
            state: Mutex::new(MonitorState::default()),
            cleanup_targets: RwLock::new(Vec::new()),
        }
    }

    /// Query the host and update low-memory mode.
    ///
    /// When the host cannot report, the previous statistic (or zero) is
    /// returned and the mode is left untouched.
    pub fn sample(&self) -> MemoryStatistics {
        let reading = self.host.read_memory();
        let mut state = self.state.lock();

        let stats = match reading {
            Ok(reading) => MemoryStatistics::from(reading),
            Err(e) => {
                state.failed_samples += 1;
                warn!(
                    host = self.host.host_name(),
                    failed_samples = state.failed_samples,
                    "memory measurement unavailable: {}",
                    e
                );
                return state.last.unwrap_or_default();
            }
        };

        let usage = stats.usage_percentage();
        let had_pending = std::mem::take(&mut state.pressure_pending);
        let previous = state.mode;

        if usage > self.threshold_percent {
            state.mode = MemoryState::LowMemory;
        } else if !had_pending {
            state.mode = MemoryState::Normal;
        }

        match (previous, state.mode) {
            (MemoryState::Normal, MemoryState::LowMemory) => warn!(
                usage_percentage = usage,
                threshold = self.threshold_percent,
                "entering low-memory mode"
            ),
            (MemoryState::LowMemory, MemoryState::Normal) => {
                info!(usage_percentage = usage, "memory pressure recovered")
            }
            _ => debug!(usage_percentage = usage, mode = ?state.mode, "memory sampled"),
        }

        state.last = Some(stats);
        stats
    }

    /// Host callback for a system-level memory-pressure event
    pub fn signal_memory_pressure(&self) {
        let mut state = self.state.lock();
        state.pressure_pending = true;
        if state.mode != MemoryState::LowMemory {
            warn!("host signalled memory pressure, entering low-memory mode");
        }
        state.mode = MemoryState::LowMemory;
    }

    pub fn is_low_memory_mode(&self) -> bool {
        self.state.lock().mode == MemoryState::LowMemory
    }

    pub fn state(&self) -> MemoryState {
        self.state.lock().mode
    }

    pub fn pressure_pending(&self) -> bool {
        self.state.lock().pressure_pending
    }

    /// Most recent successful sample, without querying the host
    pub fn latest(&self) -> Option<MemoryStatistics> {
        self.state.lock().last
    }

    pub fn threshold_percent(&self) -> f64 {
        self.threshold_percent
    }

    /// Register a target without keeping it alive. Targets dropped by their
    /// owner are forgotten at the next cleanup.
    pub fn register_cleanup_target<T>(&self, target: &Arc<T>)
    where
        T: CleanupTarget + 'static,
    {
        debug!(cleanup_target = target.name(), "registered cleanup target");
        let weak: Weak<dyn CleanupTarget> = Arc::<T>::downgrade(target);
        self.cleanup_targets.write().push(weak);
    }

    /// Number of registered targets that are still alive
    pub fn cleanup_target_count(&self) -> usize {
        self.cleanup_targets
            .read()
            .iter()
            .filter(|target| target.strong_count() > 0)
            .count()
    }

    /// Ask every live target to release what it does not need.
    /// Advisory; never fails.
    pub fn perform_manual_cleanup(&self) -> CleanupReport {
        let targets: Vec<Arc<dyn CleanupTarget>> = {
            let mut registered = self.cleanup_targets.write();
            registered.retain(|target| target.strong_count() > 0);
            registered.iter().filter_map(Weak::upgrade).collect()
        };
        let mut report = CleanupReport {
            targets: targets.len(),
            items_released: 0,
        };

        for target in &targets {
            let released = target.release();
            debug!(cleanup_target = target.name(), released, "cleanup target released");
            report.items_released += released;
        }

        info!(
            targets = report.targets,
            items_released = report.items_released,
            "manual cleanup complete"
        );
        report
    }

    /// Sample on a fixed interval until `shutdown` turns true or its sender drops
    pub fn spawn_sampler(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sample();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("memory sampler stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
