//! Perfwatch - in-process performance telemetry and self-tuning
//!
//! The crate is a set of small components wired together by a
//! [`TelemetryContext`]:
//! - cache: counters fed by instrumented caches, and derived hit-rate statistics
//! - memory: host memory sampling, low-memory mode and manual cleanup
//! - probe: the performance probe suite and its sequential orchestrator
//! - adaptive: feature toggles, device profiles and optimization suggestions
//! - broker: read-only snapshots for whatever renders the numbers
//!
//! Nothing is global. Callers own the context and poll it at whatever rate
//! suits them.

pub mod adaptive;
pub mod broker;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod memory;
pub mod probe;

pub use adaptive::{
    AdaptiveConfig, AdaptiveConfigState, DeviceCapability, DeviceProfile, DeviceTier,
    FileSettingsStore, InMemorySettingsStore, SettingsStore, StaticDevice, Suggestion, Toggle,
};
pub use broker::{PollingSnapshotBroker, TelemetrySnapshot};
pub use cache::{CacheObserver, CacheStatistics, CacheStatisticsAggregator, TtlCache};
pub use config::Config;
pub use context::TelemetryContext;
pub use error::{Error, Result};
pub use memory::{
    CleanupReport, CleanupTarget, MemoryHost, MemoryMonitor, MemoryState, MemoryStatistics,
    StaticHost,
};
pub use probe::{
    FnProbe, PerformanceProbe, PerformanceTestResult, ProbeFailure, RunEvent, RunEvents,
    TestOrchestrator, TestRunSession,
};
