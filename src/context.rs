//! Composition root
//!
//! One instance of every telemetry component per context, shared by
//! reference. Nothing here is global.

use crate::adaptive::{AdaptiveConfig, DeviceCapability, SettingsStore};
use crate::broker::{PollingSnapshotBroker, TelemetrySnapshot};
use crate::cache::{CacheStatisticsAggregator, TtlCache};
use crate::config::Config;
use crate::error::Result;
use crate::memory::{MemoryHost, MemoryMonitor};
use crate::probe::{PerformanceProbe, TestOrchestrator};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

pub struct TelemetryContext {
    config: Config,
    memory: Arc<MemoryMonitor>,
    cache: Arc<CacheStatisticsAggregator>,
    orchestrator: Arc<TestOrchestrator>,
    adaptive: Arc<AdaptiveConfig>,
}

impl TelemetryContext {
    /// Wire the components together. Fails if `config` is invalid or two
    /// probes share a name.
    pub fn new(
        config: Config,
        host: Arc<dyn MemoryHost>,
        device: Arc<dyn DeviceCapability>,
        store: Arc<dyn SettingsStore>,
        probes: Vec<Arc<dyn PerformanceProbe>>,
    ) -> Result<Self> {
        config.validate()?;

        let memory = Arc::new(MemoryMonitor::new(
            host,
            config.memory.low_memory_threshold_percent,
        ));
        let cache = Arc::new(CacheStatisticsAggregator::new());
        let orchestrator = Arc::new(
            TestOrchestrator::new(probes)?.with_probe_timeout(config.probes.probe_timeout),
        );
        let adaptive = Arc::new(AdaptiveConfig::new(
            store,
            device,
            memory.clone(),
            cache.clone(),
            orchestrator.clone(),
            config.suggestions.clone(),
            config.device.clone(),
        ));

        info!(
            threshold = config.memory.low_memory_threshold_percent,
            probes = orchestrator.probe_names().len(),
            "telemetry context ready"
        );

        Ok(Self {
            config,
            memory,
            cache,
            orchestrator,
            adaptive,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryMonitor> {
        &self.memory
    }

    pub fn cache_statistics(&self) -> &Arc<CacheStatisticsAggregator> {
        &self.cache
    }

    pub fn orchestrator(&self) -> &Arc<TestOrchestrator> {
        &self.orchestrator
    }

    pub fn adaptive(&self) -> &Arc<AdaptiveConfig> {
        &self.adaptive
    }

    pub fn broker(&self) -> PollingSnapshotBroker {
        PollingSnapshotBroker::new(
            self.memory.clone(),
            self.cache.clone(),
            self.orchestrator.clone(),
            self.adaptive.clone(),
        )
    }

    /// Create a cache that reports into the shared aggregator and is shed by
    /// manual cleanup
    pub fn instrumented_cache<K, V>(&self, name: &str) -> Arc<TtlCache<K, V>>
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Send + 'static,
    {
        let cache = Arc::new(TtlCache::new(
            name,
            self.config.cache.max_entries,
            self.config.cache.default_ttl,
            self.cache.clone(),
        ));
        self.memory.register_cleanup_target(&cache);
        cache
    }

    /// Start the background memory sampler at the configured interval
    pub fn spawn_sampler(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.memory
            .clone()
            .spawn_sampler(self.config.memory.sample_interval, shutdown)
    }

    /// Publish snapshots at the configured broker interval
    pub fn spawn_poller(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> (watch::Receiver<TelemetrySnapshot>, JoinHandle<()>) {
        self.broker()
            .spawn_poller(self.config.broker.poll_interval, shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::{InMemorySettingsStore, StaticDevice};
    use crate::error::Error;
    use crate::memory::StaticHost;

    fn context(config: Config) -> Result<TelemetryContext> {
        TelemetryContext::new(
            config,
            Arc::new(StaticHost::new(1, 4)),
            Arc::new(StaticDevice::unknown()),
            Arc::new(InMemorySettingsStore::new()),
            Vec::new(),
        )
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.memory.low_memory_threshold_percent = 120.0;
        assert!(matches!(context(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_instrumented_cache_reports_and_cleans_up() {
        let ctx = context(Config::default()).unwrap();
        let cache = ctx.instrumented_cache::<String, u32>("icons");

        cache.insert("home".to_string(), 1);
        cache.insert("settings".to_string(), 2);
        assert_eq!(cache.get(&"home".to_string()), Some(1));
        assert_eq!(cache.get(&"missing".to_string()), None);

        let stats = ctx.cache_statistics().snapshot();
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.hit_rate, 0.5);

        let report = ctx.memory().perform_manual_cleanup();
        assert_eq!(report.targets, 1);
        assert_eq!(report.items_released, 2);
        assert!(cache.is_empty());
        assert_eq!(ctx.cache_statistics().snapshot().total_items, 0);
    }

    #[test]
    fn test_dropped_cache_is_not_kept_alive() {
        let ctx = context(Config::default()).unwrap();
        let kept = ctx.instrumented_cache::<u32, u32>("kept");
        drop(ctx.instrumented_cache::<u32, u32>("scratch"));

        assert_eq!(Arc::strong_count(&kept), 1);
        assert_eq!(ctx.memory().cleanup_target_count(), 1);
        assert_eq!(ctx.memory().perform_manual_cleanup().targets, 1);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let probe = || -> Arc<dyn PerformanceProbe> {
            Arc::new(crate::probe::FnProbe::new("same", || Ok(())))
        };
        let result = TelemetryContext::new(
            Config::default(),
            Arc::new(StaticHost::new(1, 4)),
            Arc::new(StaticDevice::unknown()),
            Arc::new(InMemorySettingsStore::new()),
            vec![probe(), probe()],
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_uses_configured_interval() {
        let mut config = Config::default();
        config.broker.poll_interval = std::time::Duration::from_secs(5);
        let ctx = context(config).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut snapshots, handle) = ctx.spawn_poller(shutdown_rx);
        let first = snapshots.borrow_and_update().taken_at;

        ctx.cache_statistics().record_miss();
        let started = tokio::time::Instant::now();
        snapshots.changed().await.unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_secs(5));
        assert!(snapshots.borrow().taken_at >= first);
        assert_eq!(snapshots.borrow().cache.miss_count, 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_memory_threshold_comes_from_config() {
        let mut config = Config::default();
        config.memory.low_memory_threshold_percent = 20.0;
        let ctx = context(config).unwrap();

        ctx.memory().sample();
        assert!(ctx.memory().is_low_memory_mode());
        assert!(ctx.broker().current_snapshot().is_low_memory());
    }
}
