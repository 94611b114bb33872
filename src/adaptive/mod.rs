//! Adaptive configuration: feature toggles, suggestions and device profiles
//!
//! [`AdaptiveConfig`] exclusively owns the toggle state. Every change goes
//! through [`AdaptiveConfig::set_toggle`] or [`AdaptiveConfig::adjust_for_device`],
//! and each change invokes the [`SettingsStore`] exactly once.

pub mod device;
pub mod suggestions;

pub use device::{DeviceCapability, DeviceProfile, DeviceTier, StaticDevice};
#[cfg(feature = "monitoring")]
pub use device::SysinfoDevice;
pub use suggestions::{derive_suggestions, Suggestion, SuggestionInputs};

use crate::cache::CacheStatisticsAggregator;
use crate::config::{DeviceConfig, SuggestionConfig};
use crate::error::{Error, Result};
use crate::memory::MemoryMonitor;
use crate::probe::TestOrchestrator;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Feature toggle names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Toggle {
    PerformanceMonitoring,
    MemoryWarnings,
    NetworkMonitoring,
    LazyLoading,
    ImageCaching,
    Preloading,
    AnimationOptimization,
}

impl Toggle {
    pub const ALL: [Toggle; 7] = [
        Toggle::PerformanceMonitoring,
        Toggle::MemoryWarnings,
        Toggle::NetworkMonitoring,
        Toggle::LazyLoading,
        Toggle::ImageCaching,
        Toggle::Preloading,
        Toggle::AnimationOptimization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Toggle::PerformanceMonitoring => "performanceMonitoring",
            Toggle::MemoryWarnings => "memoryWarnings",
            Toggle::NetworkMonitoring => "networkMonitoring",
            Toggle::LazyLoading => "lazyLoading",
            Toggle::ImageCaching => "imageCaching",
            Toggle::Preloading => "preloading",
            Toggle::AnimationOptimization => "animationOptimization",
        }
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Toggle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Toggle::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidInput(format!("unknown toggle '{}'", s)))
    }
}

/// Toggle values. All combinations are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdaptiveConfigState {
    pub performance_monitoring: bool,
    pub memory_warnings: bool,
    pub network_monitoring: bool,
    pub lazy_loading: bool,
    pub image_caching: bool,
    pub preloading: bool,
    pub animation_optimization: bool,
}

impl Default for AdaptiveConfigState {
    fn default() -> Self {
        Self {
            performance_monitoring: true,
            memory_warnings: true,
            network_monitoring: true,
            lazy_loading: true,
            image_caching: true,
            preloading: false,
            animation_optimization: true,
        }
    }
}

impl AdaptiveConfigState {
    pub fn get(&self, toggle: Toggle) -> bool {
        match toggle {
            Toggle::PerformanceMonitoring => self.performance_monitoring,
            Toggle::MemoryWarnings => self.memory_warnings,
            Toggle::NetworkMonitoring => self.network_monitoring,
            Toggle::LazyLoading => self.lazy_loading,
            Toggle::ImageCaching => self.image_caching,
            Toggle::Preloading => self.preloading,
            Toggle::AnimationOptimization => self.animation_optimization,
        }
    }

    pub fn set(&mut self, toggle: Toggle, value: bool) {
        let slot = match toggle {
            Toggle::PerformanceMonitoring => &mut self.performance_monitoring,
            Toggle::MemoryWarnings => &mut self.memory_warnings,
            Toggle::NetworkMonitoring => &mut self.network_monitoring,
            Toggle::LazyLoading => &mut self.lazy_loading,
            Toggle::ImageCaching => &mut self.image_caching,
            Toggle::Preloading => &mut self.preloading,
            Toggle::AnimationOptimization => &mut self.animation_optimization,
        };
        *slot = value;
    }

    /// Defaults for a device tier
    pub fn for_tier(tier: DeviceTier) -> Self {
        match tier {
            DeviceTier::Low => Self {
                performance_monitoring: true,
                memory_warnings: true,
                network_monitoring: false,
                lazy_loading: true,
                image_caching: true,
                preloading: false,
                animation_optimization: false,
            },
            DeviceTier::Mid => Self {
                performance_monitoring: true,
                memory_warnings: true,
                network_monitoring: true,
                lazy_loading: true,
                image_caching: true,
                preloading: false,
                animation_optimization: true,
            },
            DeviceTier::High => Self {
                performance_monitoring: true,
                memory_warnings: true,
                network_monitoring: true,
                lazy_loading: true,
                image_caching: true,
                preloading: true,
                animation_optimization: true,
            },
        }
    }

    /// Name/value pairs in declaration order
    pub fn entries(&self) -> Vec<(Toggle, bool)> {
        Toggle::ALL.into_iter().map(|t| (t, self.get(t))).collect()
    }
}

/// Persistence hook for toggle state
pub trait SettingsStore: Send + Sync {
    fn save_settings(&self, state: &AdaptiveConfigState) -> Result<()>;

    fn load_settings(&self) -> Result<Option<AdaptiveConfigState>>;
}

/// Settings store that keeps every saved state in memory
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    saved: Mutex<Vec<AdaptiveConfigState>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saved.lock().len()
    }

    pub fn last_saved(&self) -> Option<AdaptiveConfigState> {
        self.saved.lock().last().copied()
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn save_settings(&self, state: &AdaptiveConfigState) -> Result<()> {
        self.saved.lock().push(*state);
        Ok(())
    }

    fn load_settings(&self) -> Result<Option<AdaptiveConfigState>> {
        Ok(self.last_saved())
    }
}

/// Settings store backed by a JSON file
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn save_settings(&self, state: &AdaptiveConfigState) -> Result<()> {
        let contents = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, contents).map_err(|e| {
            Error::Persistence(format!("failed to write {}: {}", self.path.display(), e))
        })
    }

    fn load_settings(&self) -> Result<Option<AdaptiveConfigState>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }
}

/// Owner of the toggle state and source of optimization suggestions
pub struct AdaptiveConfig {
    state: RwLock<AdaptiveConfigState>,
    store: Arc<dyn SettingsStore>,
    device: Arc<dyn DeviceCapability>,
    memory: Arc<MemoryMonitor>,
    cache: Arc<CacheStatisticsAggregator>,
    orchestrator: Arc<TestOrchestrator>,
    suggestion_config: SuggestionConfig,
    device_config: DeviceConfig,
}

impl AdaptiveConfig {
    /// Restores the last persisted state, or starts from defaults
    pub fn new(
        store: Arc<dyn SettingsStore>,
        device: Arc<dyn DeviceCapability>,
        memory: Arc<MemoryMonitor>,
        cache: Arc<CacheStatisticsAggregator>,
        orchestrator: Arc<TestOrchestrator>,
        suggestion_config: SuggestionConfig,
        device_config: DeviceConfig,
    ) -> Self {
        let initial = match store.load_settings() {
            Ok(Some(state)) => state,
            Ok(None) => AdaptiveConfigState::default(),
            Err(e) => {
                warn!("failed to load persisted toggles, using defaults: {}", e);
                AdaptiveConfigState::default()
            }
        };

        Self {
            state: RwLock::new(initial),
            store,
            device,
            memory,
            cache,
            orchestrator,
            suggestion_config,
            device_config,
        }
    }

    pub fn state(&self) -> AdaptiveConfigState {
        *self.state.read()
    }

    pub fn toggle(&self, toggle: Toggle) -> bool {
        self.state.read().get(toggle)
    }

    /// Set one toggle. Persists and returns true only if the value changed.
    pub fn set_toggle(&self, toggle: Toggle, value: bool) -> bool {
        let updated = {
            let mut state = self.state.write();
            if state.get(toggle) == value {
                return false;
            }
            state.set(toggle, value);
            *state
        };

        info!(toggle = %toggle, value, "toggle changed");
        self.persist(&updated);
        true
    }

    /// Reset every toggle to the profile for the detected device tier.
    /// Unknown devices get the mid-tier profile.
    pub fn adjust_for_device(&self) -> DeviceTier {
        let tier = match self.device.profile() {
            Some(profile) => DeviceTier::classify(&profile, &self.device_config),
            None => {
                warn!("device capability unknown, assuming mid tier");
                DeviceTier::Mid
            }
        };

        let profile = AdaptiveConfigState::for_tier(tier);
        *self.state.write() = profile;

        info!(?tier, "toggles reset to device profile");
        self.persist(&profile);
        tier
    }

    /// Inputs the suggestion rules read right now. Does not sample memory.
    pub fn suggestion_inputs(&self) -> SuggestionInputs {
        let session = self.orchestrator.session();
        let last_score = (session.is_finished()
            && session.error_message.is_none()
            && !session.results.is_empty())
        .then(|| session.overall_score());

        SuggestionInputs {
            memory: self.memory.latest().unwrap_or_default(),
            cache: self.cache.snapshot(),
            toggles: self.state(),
            last_score,
        }
    }

    pub fn suggestions(&self) -> Vec<Suggestion> {
        derive_suggestions(&self.suggestion_inputs(), &self.suggestion_config)
    }

    pub fn optimization_suggestions(&self) -> Vec<String> {
        self.suggestions().iter().map(ToString::to_string).collect()
    }

    fn persist(&self, state: &AdaptiveConfigState) {
        if let Err(e) = self.store.save_settings(state) {
            warn!("failed to persist toggles: {}", e);
        }
    }
}
