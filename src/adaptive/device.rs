//! Device capability detection and tier classification

use crate::config::DeviceConfig;
use serde::{Deserialize, Serialize};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Hardware figures that drive toggle defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub total_memory_bytes: u64,
    pub cpu_cores: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceTier {
    Low,
    Mid,
    High,
}

impl DeviceTier {
    /// Classify by memory; a dual-core-or-smaller CPU is always low tier
    pub fn classify(profile: &DeviceProfile, config: &DeviceConfig) -> Self {
        let memory_gb = profile.total_memory_bytes as f64 / GIB;

        if profile.cpu_cores <= 2 || memory_gb <= config.low_tier_max_memory_gb {
            DeviceTier::Low
        } else if memory_gb <= config.mid_tier_max_memory_gb {
            DeviceTier::Mid
        } else {
            DeviceTier::High
        }
    }
}

/// Source of the device descriptor
pub trait DeviceCapability: Send + Sync {
    /// `None` when the host cannot describe itself
    fn profile(&self) -> Option<DeviceProfile>;
}

/// Fixed device descriptor
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticDevice {
    profile: Option<DeviceProfile>,
}

impl StaticDevice {
    pub fn new(total_memory_bytes: u64, cpu_cores: usize) -> Self {
        Self {
            profile: Some(DeviceProfile {
                total_memory_bytes,
                cpu_cores,
            }),
        }
    }

    pub fn unknown() -> Self {
        Self { profile: None }
    }
}

impl DeviceCapability for StaticDevice {
    fn profile(&self) -> Option<DeviceProfile> {
        self.profile
    }
}

/// Device descriptor read through `sysinfo`
#[cfg(feature = "monitoring")]
#[derive(Debug, Default)]
pub struct SysinfoDevice;

#[cfg(feature = "monitoring")]
impl DeviceCapability for SysinfoDevice {
    fn profile(&self) -> Option<DeviceProfile> {
        use sysinfo::SystemExt;

        let mut system = sysinfo::System::new();
        system.refresh_memory();
        let total_memory_bytes = system.total_memory();
        if total_memory_bytes == 0 {
            return None;
        }

        Some(DeviceProfile {
            total_memory_bytes,
            cpu_cores: num_cpus::get(),
        })
    }
}
