//! Host memory sources
//!
//! [`SysinfoHost`] reads the current process footprint against total system
//! memory. [`StaticHost`] is a scriptable source for embedding hosts that
//! report figures themselves, and for tests.

use super::MemoryReading;
use parking_lot::Mutex;

/// Why the host could not report memory figures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    #[error("Memory figures unavailable: {0}")]
    Unavailable(String),
    #[error("Platform not supported: {0}")]
    PlatformNotSupported(String),
}

/// Source of process and device memory figures
pub trait MemoryHost: Send + Sync {
    fn read_memory(&self) -> Result<MemoryReading, HostError>;

    fn host_name(&self) -> &str;
}

/// Memory host backed by `sysinfo`
#[cfg(feature = "monitoring")]
pub struct SysinfoHost {
    system: Mutex<sysinfo::System>,
    pid: Option<sysinfo::Pid>,
}

#[cfg(feature = "monitoring")]
impl SysinfoHost {
    pub fn new() -> Self {
        use sysinfo::SystemExt;

        Self {
            system: Mutex::new(sysinfo::System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

#[cfg(feature = "monitoring")]
impl Default for SysinfoHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "monitoring")]
impl MemoryHost for SysinfoHost {
    fn read_memory(&self) -> Result<MemoryReading, HostError> {
        use sysinfo::{ProcessExt, SystemExt};

        let pid = self
            .pid
            .ok_or_else(|| HostError::PlatformNotSupported("no current pid".to_string()))?;

        let mut system = self.system.lock();
        system.refresh_memory();
        let total_bytes = system.total_memory();
        if total_bytes == 0 {
            return Err(HostError::Unavailable("total memory reported as zero".to_string()));
        }

        if !system.refresh_process(pid) {
            return Err(HostError::Unavailable(format!("process {} not found", pid)));
        }
        let used_bytes = system
            .process(pid)
            .map(|process| process.memory())
            .ok_or_else(|| HostError::Unavailable(format!("process {} not found", pid)))?;

        Ok(MemoryReading {
            used_bytes,
            total_bytes,
        })
    }

    fn host_name(&self) -> &str {
        "sysinfo"
    }
}

/// Memory host that reports whatever it was last told
#[derive(Debug)]
pub struct StaticHost {
    reading: Mutex<Result<MemoryReading, HostError>>,
}

impl StaticHost {
    pub fn new(used_bytes: u64, total_bytes: u64) -> Self {
        Self {
            reading: Mutex::new(Ok(MemoryReading {
                used_bytes,
                total_bytes,
            })),
        }
    }

    pub fn set_reading(&self, used_bytes: u64, total_bytes: u64) {
        *self.reading.lock() = Ok(MemoryReading {
            used_bytes,
            total_bytes,
        });
    }

    pub fn set_unavailable(&self, reason: impl Into<String>) {
        *self.reading.lock() = Err(HostError::Unavailable(reason.into()));
    }
}

impl MemoryHost for StaticHost {
    fn read_memory(&self) -> Result<MemoryReading, HostError> {
        self.reading.lock().clone()
    }

    fn host_name(&self) -> &str {
        "static"
    }
}
