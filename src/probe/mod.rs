//! Performance probes and the orchestrator that runs them
//!
//! A probe is one named, blocking measurement. The [`TestOrchestrator`]
//! runs a fixed suite of probes strictly one after another and records
//! each outcome in a [`TestRunSession`].

pub mod builtin;
pub mod orchestrator;
pub mod session;

pub use builtin::default_suite;
pub use orchestrator::{RunEvent, RunEvents, TestOrchestrator};
pub use session::{PerformanceTestResult, TestRunSession};

use std::fmt;

/// Why a probe did not succeed. Recorded as data, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{detail}")]
pub struct ProbeFailure {
    pub detail: String,
}

impl ProbeFailure {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// One discrete performance measurement.
///
/// `run` executes on a blocking worker thread and may do real CPU, memory
/// or I/O work. A panic inside `run` is recorded as a failed result.
pub trait PerformanceProbe: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn run(&self) -> Result<(), ProbeFailure>;
}

type ProbeFn = dyn Fn() -> Result<(), ProbeFailure> + Send + Sync;

/// Probe built from a closure
pub struct FnProbe {
    name: String,
    body: Box<ProbeFn>,
}

impl FnProbe {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Result<(), ProbeFailure> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }
}

impl fmt::Debug for FnProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProbe").field("name", &self.name).finish()
    }
}

impl PerformanceProbe for FnProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> Result<(), ProbeFailure> {
        (self.body)()
    }
}
