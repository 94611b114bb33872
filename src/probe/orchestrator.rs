//! Sequential probe orchestration
//!
//! At most one run is live at a time. Probes execute in declaration order on
//! a blocking worker, one at a time: a probe that overruns the watchdog is
//! recorded as timed out, but the next one starts only after its worker
//! returns. Cancellation is checked only between probes. Readers poll the
//! live session through the accessor methods.

use super::session::{PerformanceTestResult, TestRunSession};
use super::PerformanceProbe;
use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Progress notification emitted while a run executes
#[derive(Debug, Clone, Serialize)]
pub enum RunEvent {
    Started { session_id: Uuid, total: usize },
    ProbeStarted { index: usize, name: String },
    ProbeFinished { result: PerformanceTestResult, progress: f64 },
    /// Terminal event carrying the frozen session
    Finished(TestRunSession),
}

/// Receiving side of a run started with [`TestOrchestrator::run_all`]
#[derive(Debug)]
pub struct RunEvents {
    rx: mpsc::UnboundedReceiver<RunEvent>,
}

impl RunEvents {
    pub async fn next(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    /// Drain remaining events and return the frozen session
    pub async fn finished(mut self) -> Option<TestRunSession> {
        while let Some(event) = self.rx.recv().await {
            if let RunEvent::Finished(session) = event {
                return Some(session);
            }
        }
        None
    }
}

enum ProbeOutcome {
    Completed(PerformanceTestResult),
    /// The worker was torn down underneath us; the run cannot continue
    Aborted(String),
}

#[derive(Debug)]
struct RunState {
    session: RwLock<TestRunSession>,
    running: AtomicBool,
    cancel_requested: AtomicBool,
}

/// Holds the orchestrator busy for one run.
///
/// Dropping it without [`RunGuard::settle`] (the caller dropped the run
/// future, or the runtime tore down the task) freezes the session as
/// abandoned so the orchestrator never stays stuck in a running state.
struct RunGuard {
    state: Arc<RunState>,
    settled: bool,
}

impl RunGuard {
    /// Freeze the session and release the orchestrator under one lock
    fn settle(mut self, update: impl FnOnce(&mut TestRunSession)) -> TestRunSession {
        self.settled = true;
        let mut session = self.state.session.write();
        update(&mut session);
        session.is_running = false;
        session.current_test_name.clear();
        session.finished_at = Some(Utc::now());
        self.state.running.store(false, Ordering::Release);
        session.clone()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut session = self.state.session.write();
        warn!(
            session_id = %session.session_id,
            completed = session.results.len(),
            "performance run abandoned before completion"
        );
        session.is_running = false;
        session.cancelled = true;
        session.current_test_name.clear();
        session.error_message = Some("run abandoned before completion".to_string());
        session.finished_at = Some(Utc::now());
        self.state.running.store(false, Ordering::Release);
    }
}

/// Runs the probe suite and owns the current [`TestRunSession`]
pub struct TestOrchestrator {
    probes: Vec<Arc<dyn PerformanceProbe>>,
    state: Arc<RunState>,
    probe_timeout: Option<Duration>,
    #[cfg(test)]
    injected_start_failure: parking_lot::Mutex<Option<String>>,
}

impl TestOrchestrator {
    /// Probe names must be unique; a duplicate is rejected with
    /// [`Error::InvalidInput`].
    pub fn new(probes: Vec<Arc<dyn PerformanceProbe>>) -> Result<Self> {
        {
            let mut seen = HashSet::new();
            for probe in &probes {
                if !seen.insert(probe.name()) {
                    return Err(Error::InvalidInput(format!(
                        "duplicate probe name '{}'",
                        probe.name()
                    )));
                }
            }
        }

        Ok(Self {
            probes,
            state: Arc::new(RunState {
                session: RwLock::new(TestRunSession::idle()),
                running: AtomicBool::new(false),
                cancel_requested: AtomicBool::new(false),
            }),
            probe_timeout: None,
            #[cfg(test)]
            injected_start_failure: parking_lot::Mutex::new(None),
        })
    }

    /// Record a probe as failed with detail `"timeout"` once it runs past
    /// `timeout`. The worker cannot be interrupted, so the run still waits
    /// for it to return before starting the next probe.
    pub fn with_probe_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn probe_names(&self) -> Vec<String> {
        self.probes.iter().map(|p| p.name().to_string()).collect()
    }

    /// Start a run on the current tokio runtime and stream its progress.
    ///
    /// Rejected with [`Error::RunInProgress`] while another run is live.
    pub fn run_all(self: &Arc<Self>) -> Result<RunEvents> {
        let guard = self.begin()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.execute(guard, Some(tx)).await;
        });

        Ok(RunEvents { rx })
    }

    /// Run the suite on the calling task and return the frozen session.
    ///
    /// Dropping the future mid-run abandons the run: the session is frozen
    /// with `cancelled` and an error message, and a new run may start.
    pub async fn run_to_completion(&self) -> Result<TestRunSession> {
        let guard = self.begin()?;
        Ok(self.execute(guard, None).await)
    }

    /// Request cooperative cancellation; takes effect before the next probe
    pub fn cancel(&self) {
        if self.state.running.load(Ordering::Acquire) {
            info!("performance run cancellation requested");
            self.state.cancel_requested.store(true, Ordering::Release);
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.session.read().is_running
    }

    pub fn current_test_name(&self) -> String {
        self.state.session.read().current_test_name.clone()
    }

    pub fn progress(&self) -> f64 {
        self.state.session.read().progress
    }

    pub fn results(&self) -> Vec<PerformanceTestResult> {
        self.state.session.read().results.clone()
    }

    pub fn error_message(&self) -> Option<String> {
        self.state.session.read().error_message.clone()
    }

    /// Copy of the live or last session
    pub fn session(&self) -> TestRunSession {
        self.state.session.read().clone()
    }

    pub fn overall_score(&self) -> f64 {
        self.state.session.read().overall_score()
    }

    pub fn average_duration(&self) -> f64 {
        self.state.session.read().average_duration()
    }

    fn begin(&self) -> Result<RunGuard> {
        if self
            .state
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("rejected performance run: another run is in progress");
            return Err(Error::RunInProgress);
        }

        self.state.cancel_requested.store(false, Ordering::Release);
        *self.state.session.write() = TestRunSession::start(self.probes.len());
        Ok(RunGuard {
            state: Arc::clone(&self.state),
            settled: false,
        })
    }

    async fn execute(
        &self,
        guard: RunGuard,
        events: Option<mpsc::UnboundedSender<RunEvent>>,
    ) -> TestRunSession {
        let total = self.probes.len();
        let session_id = self.state.session.read().session_id;
        info!(%session_id, total, "performance run started");
        emit(&events, RunEvent::Started { session_id, total });

        if let Err(e) = self.reserve_results(total) {
            return self.fail(guard, e.to_string(), &events);
        }

        let mut cancelled = false;
        for (index, probe) in self.probes.iter().enumerate() {
            if self.state.cancel_requested.load(Ordering::Acquire) {
                cancelled = true;
                break;
            }

            let name = probe.name().to_string();
            self.state.session.write().current_test_name = name.clone();
            emit(&events, RunEvent::ProbeStarted { index, name });

            let result = match self.run_probe(probe).await {
                ProbeOutcome::Completed(result) => result,
                ProbeOutcome::Aborted(reason) => return self.fail(guard, reason, &events),
            };

            if result.success {
                debug!(probe = %result.test_name, duration = result.duration, "probe passed");
            } else {
                warn!(
                    probe = %result.test_name,
                    duration = result.duration,
                    detail = result.failure_detail.as_deref().unwrap_or_default(),
                    "probe failed"
                );
            }

            let progress = (index + 1) as f64 / total as f64;
            {
                let mut session = self.state.session.write();
                session.results.push(result.clone());
                session.progress = progress;
            }
            emit(&events, RunEvent::ProbeFinished { result, progress });
        }

        let finished = guard.settle(|session| {
            session.cancelled = cancelled;
            if !cancelled {
                session.progress = 1.0;
            }
        });

        info!(
            %session_id,
            completed = finished.results.len(),
            cancelled,
            score = finished.overall_score(),
            "performance run finished"
        );
        emit(&events, RunEvent::Finished(finished.clone()));
        finished
    }

    fn reserve_results(&self, total: usize) -> Result<()> {
        if let Some(reason) = self.take_injected_start_failure() {
            return Err(Error::ResourceExhausted(reason));
        }
        let reserved = self.state.session.write().results.try_reserve_exact(total);
        reserved.map_err(Error::from)
    }

    #[cfg(test)]
    fn inject_start_failure(&self, reason: &str) {
        *self.injected_start_failure.lock() = Some(reason.to_string());
    }

    #[cfg(test)]
    fn take_injected_start_failure(&self) -> Option<String> {
        self.injected_start_failure.lock().take()
    }

    #[cfg(not(test))]
    fn take_injected_start_failure(&self) -> Option<String> {
        None
    }

    async fn run_probe(&self, probe: &Arc<dyn PerformanceProbe>) -> ProbeOutcome {
        let name = probe.name().to_string();
        let worker_probe = Arc::clone(probe);
        let started = Instant::now();
        let mut handle = tokio::task::spawn_blocking(move || worker_probe.run());

        let joined = match self.probe_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    warn!(probe = %name, ?limit, "probe overran watchdog, waiting for its worker");
                    if let Err(join_error) = handle.await {
                        if !join_error.is_panic() {
                            return ProbeOutcome::Aborted(format!(
                                "probe worker for '{}' lost: {}",
                                name, join_error
                            ));
                        }
                    }
                    return ProbeOutcome::Completed(PerformanceTestResult::failed(
                        name, elapsed, "timeout",
                    ));
                }
            },
            None => handle.await,
        };
        let elapsed = started.elapsed().as_secs_f64();

        match joined {
            Ok(Ok(())) => ProbeOutcome::Completed(PerformanceTestResult::passed(name, elapsed)),
            Ok(Err(failure)) => {
                ProbeOutcome::Completed(PerformanceTestResult::failed(name, elapsed, failure.detail))
            }
            Err(join_error) if join_error.is_panic() => {
                let detail = format!("panicked: {}", panic_message(join_error.into_panic()));
                ProbeOutcome::Completed(PerformanceTestResult::failed(name, elapsed, detail))
            }
            Err(join_error) => {
                ProbeOutcome::Aborted(format!("probe worker for '{}' lost: {}", name, join_error))
            }
        }
    }

    fn fail(
        &self,
        guard: RunGuard,
        reason: String,
        events: &Option<mpsc::UnboundedSender<RunEvent>>,
    ) -> TestRunSession {
        error!(reason = %reason, "performance run failed");

        let failed = guard.settle(|session| {
            session.results.clear();
            session.error_message = Some(reason);
        });

        emit(events, RunEvent::Finished(failed.clone()));
        failed
    }
}

fn emit(events: &Option<mpsc::UnboundedSender<RunEvent>>, event: RunEvent) {
    if let Some(tx) = events {
        // A dropped receiver only means nobody is watching
        let _ = tx.send(event);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{FnProbe, ProbeFailure};

    fn passing(name: &str) -> Arc<dyn PerformanceProbe> {
        Arc::new(FnProbe::new(name, || Ok(())))
    }

    fn sleeping(name: &str, millis: u64) -> Arc<dyn PerformanceProbe> {
        Arc::new(FnProbe::new(name, move || {
            std::thread::sleep(Duration::from_millis(millis));
            Ok(())
        }))
    }

    #[tokio::test]
    async fn test_probe_failure_is_data() {
        let probes = vec![
            passing("one"),
            passing("two"),
            Arc::new(FnProbe::new("three", || Err(ProbeFailure::new("timeout"))))
                as Arc<dyn PerformanceProbe>,
            passing("four"),
            passing("five"),
        ];
        let orchestrator = TestOrchestrator::new(probes).unwrap();

        let session = orchestrator.run_to_completion().await.unwrap();
        assert_eq!(session.results.len(), 5);
        assert_eq!(session.success_count(), 4);
        assert_eq!(session.overall_score(), 80.0);
        assert_eq!(session.error_message, None);
        assert_eq!(session.results[2].failure_detail.as_deref(), Some("timeout"));
        assert!(!orchestrator.is_running());
        assert_eq!(orchestrator.current_test_name(), "");
        assert_eq!(orchestrator.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_results_follow_declaration_order() {
        let names = ["a", "b", "c", "d"];
        let orchestrator = TestOrchestrator::new(names.iter().map(|n| passing(n)).collect()).unwrap();

        let session = orchestrator.run_to_completion().await.unwrap();
        let recorded: Vec<_> = session.results.iter().map(|r| r.test_name.as_str()).collect();
        assert_eq!(recorded, names);
    }

    #[tokio::test]
    async fn test_panicking_probe_does_not_abort_run() {
        let probes = vec![
            Arc::new(FnProbe::new("explodes", || panic!("boom"))) as Arc<dyn PerformanceProbe>,
            passing("survivor"),
        ];
        let orchestrator = TestOrchestrator::new(probes).unwrap();

        let session = orchestrator.run_to_completion().await.unwrap();
        assert_eq!(session.results.len(), 2);
        assert!(!session.results[0].success);
        assert!(session.results[0]
            .failure_detail
            .as_deref()
            .unwrap()
            .contains("boom"));
        assert!(session.results[1].success);
        assert_eq!(session.error_message, None);
    }

    #[tokio::test]
    async fn test_empty_suite() {
        let orchestrator = TestOrchestrator::new(Vec::new()).unwrap();
        let session = orchestrator.run_to_completion().await.unwrap();

        assert!(session.results.is_empty());
        assert_eq!(session.overall_score(), 0.0);
        assert_eq!(session.average_duration(), 0.0);
        assert_eq!(session.progress, 1.0);
    }

    #[tokio::test]
    async fn test_second_run_rejected_while_running() {
        let orchestrator = Arc::new(TestOrchestrator::new(vec![sleeping("slow", 100)]).unwrap());

        let events = orchestrator.run_all().unwrap();
        assert!(orchestrator.is_running());
        assert!(matches!(orchestrator.run_all(), Err(Error::RunInProgress)));
        assert!(matches!(
            orchestrator.run_to_completion().await,
            Err(Error::RunInProgress)
        ));

        let session = events.finished().await.unwrap();
        assert_eq!(session.results.len(), 1);
        assert_eq!(orchestrator.results().len(), 1);

        // A new run replaces the previous session
        let next = orchestrator.run_to_completion().await.unwrap();
        assert_ne!(next.session_id, session.session_id);
        assert_eq!(next.results.len(), 1);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_completes_once() {
        let orchestrator = Arc::new(TestOrchestrator::new(
            (0..4).map(|i| passing(&format!("p{}", i))).collect(),
        )
        .unwrap());

        let mut events = orchestrator.run_all().unwrap();
        let mut readings = Vec::new();
        let mut finished = None;
        while let Some(event) = events.next().await {
            match event {
                RunEvent::ProbeFinished { progress, .. } => readings.push(progress),
                RunEvent::Finished(session) => finished = Some(session),
                _ => {}
            }
        }

        assert_eq!(readings, vec![0.25, 0.5, 0.75, 1.0]);
        assert_eq!(readings.iter().filter(|p| **p == 1.0).count(), 1);
        assert!(finished.unwrap().is_finished());
    }

    #[tokio::test]
    async fn test_cancellation_between_probes_keeps_partial_results() {
        let orchestrator = Arc::new(TestOrchestrator::new(vec![
            sleeping("first", 50),
            passing("second"),
            passing("third"),
        ])
        .unwrap());

        let mut events = orchestrator.run_all().unwrap();
        while let Some(event) = events.next().await {
            if let RunEvent::ProbeStarted { index: 0, .. } = event {
                orchestrator.cancel();
                break;
            }
        }

        let session = events.finished().await.unwrap();
        assert!(session.cancelled);
        assert!(!session.is_running);
        assert_eq!(session.results.len(), 1);
        assert_eq!(session.results[0].test_name, "first");
        assert!((session.progress - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(session.error_message, None);
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let orchestrator = TestOrchestrator::new(vec![passing("only")]).unwrap();
        orchestrator.cancel();

        let session = orchestrator.run_to_completion().await.unwrap();
        assert!(!session.cancelled);
        assert_eq!(session.results.len(), 1);
    }

    #[tokio::test]
    async fn test_probe_timeout_records_failure() {
        let orchestrator = TestOrchestrator::new(vec![sleeping("hangs", 500), passing("after")])
            .unwrap()
            .with_probe_timeout(Some(Duration::from_millis(20)));

        let session = orchestrator.run_to_completion().await.unwrap();
        assert_eq!(session.results.len(), 2);
        assert!(!session.results[0].success);
        assert_eq!(session.results[0].failure_detail.as_deref(), Some("timeout"));
        assert!(session.results[1].success);
    }

    #[tokio::test]
    async fn test_overrunning_worker_finishes_before_next_starts() {
        let busy = Arc::new(AtomicBool::new(false));
        let hung_flag = busy.clone();
        let next_flag = busy.clone();
        let probes: Vec<Arc<dyn PerformanceProbe>> = vec![
            Arc::new(FnProbe::new("hung", move || {
                hung_flag.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(300));
                hung_flag.store(false, Ordering::SeqCst);
                Ok(())
            })),
            Arc::new(FnProbe::new("next", move || {
                if next_flag.load(Ordering::SeqCst) {
                    return Err(ProbeFailure::new("previous worker still executing"));
                }
                Ok(())
            })),
        ];
        let orchestrator = TestOrchestrator::new(probes)
            .unwrap()
            .with_probe_timeout(Some(Duration::from_millis(20)));

        let session = orchestrator.run_to_completion().await.unwrap();
        assert_eq!(session.results[0].failure_detail.as_deref(), Some("timeout"));
        assert!(session.results[0].duration < 0.3);
        assert!(session.results[1].success, "{:?}", session.results[1]);
        assert!(!busy.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dropped_run_is_frozen_and_releases_orchestrator() {
        let orchestrator =
            TestOrchestrator::new(vec![sleeping("slow", 100), passing("after")]).unwrap();

        let outcome =
            tokio::time::timeout(Duration::from_millis(10), orchestrator.run_to_completion()).await;
        assert!(outcome.is_err());

        let session = orchestrator.session();
        assert!(!session.is_running);
        assert!(session.cancelled);
        assert!(session.error_message.is_some());
        assert!(session.finished_at.is_some());
        assert!(!orchestrator.is_running());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let next = orchestrator.run_to_completion().await.unwrap();
        assert_eq!(next.results.len(), 2);
        assert_eq!(next.error_message, None);
    }

    #[tokio::test]
    async fn test_start_failure_freezes_empty_session() {
        let orchestrator = TestOrchestrator::new(vec![passing("one"), passing("two")]).unwrap();
        orchestrator.inject_start_failure("result storage unavailable");

        let session = orchestrator.run_to_completion().await.unwrap();
        assert!(session.results.is_empty());
        assert!(session
            .error_message
            .as_deref()
            .unwrap()
            .contains("result storage unavailable"));
        assert!(!session.is_running);
        assert!(session.is_finished());
        assert!(!orchestrator.is_running());
        assert_eq!(orchestrator.error_message(), session.error_message);

        // The failure does not wedge the orchestrator
        let next = orchestrator.run_to_completion().await.unwrap();
        assert_eq!(next.results.len(), 2);
        assert_eq!(next.error_message, None);
    }

    #[tokio::test]
    async fn test_start_failure_is_streamed() {
        let orchestrator = Arc::new(TestOrchestrator::new(vec![passing("one")]).unwrap());
        orchestrator.inject_start_failure("no room");

        let session = orchestrator.run_all().unwrap().finished().await.unwrap();
        assert!(session.results.is_empty());
        assert!(session.error_message.is_some());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = TestOrchestrator::new(vec![passing("same"), passing("other"), passing("same")]);
        match result {
            Err(Error::InvalidInput(message)) => assert!(message.contains("same")),
            other => panic!("expected InvalidInput, got {:?}", other.map(|o| o.probe_names())),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_idle_session_accepts_new_run_immediately() {
        let orchestrator = Arc::new(TestOrchestrator::new(vec![sleeping("brief", 5)]).unwrap());

        for _ in 0..20 {
            let _events = orchestrator.run_all().unwrap();
            while orchestrator.is_running() {
                tokio::task::yield_now().await;
            }
            // Observed idle, so the next run must be accepted
        }
        let session = orchestrator.run_to_completion().await.unwrap();
        assert_eq!(session.results.len(), 1);
    }
}
