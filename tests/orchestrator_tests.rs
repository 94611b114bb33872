//! Probe orchestration through the public API

use perfwatch::config::ProbeConfig;
use perfwatch::probe::default_suite;
use perfwatch::{
    Config, Error, FnProbe, InMemorySettingsStore, PerformanceProbe, ProbeFailure, RunEvent,
    StaticDevice, StaticHost, Suggestion, TelemetryContext, Toggle,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn probe(name: &str, outcome: Result<(), &'static str>) -> Arc<dyn PerformanceProbe> {
    Arc::new(FnProbe::new(name, move || outcome.map_err(ProbeFailure::new)))
}

fn context(config: Config, probes: Vec<Arc<dyn PerformanceProbe>>) -> TelemetryContext {
    TelemetryContext::new(
        config,
        Arc::new(StaticHost::new(1, 10)),
        Arc::new(StaticDevice::unknown()),
        Arc::new(InMemorySettingsStore::new()),
        probes,
    )
    .unwrap()
}

fn five_probes_third_times_out() -> Vec<Arc<dyn PerformanceProbe>> {
    vec![
        probe("startup", Ok(())),
        probe("scroll", Ok(())),
        probe("network", Err("timeout")),
        probe("render", Ok(())),
        probe("teardown", Ok(())),
    ]
}

#[tokio::test]
async fn test_failing_probe_does_not_fail_the_run() {
    let ctx = context(Config::default(), five_probes_third_times_out());

    let session = ctx.orchestrator().run_to_completion().await.unwrap();
    assert_eq!(session.results.len(), 5);
    assert_eq!(session.success_count(), 4);
    assert_eq!(session.overall_score(), 80.0);
    assert_eq!(session.error_message, None);
    assert_eq!(session.results[2].test_name, "network");
    assert_eq!(session.results[2].failure_detail.as_deref(), Some("timeout"));

    assert_eq!(ctx.orchestrator().overall_score(), 80.0);
    assert!(!ctx.orchestrator().is_running());
}

#[tokio::test]
async fn test_event_stream_reports_every_probe_in_order() {
    let ctx = context(Config::default(), five_probes_third_times_out());
    let mut events = ctx.orchestrator().run_all().unwrap();

    let mut started = Vec::new();
    let mut progress = Vec::new();
    let mut finished = None;
    while let Some(event) = events.next().await {
        match event {
            RunEvent::Started { total, .. } => assert_eq!(total, 5),
            RunEvent::ProbeStarted { index, name } => started.push((index, name)),
            RunEvent::ProbeFinished { progress: p, .. } => progress.push(p),
            RunEvent::Finished(session) => finished = Some(session),
        }
    }

    let names: Vec<_> = started.iter().map(|(_, n)| n.as_str()).collect();
    assert_eq!(names, ["startup", "scroll", "network", "render", "teardown"]);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(1.0));

    let session = finished.unwrap();
    assert_eq!(session.overall_score(), 80.0);
    assert!(session.finished_at.is_some());
}

#[tokio::test]
async fn test_second_run_is_rejected_while_live() {
    let gate = Arc::new(AtomicUsize::new(0));
    let worker_gate = gate.clone();
    let slow: Arc<dyn PerformanceProbe> = Arc::new(FnProbe::new("slow", move || {
        while worker_gate.load(Ordering::Acquire) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }));
    let ctx = context(Config::default(), vec![slow]);

    let events = ctx.orchestrator().run_all().unwrap();
    assert!(matches!(
        ctx.orchestrator().run_all(),
        Err(Error::RunInProgress)
    ));

    gate.store(1, Ordering::Release);
    let session = events.finished().await.unwrap();
    assert_eq!(session.results.len(), 1);

    // Idle again, so a new run is accepted
    let again = ctx.orchestrator().run_to_completion().await.unwrap();
    assert_eq!(again.results.len(), 1);
    assert_ne!(again.session_id, session.session_id);
}

#[tokio::test]
async fn test_configured_watchdog_marks_hung_probe() {
    let mut config = Config::default();
    config.probes.probe_timeout = Some(Duration::from_millis(50));

    let hung: Arc<dyn PerformanceProbe> = Arc::new(FnProbe::new("hung", || {
        std::thread::sleep(Duration::from_millis(500));
        Ok(())
    }));
    let ctx = context(config, vec![probe("quick", Ok(())), hung]);

    let session = ctx.orchestrator().run_to_completion().await.unwrap();
    assert_eq!(session.results.len(), 2);
    assert!(session.results[0].success);
    assert_eq!(session.results[1].failure_detail.as_deref(), Some("timeout"));
    assert_eq!(session.overall_score(), 50.0);
}

#[tokio::test]
async fn test_low_score_drives_feature_suggestions() {
    let ctx = context(Config::default(), five_probes_third_times_out());
    ctx.adaptive().set_toggle(Toggle::Preloading, true);

    // No finished run yet: score rules stay quiet
    assert!(ctx.adaptive().suggestions().is_empty());

    ctx.orchestrator().run_to_completion().await.unwrap();
    // 80.0 is not below the default minimum
    assert!(ctx.adaptive().suggestions().is_empty());

    let ctx = context(
        Config::default(),
        vec![probe("a", Ok(())), probe("b", Err("slow"))],
    );
    ctx.adaptive().set_toggle(Toggle::Preloading, true);
    ctx.orchestrator().run_to_completion().await.unwrap();
    assert_eq!(
        ctx.adaptive().suggestions(),
        vec![
            Suggestion::DisableAnimationOptimization,
            Suggestion::DisablePreloading
        ]
    );
}

#[tokio::test]
async fn test_builtin_suite_runs_clean() {
    let config = Config {
        probes: ProbeConfig {
            memory_allocation_mb: 1,
            hashing_rounds: 200,
            cache_operations: 500,
            serialization_records: 100,
            compression_bytes: 128 * 1024,
            per_probe_budget: Duration::from_secs(30),
            ..ProbeConfig::default()
        },
        ..Config::default()
    };
    let probes = default_suite(&config.probes);
    let ctx = context(config, probes);

    let session = ctx.orchestrator().run_to_completion().await.unwrap();
    assert_eq!(session.results.len(), 5);
    assert_eq!(session.overall_score(), 100.0, "{:?}", session.results);
    assert!(session.average_duration() >= 0.0);

    let snapshot = ctx.broker().current_snapshot();
    assert_eq!(snapshot.session.unwrap().session_id, session.session_id);
}
