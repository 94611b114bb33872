//! Run records and scoring

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTestResult {
    pub test_name: String,
    pub success: bool,
    /// Wall-clock seconds
    pub duration: f64,
    pub failure_detail: Option<String>,
}

impl PerformanceTestResult {
    pub fn passed(test_name: impl Into<String>, duration: f64) -> Self {
        Self {
            test_name: test_name.into(),
            success: true,
            duration: duration.max(0.0),
            failure_detail: None,
        }
    }

    pub fn failed(test_name: impl Into<String>, duration: f64, detail: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            success: false,
            duration: duration.max(0.0),
            failure_detail: Some(detail.into()),
        }
    }
}

/// Record of one orchestrator invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunSession {
    /// Nil for the idle session that exists before the first run
    pub session_id: Uuid,
    pub results: Vec<PerformanceTestResult>,
    pub is_running: bool,
    /// Empty when idle
    pub current_test_name: String,
    /// completed / total, in [0, 1]
    pub progress: f64,
    /// Set only when the run itself failed; probe failures live in `results`
    pub error_message: Option<String>,
    pub cancelled: bool,
    pub total_probes: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for TestRunSession {
    fn default() -> Self {
        Self::idle()
    }
}

impl TestRunSession {
    pub fn idle() -> Self {
        Self {
            session_id: Uuid::nil(),
            results: Vec::new(),
            is_running: false,
            current_test_name: String::new(),
            progress: 0.0,
            error_message: None,
            cancelled: false,
            total_probes: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn start(total_probes: usize) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            is_running: true,
            total_probes,
            started_at: Some(Utc::now()),
            ..Self::idle()
        }
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// 100 × successes / probes run; 0 when nothing ran
    pub fn overall_score(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        100.0 * self.success_count() as f64 / self.results.len() as f64
    }

    /// Mean duration over every completed probe, failed ones included
    pub fn average_duration(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.results.iter().map(|r| r.duration).sum::<f64>() / self.results.len() as f64
    }

    pub fn is_finished(&self) -> bool {
        !self.is_running && self.finished_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn session_with(results: Vec<PerformanceTestResult>) -> TestRunSession {
        TestRunSession {
            results,
            ..TestRunSession::idle()
        }
    }

    #[test]
    fn test_empty_session_scores_zero() {
        let session = TestRunSession::idle();
        assert_eq!(session.overall_score(), 0.0);
        assert_eq!(session.average_duration(), 0.0);
        assert!(!session.is_finished());
    }

    #[test]
    fn test_four_of_five_scores_eighty() {
        let mut results: Vec<_> = (0..5)
            .map(|i| PerformanceTestResult::passed(format!("probe_{}", i), 0.5))
            .collect();
        results[2] = PerformanceTestResult::failed("probe_2", 1.5, "timeout");

        let session = session_with(results);
        assert_eq!(session.success_count(), 4);
        assert_eq!(session.overall_score(), 80.0);
        assert!((session.average_duration() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_negative_duration_clamped() {
        assert_eq!(PerformanceTestResult::passed("p", -1.0).duration, 0.0);
    }

    proptest! {
        #[test]
        fn prop_scoring(outcomes in proptest::collection::vec((any::<bool>(), 0.0f64..10.0), 0..32)) {
            let results: Vec<_> = outcomes
                .iter()
                .enumerate()
                .map(|(i, (ok, d))| {
                    if *ok {
                        PerformanceTestResult::passed(format!("p{}", i), *d)
                    } else {
                        PerformanceTestResult::failed(format!("p{}", i), *d, "failed")
                    }
                })
                .collect();
            let session = session_with(results);

            let n = outcomes.len();
            let k = outcomes.iter().filter(|(ok, _)| *ok).count();
            if n == 0 {
                prop_assert_eq!(session.overall_score(), 0.0);
                prop_assert_eq!(session.average_duration(), 0.0);
            } else {
                prop_assert_eq!(session.overall_score(), 100.0 * k as f64 / n as f64);
                let mean = outcomes.iter().map(|(_, d)| *d).sum::<f64>() / n as f64;
                prop_assert!((session.average_duration() - mean).abs() < 1e-9);
            }
        }
    }
}
