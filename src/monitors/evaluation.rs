use tracing::trace;

use crate::{WatchCounters, probe::ProbeOutcome};

/// Result of feeding one probe outcome into a watch's failure counter
///
/// ```text
/// success                                 → FailureEvaluation::Healthy (counter reset)
/// failure, current + 1 <  threshold       → FailureEvaluation::Failing (increment)
/// failure, current + 1 >= threshold       → FailureEvaluation::ThresholdReached (alert, reset)
/// ```
///
/// The reset after an alert means a fresh run of failures is needed before the next
/// one; this is not a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureEvaluation {
    Healthy,
    Failing,
    ThresholdReached,
}

impl FailureEvaluation {
    pub fn evaluate(is_failure: bool, threshold: u32, current_failures: u32) -> FailureEvaluation {
        if !is_failure {
            return FailureEvaluation::Healthy;
        }

        // a threshold of 0 is rejected at registration, treat it like 1 anyway
        if current_failures.saturating_add(1) >= threshold.max(1) {
            return FailureEvaluation::ThresholdReached;
        }

        FailureEvaluation::Failing
    }

    pub fn raises_alert(&self) -> bool {
        matches!(self, FailureEvaluation::ThresholdReached)
    }
}

impl WatchCounters {
    /// Apply one probe outcome and report what happened
    pub fn apply(&mut self, outcome: &ProbeOutcome, threshold: u32) -> FailureEvaluation {
        let evaluation =
            FailureEvaluation::evaluate(outcome.is_failure(), threshold, self.consecutive_failures);

        match evaluation {
            FailureEvaluation::Healthy => {
                self.success_count += 1;
                self.consecutive_failures = 0;
            }
            FailureEvaluation::Failing => {
                self.consecutive_failures += 1;
            }
            FailureEvaluation::ThresholdReached => {
                self.consecutive_failures = 0;
            }
        }

        trace!(
            "{outcome:?} -> {evaluation:?} (failed: {}/{threshold}, succeeded: {})",
            self.consecutive_failures, self.success_count
        );

        evaluation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail() -> ProbeOutcome {
        ProbeOutcome::Failure(503)
    }

    fn ok() -> ProbeOutcome {
        ProbeOutcome::Success(200)
    }

    #[test]
    fn test_threshold_one_alerts_on_every_failure() {
        let mut counters = WatchCounters::default();

        for _ in 0..3 {
            assert_eq!(counters.apply(&fail(), 1), FailureEvaluation::ThresholdReached);
            assert_eq!(counters.consecutive_failures, 0);
        }
    }

    #[test]
    fn test_success_resets_failures() {
        let mut counters = WatchCounters {
            consecutive_failures: 1,
            success_count: 7,
        };

        assert_eq!(counters.apply(&ok(), 2), FailureEvaluation::Healthy);
        assert_eq!(counters.consecutive_failures, 0);
        assert_eq!(counters.success_count, 8);
    }

    #[test]
    fn test_scenario_fail_fail_success_fail_fail() {
        let mut counters = WatchCounters::default();
        let outcomes = [fail(), fail(), ok(), fail(), fail()];

        let alerts: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| counters.apply(outcome, 2).raises_alert())
            .map(|(tick, _)| tick + 1)
            .collect();

        assert_eq!(alerts, vec![2, 5]);
        assert_eq!(counters.consecutive_failures, 0);
        assert_eq!(counters.success_count, 1);
    }

    #[test]
    fn test_flapping_below_threshold_never_alerts() {
        let mut counters = WatchCounters::default();

        for _ in 0..10 {
            assert!(!counters.apply(&fail(), 2).raises_alert());
            assert!(!counters.apply(&ok(), 2).raises_alert());
        }
    }

    #[test]
    fn test_transport_error_shares_failure_counter() {
        let mut counters = WatchCounters::default();

        assert_eq!(counters.apply(&fail(), 2), FailureEvaluation::Failing);
        let timeout = ProbeOutcome::TransportError("timed out".to_string());
        assert_eq!(counters.apply(&timeout, 2), FailureEvaluation::ThresholdReached);
    }
}
