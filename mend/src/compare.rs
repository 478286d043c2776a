//! Attempt ranking and regression detection.
//!
//! Pure functions over the attempt list. They operate on in-memory data and
//! return deterministic outputs suitable for tests.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::memory::FixAttempt;

/// Name-wise diff between the two most recent attempts' after states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegressionAnalysis {
    /// Passing in the second-to-last attempt, failing or missing in the last.
    pub new_failures: Vec<String>,
    /// Failing in the second-to-last attempt, passing in the last.
    pub fixed_failures: Vec<String>,
    /// Failing in both.
    pub remaining_failures: Vec<String>,
}

/// Direction of the success-rate curve across attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Plateauing,
    Regressing,
}

/// Trend plus the approach descriptions that did and did not work.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptComparison {
    pub improvement_trend: Trend,
    pub successful_patterns: Vec<String>,
    pub failed_patterns: Vec<String>,
}

/// Select the single best attempt by after-state success rate.
///
/// Ties prefer the later attempt number: later attempts incorporate more
/// learning context and are trusted over earlier equally-scoring ones.
/// Zero attempts yields None, which is a normal outcome, not a failure.
pub fn find_best_attempt<'a>(attempts: &[&'a FixAttempt]) -> Option<&'a FixAttempt> {
    let mut best: Option<&FixAttempt> = None;
    for attempt in attempts {
        let better = match best {
            None => true,
            Some(current) => {
                let rate = attempt.success_rate();
                let current_rate = current.success_rate();
                rate > current_rate
                    || (rate == current_rate && attempt.attempt_number > current.attempt_number)
            }
        };
        if better {
            best = Some(attempt);
        }
    }
    best
}

/// Diff the two most recent attempts by test name.
///
/// With fewer than two attempts every list is empty.
pub fn detect_regressions(attempts: &[&FixAttempt]) -> RegressionAnalysis {
    let mut ordered: Vec<&FixAttempt> = attempts.to_vec();
    ordered.sort_by_key(|attempt| attempt.attempt_number);
    let [.., previous, last] = ordered.as_slice() else {
        return RegressionAnalysis::default();
    };

    let previous_passed: BTreeSet<String> =
        previous.test_results_after.passed_case_names().into_iter().collect();
    let previous_failed: BTreeSet<String> =
        previous.test_results_after.failed_case_names().into_iter().collect();
    let last_passed: BTreeSet<String> =
        last.test_results_after.passed_case_names().into_iter().collect();

    let new_failures = previous_passed
        .iter()
        .filter(|name| !last_passed.contains(*name))
        .cloned()
        .collect();
    let fixed_failures = previous_failed
        .iter()
        .filter(|name| last_passed.contains(*name))
        .cloned()
        .collect();
    let remaining_failures = previous_failed
        .iter()
        .filter(|name| !last_passed.contains(*name))
        .cloned()
        .collect();

    RegressionAnalysis {
        new_failures,
        fixed_failures,
        remaining_failures,
    }
}

/// Classify the overall trend across attempts in attempt order.
///
/// Improving iff the final attempt's rate exceeds the first's, regressing iff
/// lower, plateauing otherwise (including the zero- and one-attempt cases).
pub fn compare_attempts(attempts: &[&FixAttempt]) -> AttemptComparison {
    let mut ordered: Vec<&FixAttempt> = attempts.to_vec();
    ordered.sort_by_key(|attempt| attempt.attempt_number);

    let improvement_trend = match (ordered.first(), ordered.last()) {
        (Some(first), Some(last)) if last.success_rate() > first.success_rate() => Trend::Improving,
        (Some(first), Some(last)) if last.success_rate() < first.success_rate() => {
            Trend::Regressing
        }
        _ => Trend::Plateauing,
    };

    let successful_patterns = ordered
        .iter()
        .filter(|attempt| attempt.success)
        .map(|attempt| attempt.approach_description.clone())
        .collect();
    let failed_patterns = ordered
        .iter()
        .filter(|attempt| !attempt.success)
        .map(|attempt| attempt.approach_description.clone())
        .collect();

    AttemptComparison {
        improvement_trend,
        successful_patterns,
        failed_patterns,
    }
}
