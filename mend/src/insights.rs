//! Learning context extraction: what was tried, what failed, and why.
//!
//! Pure projections over the attempt history that feed prompt construction.
//! Every function returns an all-empty structure when no attempts exist.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use harness::legacy::LegacyResults;
use harness::region::CodeSection;

use crate::memory::FixAttempt;

/// A currently-failing test, drawn from the latest logged run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedCase {
    pub test_name: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One prior attempt, summarized for the prompt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptHistoryRecord {
    pub attempt_number: u32,
    pub approach: String,
    pub code_changes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub why_failed: Option<String>,
    pub passed_after: usize,
    pub total_after: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lessons_learned: Option<String>,
}

/// A failed approach the model must not repeat.
#[derive(Debug, Clone, Serialize)]
pub struct AvoidEntry {
    pub failed_approach: String,
    pub why_failed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson: Option<String>,
}

/// Narrative learning context: what to avoid and what worked.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreviousAttemptsInsights {
    pub current_failed_cases: Vec<FailedCase>,
    pub previous_attempts_history: Vec<AttemptHistoryRecord>,
    /// De-duplicated `"<approach>: <why>"` lines, one per failed attempt.
    pub failed_approaches_to_avoid: Vec<String>,
    /// One line per attempt whose partial-success note is non-empty,
    /// regardless of overall success.
    pub successful_patterns_to_build_on: Vec<String>,
    pub what_not_to_try_again: Vec<AvoidEntry>,
    pub original_code_sections: BTreeMap<String, CodeSection>,
    /// Attempt numbers whose code digest matched an earlier attempt.
    pub repeated_code_attempts: Vec<u32>,
}

/// Strategic guidance buckets derived from the same history.
#[derive(Debug, Clone, Serialize)]
pub struct IncrementalLearning {
    pub what_has_been_tried: Vec<String>,
    pub what_definitely_doesnt_work: Vec<String>,
    pub what_shows_promise: Vec<String>,
    pub success_metrics: SuccessMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessMetrics {
    /// Best after-state success rate achieved so far, 0.0 with no attempts.
    pub best_success_rate: f64,
    pub improvement_target: String,
}

/// Build the learning context from the attempt history, the latest run, and
/// the stored original sections.
pub fn previous_attempts_insights(
    attempts: &[&FixAttempt],
    latest_run: Option<&LegacyResults>,
    original_code_sections: BTreeMap<String, CodeSection>,
) -> PreviousAttemptsInsights {
    let mut ordered: Vec<&FixAttempt> = attempts.to_vec();
    ordered.sort_by_key(|attempt| attempt.attempt_number);

    let current_failed_cases = latest_run
        .map(|results| {
            results
                .failed_cases()
                .into_iter()
                .map(|(region, case)| FailedCase {
                    test_name: case.name.clone(),
                    region: region.to_string(),
                    error_message: case.details.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    let previous_attempts_history = ordered
        .iter()
        .map(|attempt| {
            let (total, passed, _, _) = attempt.test_results_after.case_counts();
            AttemptHistoryRecord {
                attempt_number: attempt.attempt_number,
                approach: attempt.approach_description.clone(),
                code_changes: attempt.code_changes_made.clone(),
                reasoning: attempt.llm_interaction.reasoning.clone(),
                why_failed: attempt.why_approach_failed.clone(),
                passed_after: passed,
                total_after: total,
                lessons_learned: attempt.lessons_learned.clone(),
            }
        })
        .collect();

    let mut seen = HashSet::new();
    let mut failed_approaches_to_avoid = Vec::new();
    for attempt in ordered.iter().filter(|attempt| !attempt.success) {
        let why = attempt
            .why_approach_failed
            .as_deref()
            .unwrap_or("tests still failing");
        let line = format!("{}: {}", attempt.approach_description, why);
        if seen.insert(line.clone()) {
            failed_approaches_to_avoid.push(line);
        }
    }

    let successful_patterns_to_build_on = ordered
        .iter()
        .filter_map(|attempt| attempt.what_worked_partially.as_deref())
        .filter(|note| !note.trim().is_empty())
        .map(str::to_string)
        .collect();

    let what_not_to_try_again = ordered
        .iter()
        .filter(|attempt| !attempt.success)
        .map(|attempt| AvoidEntry {
            failed_approach: attempt.approach_description.clone(),
            why_failed: attempt
                .why_approach_failed
                .clone()
                .unwrap_or_else(|| "tests still failing".to_string()),
            lesson: attempt.lessons_learned.clone(),
        })
        .collect();

    let mut digests_seen: HashSet<&str> = HashSet::new();
    let mut repeated_code_attempts = Vec::new();
    for attempt in &ordered {
        if !digests_seen.insert(attempt.code_digest.as_str()) {
            repeated_code_attempts.push(attempt.attempt_number);
        }
    }

    PreviousAttemptsInsights {
        current_failed_cases,
        previous_attempts_history,
        failed_approaches_to_avoid,
        successful_patterns_to_build_on,
        what_not_to_try_again,
        original_code_sections,
        repeated_code_attempts,
    }
}

/// Build the incremental-learning buckets from the attempt history.
pub fn incremental_learning(attempts: &[&FixAttempt]) -> IncrementalLearning {
    let mut ordered: Vec<&FixAttempt> = attempts.to_vec();
    ordered.sort_by_key(|attempt| attempt.attempt_number);

    let what_has_been_tried = ordered
        .iter()
        .map(|attempt| attempt.approach_description.clone())
        .collect();
    let what_definitely_doesnt_work = ordered
        .iter()
        .filter(|attempt| !attempt.success)
        .map(|attempt| attempt.approach_description.clone())
        .collect();
    let what_shows_promise = ordered
        .iter()
        .filter(|attempt| {
            attempt
                .what_worked_partially
                .as_deref()
                .is_some_and(|note| !note.trim().is_empty())
        })
        .map(|attempt| attempt.approach_description.clone())
        .collect();

    let best = ordered
        .iter()
        .map(|attempt| (attempt.success_rate(), attempt.attempt_number))
        .max_by(|left, right| {
            left.0
                .partial_cmp(&right.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(left.1.cmp(&right.1))
        });

    let success_metrics = match best {
        Some((rate, number)) => SuccessMetrics {
            best_success_rate: rate,
            improvement_target: format!(
                "raise the success rate above {:.1}% (best so far, attempt {})",
                rate * 100.0,
                number
            ),
        },
        None => SuccessMetrics {
            best_success_rate: 0.0,
            improvement_target: "establish a first attempt that passes any failing test"
                .to_string(),
        },
    };

    IncrementalLearning {
        what_has_been_tried,
        what_definitely_doesnt_work,
        what_shows_promise,
        success_metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{attempt_with_rates, legacy_with_failures};

    #[test]
    fn empty_history_yields_empty_collections() {
        let insights = previous_attempts_insights(&[], None, BTreeMap::new());
        assert!(insights.current_failed_cases.is_empty());
        assert!(insights.previous_attempts_history.is_empty());
        assert!(insights.failed_approaches_to_avoid.is_empty());
        assert!(insights.successful_patterns_to_build_on.is_empty());
        assert!(insights.what_not_to_try_again.is_empty());
        assert!(insights.original_code_sections.is_empty());
        assert!(insights.repeated_code_attempts.is_empty());
    }

    #[test]
    fn failed_approaches_are_deduplicated() {
        let mut first = attempt_with_rates("a.py", 1, 2, 2);
        first.approach_description = "raise on bad input".to_string();
        first.why_approach_failed = Some("tests expect False".to_string());
        let mut second = attempt_with_rates("a.py", 2, 2, 2);
        second.approach_description = "raise on bad input".to_string();
        second.why_approach_failed = Some("tests expect False".to_string());

        let insights = previous_attempts_insights(&[&first, &second], None, BTreeMap::new());
        assert_eq!(insights.failed_approaches_to_avoid.len(), 1);
        assert_eq!(
            insights.failed_approaches_to_avoid[0],
            "raise on bad input: tests expect False"
        );
        assert_eq!(insights.what_not_to_try_again.len(), 2);
    }

    #[test]
    fn partial_success_notes_count_regardless_of_outcome() {
        let mut failed = attempt_with_rates("a.py", 1, 1, 3);
        failed.success = false;
        failed.what_worked_partially = Some("type check now passes".to_string());
        let mut succeeded = attempt_with_rates("a.py", 2, 0, 3);
        succeeded.success = true;
        succeeded.what_worked_partially = Some("full validation".to_string());

        let insights = previous_attempts_insights(&[&failed, &succeeded], None, BTreeMap::new());
        assert_eq!(insights.successful_patterns_to_build_on.len(), 2);
    }

    #[test]
    fn current_failed_cases_come_from_latest_run() {
        let latest = legacy_with_failures(2, 3);
        let insights = previous_attempts_insights(&[], Some(&latest), BTreeMap::new());
        assert_eq!(insights.current_failed_cases.len(), 2);
        assert_eq!(insights.current_failed_cases[0].test_name, "test_0");
    }

    #[test]
    fn repeated_code_is_flagged() {
        let first = attempt_with_rates("a.py", 1, 1, 2);
        let mut second = attempt_with_rates("a.py", 2, 1, 2);
        second.code_digest = first.code_digest.clone();
        let third = attempt_with_rates("a.py", 3, 0, 2);

        let insights = previous_attempts_insights(&[&first, &second, &third], None, BTreeMap::new());
        assert_eq!(insights.repeated_code_attempts, vec![2]);
    }

    #[test]
    fn incremental_learning_buckets() {
        let mut first = attempt_with_rates("a.py", 1, 2, 4);
        first.approach_description = "approach one".to_string();
        first.success = false;
        let mut second = attempt_with_rates("a.py", 2, 1, 4);
        second.approach_description = "approach two".to_string();
        second.success = false;
        second.what_worked_partially = Some("partial".to_string());

        let learning = incremental_learning(&[&first, &second]);
        assert_eq!(
            learning.what_has_been_tried,
            vec!["approach one".to_string(), "approach two".to_string()]
        );
        assert_eq!(learning.what_definitely_doesnt_work.len(), 2);
        assert_eq!(learning.what_shows_promise, vec!["approach two".to_string()]);
        assert!((learning.success_metrics.best_success_rate - 0.75).abs() < 1e-9);
        assert!(
            learning
                .success_metrics
                .improvement_target
                .contains("attempt 2")
        );
    }

    #[test]
    fn incremental_learning_without_attempts_sets_bootstrap_target() {
        let learning = incremental_learning(&[]);
        assert_eq!(learning.success_metrics.best_success_rate, 0.0);
        assert!(
            learning
                .success_metrics
                .improvement_target
                .contains("first attempt")
        );
    }
}
