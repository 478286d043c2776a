//! History-to-report bridge.
//!
//! Converts an execution's history and memory into the unified structure
//! consumed by report writers and PR description generators. The structures
//! here are fully populated before hand-off; all presentation stays external.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use harness::history::{ImprovementSummary, ProgressionEntry, TestExecutionHistory};

use crate::compare::Trend;
use crate::memory::{ExecutionMemory, FixAttempt};

/// Terminal classification of one auto-fix execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixReportStatus {
    /// Every test passes in the final state.
    Fixed,
    /// Fewer failures than the baseline, but not zero.
    Improved,
    /// Same failure count as the baseline.
    Unchanged,
    /// More failures than the baseline.
    Regressed,
}

/// The best attempt, summarized for renderers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestAttemptSummary {
    pub attempt_number: u32,
    pub success_rate: f64,
    pub approach_description: String,
    pub code_changes_made: String,
    pub code_digest: String,
}

/// One attempt row for report tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptReport {
    pub attempt_number: u32,
    pub success: bool,
    pub success_rate: f64,
    pub approach_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_approach_failed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lessons_learned: Option<String>,
    /// Legacy-format snapshot of the attempt's after state.
    pub results_after: Value,
}

/// The unified reportable result of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixReport {
    pub execution_id: String,
    pub file_path: String,
    pub status: FixReportStatus,
    pub improvement: ImprovementSummary,
    pub progression: Vec<ProgressionEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_attempt: Option<BestAttemptSummary>,
    pub attempts: Vec<AttemptReport>,
    pub improvement_trend: Trend,
    /// Full-history legacy document for backward-compatible renderers.
    pub history: Value,
    /// Non-fatal problems encountered during the run (capture failures etc.).
    pub warnings: Vec<String>,
}

/// Build the unified report from the committed history and memory.
pub fn build_report(
    execution_id: &str,
    file_path: &str,
    history: &TestExecutionHistory,
    memory: &ExecutionMemory,
    warnings: Vec<String>,
) -> FixReport {
    let improvement = history.get_improvement_summary();
    let status = classify(&improvement);

    let attempts = memory
        .attempts_for(file_path)
        .into_iter()
        .map(attempt_report)
        .collect();

    FixReport {
        execution_id: execution_id.to_string(),
        file_path: file_path.to_string(),
        status,
        improvement,
        progression: history.get_failed_tests_progression(),
        best_attempt: memory.find_best_attempt(file_path).map(best_summary),
        attempts,
        improvement_trend: memory.compare_attempts(file_path).improvement_trend,
        history: history.to_legacy_format(),
        warnings,
    }
}

fn classify(improvement: &ImprovementSummary) -> FixReportStatus {
    if improvement.all_passed {
        FixReportStatus::Fixed
    } else if improvement.improvement > 0 {
        FixReportStatus::Improved
    } else if improvement.improvement < 0 {
        FixReportStatus::Regressed
    } else {
        FixReportStatus::Unchanged
    }
}

fn best_summary(attempt: &FixAttempt) -> BestAttemptSummary {
    BestAttemptSummary {
        attempt_number: attempt.attempt_number,
        success_rate: attempt.success_rate(),
        approach_description: attempt.approach_description.clone(),
        code_changes_made: attempt.code_changes_made.clone(),
        code_digest: attempt.code_digest.clone(),
    }
}

fn attempt_report(attempt: &FixAttempt) -> AttemptReport {
    AttemptReport {
        attempt_number: attempt.attempt_number,
        success: attempt.success,
        success_rate: attempt.success_rate(),
        approach_description: attempt.approach_description.clone(),
        why_approach_failed: attempt.why_approach_failed.clone(),
        lessons_learned: attempt.lessons_learned.clone(),
        results_after: attempt.test_results_after.to_json(),
    }
}
