//! Multi-run execution history for one file/config pair.
//!
//! A history holds an optional baseline (always first), fix-attempt results
//! in attempt order, and an optional final result (always last). The mutators
//! enforce that ordering; a final result is terminal.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::TestExecutionResult;

/// Ordered sequence of runs: baseline, fix attempts, final.
#[derive(Debug, Clone, Default)]
pub struct TestExecutionHistory {
    baseline: Option<TestExecutionResult>,
    fix_attempts: Vec<TestExecutionResult>,
    final_result: Option<TestExecutionResult>,
}

/// Improvement of the latest run relative to the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImprovementSummary {
    pub baseline_failed: usize,
    pub current_failed: usize,
    /// Failures removed since baseline; negative means a regression.
    pub improvement: i64,
    pub has_improvement: bool,
    pub all_passed: bool,
}

/// One run's failures, for chronological progression reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionEntry {
    pub run_type: String,
    pub failed_count: usize,
    pub failed_tests: Vec<String>,
}

impl TestExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the baseline run. Must be the first result added.
    pub fn add_baseline_result(&mut self, mut result: TestExecutionResult) -> Result<()> {
        if self.baseline.is_some() {
            bail!("baseline result already set");
        }
        if !self.fix_attempts.is_empty() || self.final_result.is_some() {
            bail!("baseline must be added before any other result");
        }
        result.set_run_type("baseline");
        self.baseline = Some(result);
        Ok(())
    }

    /// Record a fix attempt's run. The history assigns the attempt ordinal.
    pub fn add_fix_attempt_result(&mut self, mut result: TestExecutionResult) -> Result<()> {
        if self.final_result.is_some() {
            bail!("cannot add fix attempt after final result");
        }
        let attempt = self.fix_attempts.len() + 1;
        result.set_run_type(&format!("fix_attempt_{attempt}"));
        self.fix_attempts.push(result);
        Ok(())
    }

    /// Record the final run. Terminal: no further results may be added.
    pub fn set_final_result(&mut self, mut result: TestExecutionResult) -> Result<()> {
        if self.final_result.is_some() {
            bail!("final result already set");
        }
        result.set_run_type("final");
        self.final_result = Some(result);
        Ok(())
    }

    pub fn baseline(&self) -> Option<&TestExecutionResult> {
        self.baseline.as_ref()
    }

    pub fn fix_attempts(&self) -> &[TestExecutionResult] {
        &self.fix_attempts
    }

    pub fn final_result(&self) -> Option<&TestExecutionResult> {
        self.final_result.as_ref()
    }

    /// Latest result: final if present, else last fix attempt, else baseline.
    pub fn latest(&self) -> Option<&TestExecutionResult> {
        self.final_result
            .as_ref()
            .or_else(|| self.fix_attempts.last())
            .or(self.baseline.as_ref())
    }

    /// All results in chronological order.
    pub fn results(&self) -> Vec<&TestExecutionResult> {
        let mut results = Vec::new();
        if let Some(baseline) = &self.baseline {
            results.push(baseline);
        }
        results.extend(self.fix_attempts.iter());
        if let Some(final_result) = &self.final_result {
            results.push(final_result);
        }
        results
    }

    /// Compare the latest run against the baseline.
    ///
    /// An empty history yields the all-zero summary rather than an error.
    pub fn get_improvement_summary(&self) -> ImprovementSummary {
        let baseline_failed = self
            .baseline
            .as_ref()
            .map(TestExecutionResult::failure_count)
            .unwrap_or(0);
        let current = self.latest();
        let current_failed = current.map(TestExecutionResult::failure_count).unwrap_or(0);
        let improvement = baseline_failed as i64 - current_failed as i64;
        ImprovementSummary {
            baseline_failed,
            current_failed,
            improvement,
            has_improvement: improvement > 0,
            all_passed: current.is_some_and(TestExecutionResult::is_successful),
        }
    }

    /// Failed-test listing per run, in chronological order.
    pub fn get_failed_tests_progression(&self) -> Vec<ProgressionEntry> {
        self.results()
            .into_iter()
            .map(|result| ProgressionEntry {
                run_type: result.run_type().unwrap_or("unknown").to_string(),
                failed_count: result.failure_count(),
                failed_tests: result
                    .get_failed_tests()
                    .into_iter()
                    .map(|case| case.name.clone())
                    .collect(),
            })
            .collect()
    }

    /// Full-history legacy document for report writers.
    pub fn to_legacy_format(&self) -> Value {
        let runs: Vec<Value> = self
            .results()
            .into_iter()
            .map(|result| {
                serde_json::json!({
                    "run_type": result.run_type().unwrap_or("unknown"),
                    "results": result.to_legacy_format().to_json(),
                })
            })
            .collect();
        serde_json::json!({
            "runs": runs,
            "improvement_summary": self.get_improvement_summary(),
        })
    }
}
