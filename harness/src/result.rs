//! Unified test result models.
//!
//! These types define stable contracts between the test runner, the auto-fix
//! loop, and reporting. Derived state (summary, overall status) is recomputed
//! whenever test cases are added and must never be mutated independently.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verdict for a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Error => "error",
            TestStatus::Skipped => "skipped",
        }
    }
}

/// One test's outcome. Created once per execution, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub status: TestStatus,
    /// Source region this test targets (function, class, or marked block).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Longer failure detail, e.g. a stack trace or assertion listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_score: Option<f64>,
    /// Wall-clock seconds spent executing the test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl TestCaseResult {
    pub fn new(name: impl Into<String>, status: TestStatus) -> Self {
        Self {
            name: name.into(),
            status,
            region: None,
            input: None,
            expected_output: None,
            actual_output: None,
            error_message: None,
            error_details: None,
            evaluation: None,
            evaluation_score: None,
            execution_time: None,
            timestamp: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Short human-readable failure description for listings.
    pub fn error_summary(&self) -> String {
        match (&self.error_message, self.status) {
            (Some(message), _) => message.clone(),
            (None, TestStatus::Passed) => "ok".to_string(),
            (None, status) => status.as_str().to_string(),
        }
    }
}

/// Aggregate counts over a test case list.
///
/// Always derived from the current case list via [`TestExecutionSummary::from_cases`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestExecutionSummary {
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub error_tests: usize,
    pub skipped_tests: usize,
}

impl TestExecutionSummary {
    pub fn from_cases(cases: &[TestCaseResult]) -> Self {
        let mut summary = Self::default();
        for case in cases {
            summary.total_tests += 1;
            match case.status {
                TestStatus::Passed => summary.passed_tests += 1,
                TestStatus::Failed => summary.failed_tests += 1,
                TestStatus::Error => summary.error_tests += 1,
                TestStatus::Skipped => summary.skipped_tests += 1,
            }
        }
        summary
    }

    /// Fraction of tests passing, 0.0 when no tests ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_tests == 0 {
            return 0.0;
        }
        self.passed_tests as f64 / self.total_tests as f64
    }
}

/// One full test run: a baseline, a fix attempt, or the final state.
///
/// The summary and overall status are recomputed on every mutation so they
/// cannot drift from the case list. Test cases are stored in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestExecutionResult {
    pub name: String,
    pub file_path: PathBuf,
    pub config_path: PathBuf,
    pub test_cases: Vec<TestCaseResult>,
    pub summary: TestExecutionSummary,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl TestExecutionResult {
    pub fn new(
        name: impl Into<String>,
        file_path: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            file_path: file_path.into(),
            config_path: config_path.into(),
            test_cases: Vec::new(),
            summary: TestExecutionSummary::default(),
            status: TestStatus::Failed,
            metadata: BTreeMap::new(),
        }
    }

    /// Append test cases and recompute the summary and overall status.
    pub fn add_test_cases(&mut self, cases: Vec<TestCaseResult>) {
        self.test_cases.extend(cases);
        self.recompute();
    }

    fn recompute(&mut self) {
        self.summary = TestExecutionSummary::from_cases(&self.test_cases);
        self.status = derive_overall_status(&self.test_cases);
    }

    pub fn is_successful(&self) -> bool {
        self.status == TestStatus::Passed
    }

    pub fn failure_count(&self) -> usize {
        self.summary.failed_tests + self.summary.error_tests
    }

    pub fn get_failed_tests(&self) -> Vec<&TestCaseResult> {
        self.test_cases
            .iter()
            .filter(|case| matches!(case.status, TestStatus::Failed | TestStatus::Error))
            .collect()
    }

    pub fn get_passed_tests(&self) -> Vec<&TestCaseResult> {
        self.get_tests_by_status(TestStatus::Passed)
    }

    /// Filter by status, preserving execution order. Computed on demand.
    pub fn get_tests_by_status(&self, status: TestStatus) -> Vec<&TestCaseResult> {
        self.test_cases
            .iter()
            .filter(|case| case.status == status)
            .collect()
    }

    /// Tag this run with its role in an execution (`baseline`,
    /// `fix_attempt_N`, `final`).
    pub fn set_run_type(&mut self, run_type: &str) {
        self.metadata
            .insert("run_type".to_string(), Value::String(run_type.to_string()));
    }

    pub fn run_type(&self) -> Option<&str> {
        self.metadata.get("run_type").and_then(Value::as_str)
    }
}

/// Passed iff every case passed and at least one test ran. Error cases force
/// an overall Failed.
fn derive_overall_status(cases: &[TestCaseResult]) -> TestStatus {
    if !cases.is_empty() && cases.iter().all(|case| case.status == TestStatus::Passed) {
        TestStatus::Passed
    } else {
        TestStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{case, failed_case};

    #[test]
    fn summary_counts_each_status() {
        let cases = vec![
            case("a", TestStatus::Passed),
            case("b", TestStatus::Failed),
            case("c", TestStatus::Error),
            case("d", TestStatus::Skipped),
            case("e", TestStatus::Passed),
        ];
        let summary = TestExecutionSummary::from_cases(&cases);
        assert_eq!(summary.total_tests, 5);
        assert_eq!(summary.passed_tests, 2);
        assert_eq!(summary.failed_tests, 1);
        assert_eq!(summary.error_tests, 1);
        assert_eq!(summary.skipped_tests, 1);
        assert_eq!(summary.success_rate(), 0.4);
    }

    #[test]
    fn success_rate_is_zero_for_empty_run() {
        assert_eq!(TestExecutionSummary::default().success_rate(), 0.0);
    }

    #[test]
    fn add_test_cases_recomputes_summary_and_status() {
        let mut result = TestExecutionResult::new("suite", "agent.py", "suite.toml");
        result.add_test_cases(vec![case("a", TestStatus::Passed)]);
        assert!(result.is_successful());
        assert_eq!(result.summary.total_tests, 1);

        result.add_test_cases(vec![failed_case("b", "boom")]);
        assert!(!result.is_successful());
        assert_eq!(result.summary.total_tests, 2);
        assert_eq!(result.failure_count(), 1);
    }

    #[test]
    fn empty_run_is_not_successful() {
        let result = TestExecutionResult::new("suite", "agent.py", "suite.toml");
        assert!(!result.is_successful());
        assert_eq!(result.status, TestStatus::Failed);
    }

    #[test]
    fn error_case_forces_overall_failed() {
        let mut result = TestExecutionResult::new("suite", "agent.py", "suite.toml");
        result.add_test_cases(vec![
            case("a", TestStatus::Passed),
            case("b", TestStatus::Error),
        ]);
        assert_eq!(result.status, TestStatus::Failed);
    }

    #[test]
    fn filters_preserve_insertion_order() {
        let mut result = TestExecutionResult::new("suite", "agent.py", "suite.toml");
        result.add_test_cases(vec![
            failed_case("z", "first"),
            case("m", TestStatus::Passed),
            failed_case("a", "second"),
        ]);
        let failed: Vec<&str> = result
            .get_failed_tests()
            .iter()
            .map(|case| case.name.as_str())
            .collect();
        assert_eq!(failed, vec!["z", "a"]);
    }

    #[test]
    fn run_type_round_trips_through_metadata() {
        let mut result = TestExecutionResult::new("suite", "agent.py", "suite.toml");
        result.set_run_type("baseline");
        assert_eq!(result.run_type(), Some("baseline"));
    }
}
