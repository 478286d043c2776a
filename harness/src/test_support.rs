//! Test-only helpers for constructing test cases and results.

use crate::result::{TestCaseResult, TestExecutionResult, TestStatus};

/// Create a deterministic test case with the given status.
pub fn case(name: &str, status: TestStatus) -> TestCaseResult {
    TestCaseResult::new(name, status)
}

/// Create a test case bound to a source region.
pub fn case_in_region(name: &str, status: TestStatus, region: &str) -> TestCaseResult {
    let mut case = TestCaseResult::new(name, status);
    case.region = Some(region.to_string());
    case
}

/// Create a failed case with an error message.
pub fn failed_case(name: &str, error: &str) -> TestCaseResult {
    let mut case = TestCaseResult::new(name, TestStatus::Failed);
    case.error_message = Some(error.to_string());
    case
}

/// Create a failed case with an error message, bound to a region.
pub fn failed_case_in_region(name: &str, error: &str, region: &str) -> TestCaseResult {
    let mut case = failed_case(name, error);
    case.region = Some(region.to_string());
    case
}

/// Create a result holding the given cases, with summary derived.
pub fn result_with_cases(name: &str, cases: Vec<TestCaseResult>) -> TestExecutionResult {
    let mut result = TestExecutionResult::new(name, "agent.py", "suite.toml");
    result.add_test_cases(cases);
    result
}

/// Create a result where the first `failed` of `total` tests fail.
pub fn result_with_failures(name: &str, failed: usize, total: usize) -> TestExecutionResult {
    let mut cases = Vec::with_capacity(total);
    for index in 0..total {
        if index < failed {
            cases.push(failed_case(&format!("test_{index}"), "assertion failed"));
        } else {
            cases.push(case(&format!("test_{index}"), TestStatus::Passed));
        }
    }
    result_with_cases(name, cases)
}
