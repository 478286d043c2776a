//! Test-only helpers: deterministic records and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Result, bail};
use chrono::Utc;
use serde_json::Value;

use harness::legacy::LegacyResults;
use harness::result::{TestCaseResult, TestExecutionResult, TestStatus};
use harness::runner::TestRunner;
use harness::suite::SuiteFile;
use harness::test_support::result_with_failures;

use crate::llm::LlmClient;
use crate::memory::{FixAttempt, LlmInteraction, NewFixAttempt, code_digest};

/// Legacy document where the first `failed` of `total` cases fail.
pub fn legacy_with_failures(failed: usize, total: usize) -> LegacyResults {
    result_with_failures("agent", failed, total).to_legacy_format()
}

/// Legacy document built from `(region, name, passed, details, failing_line)`.
pub fn legacy_from_cases(
    cases: &[(&str, &str, bool, Option<&str>, Option<u32>)],
) -> LegacyResults {
    let mut result = TestExecutionResult::new("agent", "agent.py", "suite.toml");
    let built = cases
        .iter()
        .map(|(region, name, passed, details, failing_line)| {
            let status = if *passed {
                TestStatus::Passed
            } else {
                TestStatus::Failed
            };
            let mut case = TestCaseResult::new(*name, status);
            case.region = Some((*region).to_string());
            case.error_message = details.map(str::to_string);
            if let Some(line) = failing_line {
                case.metadata
                    .insert("failing_line".to_string(), Value::from(*line));
            }
            case
        })
        .collect();
    result.add_test_cases(built);
    result.to_legacy_format()
}

/// Inputs for logging an attempt whose after state has `failed` of `total`
/// cases failing. The before snapshot has every case failing.
pub fn new_attempt(file_path: &str, number: u32, failed: usize, total: usize) -> NewFixAttempt {
    NewFixAttempt {
        file_path: file_path.to_string(),
        attempt_number: number,
        original_code: "original".to_string(),
        fixed_code: format!("code attempt {number}"),
        success: failed == 0 && total > 0,
        test_results_before: legacy_with_failures(total, total),
        test_results_after: legacy_with_failures(failed, total),
        approach_description: format!("approach {number}"),
        code_changes: format!("change {number}"),
        llm_interaction: LlmInteraction::new("code_fixing", "prompt", "response"),
        why_approach_failed: (failed > 0).then(|| "tests still failing".to_string()),
        lessons_learned: None,
        what_worked_partially: None,
    }
}

/// A committed attempt record with the given after-state failure counts.
pub fn attempt_with_rates(file_path: &str, number: u32, failed: usize, total: usize) -> FixAttempt {
    let code = format!("code attempt {number}");
    FixAttempt {
        attempt_number: number,
        file_path: file_path.to_string(),
        approach_description: format!("approach {number}"),
        code_changes_made: format!("change {number}"),
        original_code: "original".to_string(),
        code_digest: code_digest(&code),
        modified_code: code,
        test_results_before: legacy_with_failures(total, total),
        test_results_after: legacy_with_failures(failed, total),
        success: failed == 0 && total > 0,
        llm_interaction: LlmInteraction::new("code_fixing", "prompt", "response"),
        lessons_learned: None,
        why_approach_failed: (failed > 0).then(|| "tests still failing".to_string()),
        what_worked_partially: None,
        timestamp: Utc::now(),
    }
}

/// A committed attempt whose after state is built from `(name, passed)` pairs.
pub fn attempt_with_cases(file_path: &str, number: u32, cases: &[(&str, bool)]) -> FixAttempt {
    let after: Vec<(&str, &str, bool, Option<&str>, Option<u32>)> = cases
        .iter()
        .map(|(name, passed)| ("region", *name, *passed, None, None))
        .collect();
    let before: Vec<(&str, &str, bool, Option<&str>, Option<u32>)> = cases
        .iter()
        .map(|(name, _)| ("region", *name, false, None, None))
        .collect();
    let mut attempt = attempt_with_rates(file_path, number, 0, 0);
    attempt.test_results_before = legacy_from_cases(&before);
    attempt.test_results_after = legacy_from_cases(&after);
    attempt.success = attempt.test_results_after.all_passed();
    attempt
}

/// Alias used by capture tests.
pub fn logged_attempt(file_path: &str, number: u32, failed: usize, total: usize) -> FixAttempt {
    attempt_with_rates(file_path, number, failed, total)
}

/// LLM client returning queued responses in order; errors when exhausted.
/// Records every prompt it receives for loop-level assertions.
pub struct ScriptedLlm {
    responses: RefCell<VecDeque<String>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedLlm {
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts_seen(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl LlmClient for ScriptedLlm {
    fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        match self.responses.borrow_mut().pop_front() {
            Some(response) => Ok(response),
            None => bail!("scripted llm has no responses left"),
        }
    }
}

/// LLM client that always fails, for fallback-path tests.
pub struct FailingLlm;

impl LlmClient for FailingLlm {
    fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("llm backend unavailable")
    }
}

/// Test runner returning queued results in order; errors when exhausted.
pub struct ScriptedRunner {
    results: RefCell<VecDeque<TestExecutionResult>>,
}

impl ScriptedRunner {
    pub fn with_results(results: Vec<TestExecutionResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
        }
    }
}

impl TestRunner for ScriptedRunner {
    fn run(&self, _suite: &SuiteFile, _config_path: &Path) -> Result<TestExecutionResult> {
        match self.results.borrow_mut().pop_front() {
            Some(result) => Ok(result),
            None => bail!("scripted runner has no results left"),
        }
    }
}
