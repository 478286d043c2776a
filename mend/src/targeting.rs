//! Targeting context extraction: exactly where a fix should apply.
//!
//! The structural counterpart to the learning context: line ranges, failing
//! function names, and error types pinpointing the code an LLM rewrite must
//! touch. Total over memory; unseen file paths yield empty structures.

use std::collections::BTreeMap;

use serde::Serialize;

use harness::legacy::{LegacyResults, LegacyTestCase};
use harness::region::CodeSection;

use crate::compare::{self, RegressionAnalysis};
use crate::insights::FailedCase;
use crate::memory::FixAttempt;

/// Maps a failed test case to the function/region name it implicates.
///
/// The original metadata is inconsistently populated across producers, so the
/// extraction step is pluggable rather than hard-coded.
pub trait FunctionResolver {
    fn resolve(&self, region: &str, case: &LegacyTestCase) -> Option<String>;
}

/// Default resolver: the case's region name first, then an explicit
/// `failing_function` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionThenMetadataResolver;

impl FunctionResolver for RegionThenMetadataResolver {
    fn resolve(&self, region: &str, case: &LegacyTestCase) -> Option<String> {
        if !region.is_empty() && region != "default" {
            return Some(region.to_string());
        }
        case.failing_function.clone()
    }
}

/// Reference to the highest-scoring attempt so far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BestAttemptRef {
    pub success_rate: f64,
    pub attempt_number: u32,
}

/// Structural failure context for prompt targeting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FailureAnalysis {
    pub original_relevant_sections: BTreeMap<String, CodeSection>,
    pub failing_functions: Vec<String>,
    pub failing_lines: Vec<u32>,
    pub test_names: Vec<String>,
    pub error_messages: Vec<String>,
    pub error_types: Vec<String>,
    pub failed_test_cases: Vec<FailedCase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_attempt_so_far: Option<BestAttemptRef>,
    pub regression_analysis: RegressionAnalysis,
}

/// Build the targeting context from the latest run, attempt history, and
/// stored original sections.
pub fn failure_analysis(
    attempts: &[&FixAttempt],
    latest_run: Option<&LegacyResults>,
    original_relevant_sections: BTreeMap<String, CodeSection>,
    resolver: &dyn FunctionResolver,
) -> FailureAnalysis {
    let failed = latest_run
        .map(LegacyResults::failed_cases)
        .unwrap_or_default();

    let mut failing_functions = Vec::new();
    let mut failing_lines = Vec::new();
    let mut test_names = Vec::new();
    let mut error_messages = Vec::new();
    let mut error_types = Vec::new();
    let mut failed_test_cases = Vec::new();

    for (region, case) in &failed {
        if let Some(function) = resolver.resolve(region, case)
            && !failing_functions.contains(&function)
        {
            failing_functions.push(function);
        }
        if let Some(line) = case.failing_line
            && !failing_lines.contains(&line)
        {
            failing_lines.push(line);
        }
        test_names.push(case.name.clone());
        if let Some(message) = &case.details {
            error_messages.push(message.clone());
            if let Some(error_type) = error_type_of(message)
                && !error_types.contains(&error_type)
            {
                error_types.push(error_type);
            }
        }
        failed_test_cases.push(FailedCase {
            test_name: case.name.clone(),
            region: region.to_string(),
            error_message: case.details.clone(),
        });
    }
    failing_lines.sort_unstable();

    let best_attempt_so_far = compare::find_best_attempt(attempts).map(|attempt| BestAttemptRef {
        success_rate: attempt.success_rate(),
        attempt_number: attempt.attempt_number,
    });

    FailureAnalysis {
        original_relevant_sections,
        failing_functions,
        failing_lines,
        test_names,
        error_messages,
        error_types,
        failed_test_cases,
        best_attempt_so_far,
        regression_analysis: compare::detect_regressions(attempts),
    }
}

/// Leading `SomeError:` token of an error message, when present.
fn error_type_of(message: &str) -> Option<String> {
    let head = message.split(':').next()?.trim();
    if head.is_empty() || head.contains(char::is_whitespace) {
        return None;
    }
    head.chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        .then(|| head.to_string())
}
