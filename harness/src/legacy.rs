//! Legacy region-keyed result format and round-trip conversions.
//!
//! The legacy format groups test cases under named region keys plus an
//! `overall_status` entry, and is what report writers and the fix loop's
//! attempt snapshots consume. Raw JSON documents are validated against a
//! vendored schema before typed ingestion, so malformed payloads are rejected
//! at the boundary instead of surfacing as missing-key surprises later.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::{TestCaseResult, TestExecutionResult, TestStatus};

const V1_SCHEMA: &str = include_str!("../../schemas/legacy_results/v1.schema.json");

/// A full legacy document: region name -> region results, plus overall status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyResults {
    #[serde(flatten)]
    pub regions: BTreeMap<String, LegacyRegion>,
    pub overall_status: LegacyOverallStatus,
}

/// Test cases recorded for one region, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyRegion {
    pub test_cases: Vec<LegacyTestCase>,
}

/// One test case in the looser legacy shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyTestCase {
    pub name: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure description (the legacy format's single error field).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyOverallStatus {
    pub status: TestStatus,
    pub summary: LegacyRegionSummary,
}

/// Region-level counts (the legacy summary counts regions, not test cases).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyRegionSummary {
    pub total_regions: usize,
    pub passed_regions: usize,
    pub failed_regions: usize,
    pub error_regions: usize,
}

impl LegacyResults {
    /// Parse a raw JSON document, validating against the vendored schema first.
    pub fn from_json(raw: &Value) -> Result<Self> {
        validate_schema(raw)?;
        let results: LegacyResults =
            serde_json::from_value(raw.clone()).context("parse legacy results")?;
        Ok(results)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).expect("legacy results serialize")
    }

    /// Per-test-case counts: (total, passed, failed, error).
    pub fn case_counts(&self) -> (usize, usize, usize, usize) {
        let mut total = 0;
        let mut passed = 0;
        let mut failed = 0;
        let mut errored = 0;
        for region in self.regions.values() {
            for case in &region.test_cases {
                total += 1;
                match case.status {
                    TestStatus::Passed => passed += 1,
                    TestStatus::Failed => failed += 1,
                    TestStatus::Error => errored += 1,
                    TestStatus::Skipped => {}
                }
            }
        }
        (total, passed, failed, errored)
    }

    /// Fraction of test cases passing, 0.0 when the document holds no cases.
    pub fn success_rate(&self) -> f64 {
        let (total, passed, _, _) = self.case_counts();
        if total == 0 {
            return 0.0;
        }
        passed as f64 / total as f64
    }

    /// True iff at least one case ran and none failed or errored.
    pub fn all_passed(&self) -> bool {
        let (total, _, failed, errored) = self.case_counts();
        total > 0 && failed == 0 && errored == 0
    }

    /// Names of passing cases, in region order then execution order.
    pub fn passed_case_names(&self) -> Vec<String> {
        self.case_names_where(|case| case.status == TestStatus::Passed)
    }

    /// Names of failing or errored cases, in region order then execution order.
    pub fn failed_case_names(&self) -> Vec<String> {
        self.case_names_where(|case| {
            matches!(case.status, TestStatus::Failed | TestStatus::Error)
        })
    }

    /// Failing or errored cases with their region names.
    pub fn failed_cases(&self) -> Vec<(&str, &LegacyTestCase)> {
        let mut cases = Vec::new();
        for (region, results) in &self.regions {
            for case in &results.test_cases {
                if matches!(case.status, TestStatus::Failed | TestStatus::Error) {
                    cases.push((region.as_str(), case));
                }
            }
        }
        cases
    }

    fn case_names_where(&self, keep: impl Fn(&LegacyTestCase) -> bool) -> Vec<String> {
        self.regions
            .values()
            .flat_map(|region| region.test_cases.iter())
            .filter(|case| keep(case))
            .map(|case| case.name.clone())
            .collect()
    }
}

impl TestExecutionResult {
    /// Convert to the legacy region-keyed document.
    ///
    /// Cases without a region land under `default`.
    pub fn to_legacy_format(&self) -> LegacyResults {
        let mut regions: BTreeMap<String, LegacyRegion> = BTreeMap::new();
        for case in &self.test_cases {
            let region = case.region.clone().unwrap_or_else(|| "default".to_string());
            regions
                .entry(region)
                .or_insert_with(|| LegacyRegion {
                    test_cases: Vec::new(),
                })
                .test_cases
                .push(legacy_case_from(case));
        }

        let overall_status = derive_overall_status(&regions);
        LegacyResults {
            regions,
            overall_status,
        }
    }

    /// Reconstruct a result from a legacy document.
    ///
    /// Names, statuses, inputs/outputs and overall status survive the round
    /// trip; error detail fidelity is best-effort because the legacy shape
    /// holds a single `details` field.
    pub fn from_legacy_format(
        name: impl Into<String>,
        file_path: impl AsRef<Path>,
        config_path: impl AsRef<Path>,
        legacy: &LegacyResults,
    ) -> Self {
        let mut result = TestExecutionResult::new(
            name,
            file_path.as_ref().to_path_buf(),
            config_path.as_ref().to_path_buf(),
        );
        let mut cases = Vec::new();
        for (region, results) in &legacy.regions {
            for case in &results.test_cases {
                cases.push(case_from_legacy(region, case));
            }
        }
        result.add_test_cases(cases);
        result
    }
}

fn legacy_case_from(case: &TestCaseResult) -> LegacyTestCase {
    LegacyTestCase {
        name: case.name.clone(),
        status: case.status,
        input: case.input.clone(),
        expected_output: case.expected_output.clone(),
        output: case.actual_output.clone(),
        details: case.error_message.clone(),
        evaluation: case.evaluation.clone(),
        failing_function: case
            .metadata
            .get("failing_function")
            .and_then(Value::as_str)
            .map(str::to_string),
        failing_line: case
            .metadata
            .get("failing_line")
            .and_then(Value::as_u64)
            .map(|line| line as u32),
    }
}

fn case_from_legacy(region: &str, case: &LegacyTestCase) -> TestCaseResult {
    let mut result = TestCaseResult::new(case.name.clone(), case.status);
    result.region = Some(region.to_string());
    result.input = case.input.clone();
    result.expected_output = case.expected_output.clone();
    result.actual_output = case.output.clone();
    result.error_message = case.details.clone();
    result.evaluation = case.evaluation.clone();
    if let Some(function) = &case.failing_function {
        result.metadata.insert(
            "failing_function".to_string(),
            Value::String(function.clone()),
        );
    }
    if let Some(line) = case.failing_line {
        result
            .metadata
            .insert("failing_line".to_string(), Value::from(line));
    }
    result
}

/// A region is failed if any case is not passed, and error if some case
/// errored while none passed.
fn region_status(cases: &[LegacyTestCase]) -> TestStatus {
    let any_passed = cases.iter().any(|case| case.status == TestStatus::Passed);
    let any_error = cases.iter().any(|case| case.status == TestStatus::Error);
    if any_error && !any_passed {
        return TestStatus::Error;
    }
    if !cases.is_empty() && cases.iter().all(|case| case.status == TestStatus::Passed) {
        return TestStatus::Passed;
    }
    TestStatus::Failed
}

fn derive_overall_status(regions: &BTreeMap<String, LegacyRegion>) -> LegacyOverallStatus {
    let mut summary = LegacyRegionSummary {
        total_regions: regions.len(),
        ..LegacyRegionSummary::default()
    };
    for region in regions.values() {
        match region_status(&region.test_cases) {
            TestStatus::Passed => summary.passed_regions += 1,
            TestStatus::Error => summary.error_regions += 1,
            TestStatus::Failed | TestStatus::Skipped => summary.failed_regions += 1,
        }
    }
    let status = if summary.total_regions > 0 && summary.passed_regions == summary.total_regions {
        TestStatus::Passed
    } else {
        TestStatus::Failed
    };
    LegacyOverallStatus { status, summary }
}

/// Validate a raw document against the vendored legacy schema.
fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(V1_SCHEMA).context("parse legacy schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile legacy schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!(
            "legacy results validation failed:\n- {}",
            messages.join("\n- ")
        );
    }
    Ok(())
}
