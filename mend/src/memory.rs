//! Execution memory: the system of record for one auto-fix execution.
//!
//! Memory is explicitly constructed and dependency-injected into every
//! component that needs history. `start_execution` resets all state; the
//! store lives for exactly one tool invocation. `log_*` mutators may fail on
//! structurally invalid input only; every read accessor is total and returns
//! an empty structure for file paths it has never seen.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use harness::legacy::LegacyResults;
use harness::region::CodeSection;

use crate::compare::{self, AttemptComparison, RegressionAnalysis};
use crate::insights::{self, IncrementalLearning, PreviousAttemptsInsights};
use crate::targeting::{self, FailureAnalysis, FunctionResolver};

/// One request/response pair with the fixer's language model.
#[derive(Debug, Clone, Serialize)]
pub struct LlmInteraction {
    pub interaction_type: String,
    pub prompt: String,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl LlmInteraction {
    pub fn new(
        interaction_type: impl Into<String>,
        prompt: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            interaction_type: interaction_type.into(),
            prompt: prompt.into(),
            response: response.into(),
            reasoning: None,
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }
}

/// One completed iteration of the auto-fix loop. Append-only historical
/// record: never mutated after logging.
#[derive(Debug, Clone, Serialize)]
pub struct FixAttempt {
    pub attempt_number: u32,
    pub file_path: String,
    pub approach_description: String,
    pub code_changes_made: String,
    pub original_code: String,
    pub modified_code: String,
    /// SHA-256 of `modified_code`, used to flag resubmitted identical code.
    pub code_digest: String,
    pub test_results_before: LegacyResults,
    pub test_results_after: LegacyResults,
    pub success: bool,
    pub llm_interaction: LlmInteraction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lessons_learned: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub why_approach_failed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub what_worked_partially: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FixAttempt {
    /// Success rate of the after-state, 0.0 when no tests ran.
    pub fn success_rate(&self) -> f64 {
        self.test_results_after.success_rate()
    }
}

/// Inputs for logging a completed fix attempt.
#[derive(Debug, Clone)]
pub struct NewFixAttempt {
    pub file_path: String,
    pub attempt_number: u32,
    pub original_code: String,
    pub fixed_code: String,
    pub success: bool,
    pub test_results_before: LegacyResults,
    pub test_results_after: LegacyResults,
    pub approach_description: String,
    pub code_changes: String,
    pub llm_interaction: LlmInteraction,
    pub why_approach_failed: Option<String>,
    pub lessons_learned: Option<String>,
    pub what_worked_partially: Option<String>,
}

#[derive(Debug)]
struct ExecutionRecord {
    execution_id: String,
    config: Value,
    started_at: DateTime<Utc>,
    fix_attempts: Vec<FixAttempt>,
    llm_interactions: Vec<LlmInteraction>,
    original_sections: BTreeMap<String, BTreeMap<String, CodeSection>>,
    latest_test_runs: BTreeMap<String, LegacyResults>,
}

/// Process-scoped store of one execution's fix attempts, LLM interactions,
/// and test runs, keyed by file path.
#[derive(Debug, Default)]
pub struct ExecutionMemory {
    execution: Option<ExecutionRecord>,
}

impl ExecutionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all in-memory state with a fresh record. Always succeeds.
    pub fn start_execution(&mut self, execution_id: impl Into<String>, config: Value) {
        self.execution = Some(ExecutionRecord {
            execution_id: execution_id.into(),
            config,
            started_at: Utc::now(),
            fix_attempts: Vec::new(),
            llm_interactions: Vec::new(),
            original_sections: BTreeMap::new(),
            latest_test_runs: BTreeMap::new(),
        });
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution
            .as_ref()
            .map(|record| record.execution_id.as_str())
    }

    pub fn config(&self) -> Option<&Value> {
        self.execution.as_ref().map(|record| &record.config)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.execution.as_ref().map(|record| record.started_at)
    }

    /// Store the pre-fix code sections for a file. Last write wins.
    pub fn save_original_relevant_code(
        &mut self,
        file_path: &str,
        sections: BTreeMap<String, CodeSection>,
    ) -> Result<()> {
        let record = self.active_mut()?;
        record
            .original_sections
            .insert(file_path.to_string(), sections);
        Ok(())
    }

    /// Record the most recent raw test-run payload for a file. Earlier runs
    /// stay reachable via attempt before/after snapshots.
    pub fn log_test_run(&mut self, file_path: &str, results: LegacyResults) -> Result<()> {
        let record = self.active_mut()?;
        record
            .latest_test_runs
            .insert(file_path.to_string(), results);
        Ok(())
    }

    /// Append an LLM interaction to the execution-wide ordered list, tagging
    /// it with the file path for later filtering.
    pub fn log_llm_interaction(
        &mut self,
        file_path: &str,
        interaction_type: &str,
        prompt: &str,
        response: &str,
        reasoning: Option<String>,
        metadata: BTreeMap<String, Value>,
    ) -> Result<()> {
        let record = self.active_mut()?;
        let mut interaction = LlmInteraction::new(interaction_type, prompt, response);
        interaction.reasoning = reasoning;
        interaction.metadata = metadata;
        interaction.metadata.insert(
            "file_path".to_string(),
            Value::String(file_path.to_string()),
        );
        record.llm_interactions.push(interaction);
        Ok(())
    }

    /// Append a fix attempt record.
    ///
    /// Attempt numbers are 1-based and unique per file within an execution;
    /// duplicates are rejected rather than overwritten, because the attempt
    /// list is the permanent historical record.
    pub fn log_fix_attempt(&mut self, attempt: NewFixAttempt) -> Result<()> {
        if attempt.attempt_number == 0 {
            bail!("attempt_number must be >= 1");
        }
        let record = self.active_mut()?;
        if record.fix_attempts.iter().any(|existing| {
            existing.file_path == attempt.file_path
                && existing.attempt_number == attempt.attempt_number
        }) {
            bail!(
                "attempt {} already logged for {}",
                attempt.attempt_number,
                attempt.file_path
            );
        }
        let code_digest = code_digest(&attempt.fixed_code);
        record.fix_attempts.push(FixAttempt {
            attempt_number: attempt.attempt_number,
            file_path: attempt.file_path,
            approach_description: attempt.approach_description,
            code_changes_made: attempt.code_changes,
            original_code: attempt.original_code,
            modified_code: attempt.fixed_code,
            code_digest,
            test_results_before: attempt.test_results_before,
            test_results_after: attempt.test_results_after,
            success: attempt.success,
            llm_interaction: attempt.llm_interaction,
            lessons_learned: attempt.lessons_learned,
            why_approach_failed: attempt.why_approach_failed,
            what_worked_partially: attempt.what_worked_partially,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Attempts for a file in log order. Empty for unseen files.
    pub fn attempts_for(&self, file_path: &str) -> Vec<&FixAttempt> {
        self.execution
            .as_ref()
            .map(|record| {
                record
                    .fix_attempts
                    .iter()
                    .filter(|attempt| attempt.file_path == file_path)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// LLM interactions tagged with this file path, in log order.
    pub fn interactions_for(&self, file_path: &str) -> Vec<&LlmInteraction> {
        self.execution
            .as_ref()
            .map(|record| {
                record
                    .llm_interactions
                    .iter()
                    .filter(|interaction| {
                        interaction.metadata.get("file_path").and_then(Value::as_str)
                            == Some(file_path)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The latest logged test run for a file, if any.
    pub fn latest_run(&self, file_path: &str) -> Option<&LegacyResults> {
        self.execution
            .as_ref()
            .and_then(|record| record.latest_test_runs.get(file_path))
    }

    /// Original code sections stored for a file. Empty for unseen files.
    pub fn original_sections_for(&self, file_path: &str) -> BTreeMap<String, CodeSection> {
        self.execution
            .as_ref()
            .and_then(|record| record.original_sections.get(file_path).cloned())
            .unwrap_or_default()
    }

    /// True iff the latest logged run for the file has at least one test and
    /// zero failed or errored tests. No run logged means not all-passed.
    pub fn all_tests_passed_latest_run(&self, file_path: &str) -> bool {
        self.latest_run(file_path)
            .is_some_and(LegacyResults::all_passed)
    }

    /// See [`compare::find_best_attempt`]. None with zero attempts.
    pub fn find_best_attempt(&self, file_path: &str) -> Option<&FixAttempt> {
        compare::find_best_attempt(&self.attempts_for(file_path))
    }

    /// See [`compare::detect_regressions`]. Empty with fewer than two attempts.
    pub fn detect_regressions_from_last_attempt(&self, file_path: &str) -> RegressionAnalysis {
        compare::detect_regressions(&self.attempts_for(file_path))
    }

    /// See [`compare::compare_attempts`].
    pub fn compare_attempts(&self, file_path: &str) -> AttemptComparison {
        compare::compare_attempts(&self.attempts_for(file_path))
    }

    /// Learning context for prompt building. Total: an unseen file path
    /// yields a structure with every collection empty.
    pub fn previous_attempts_insights(&self, file_path: &str) -> PreviousAttemptsInsights {
        insights::previous_attempts_insights(
            &self.attempts_for(file_path),
            self.latest_run(file_path),
            self.original_sections_for(file_path),
        )
    }

    /// Strategic guidance derived from the attempt history.
    pub fn incremental_learning(&self, file_path: &str) -> IncrementalLearning {
        insights::incremental_learning(&self.attempts_for(file_path))
    }

    /// Targeting context pinpointing where a fix should apply.
    pub fn failure_analysis(
        &self,
        file_path: &str,
        resolver: &dyn FunctionResolver,
    ) -> FailureAnalysis {
        targeting::failure_analysis(
            &self.attempts_for(file_path),
            self.latest_run(file_path),
            self.original_sections_for(file_path),
            resolver,
        )
    }

    fn active_mut(&mut self) -> Result<&mut ExecutionRecord> {
        match &mut self.execution {
            Some(record) => Ok(record),
            None => bail!("no active execution; call start_execution first"),
        }
    }
}

/// SHA-256 hex digest of a code snapshot.
pub fn code_digest(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{legacy_with_failures, new_attempt};

    fn started_memory() -> ExecutionMemory {
        let mut memory = ExecutionMemory::new();
        memory.start_execution("exec-1", Value::Null);
        memory
    }

    #[test]
    fn start_execution_resets_state() {
        let mut memory = started_memory();
        memory
            .log_test_run("a.py", legacy_with_failures(1, 2))
            .expect("log run");
        memory
            .log_fix_attempt(new_attempt("a.py", 1, 1, 2))
            .expect("log attempt");

        memory.start_execution("exec-2", Value::Null);
        assert_eq!(memory.execution_id(), Some("exec-2"));
        assert!(memory.attempts_for("a.py").is_empty());
        assert!(memory.latest_run("a.py").is_none());
    }

    #[test]
    fn mutators_require_active_execution() {
        let mut memory = ExecutionMemory::new();
        let err = memory
            .log_test_run("a.py", legacy_with_failures(0, 1))
            .expect_err("no execution");
        assert!(err.to_string().contains("no active execution"));
    }

    #[test]
    fn duplicate_attempt_number_is_rejected() {
        let mut memory = started_memory();
        memory
            .log_fix_attempt(new_attempt("a.py", 1, 1, 2))
            .expect("first attempt");
        let err = memory
            .log_fix_attempt(new_attempt("a.py", 1, 0, 2))
            .expect_err("duplicate attempt");
        assert!(err.to_string().contains("already logged"));

        // Same number for a different file is fine.
        memory
            .log_fix_attempt(new_attempt("b.py", 1, 0, 2))
            .expect("other file");
    }

    #[test]
    fn zero_attempt_number_is_rejected() {
        let mut memory = started_memory();
        let err = memory
            .log_fix_attempt(new_attempt("a.py", 0, 1, 2))
            .expect_err("zero attempt number");
        assert!(err.to_string().contains(">= 1"));
    }

    #[test]
    fn latest_run_is_overwritten_per_file() {
        let mut memory = started_memory();
        memory
            .log_test_run("a.py", legacy_with_failures(2, 2))
            .expect("first run");
        memory
            .log_test_run("a.py", legacy_with_failures(0, 2))
            .expect("second run");
        assert!(memory.all_tests_passed_latest_run("a.py"));
    }

    #[test]
    fn all_tests_passed_is_false_for_unseen_file() {
        let memory = started_memory();
        assert!(!memory.all_tests_passed_latest_run("never_seen.py"));
    }

    #[test]
    fn all_tests_passed_requires_at_least_one_test() {
        let mut memory = started_memory();
        memory
            .log_test_run("empty.py", legacy_with_failures(0, 0))
            .expect("empty run");
        assert!(!memory.all_tests_passed_latest_run("empty.py"));
    }

    #[test]
    fn read_accessors_are_total_without_execution() {
        let memory = ExecutionMemory::new();
        assert!(memory.attempts_for("a.py").is_empty());
        assert!(memory.latest_run("a.py").is_none());
        assert!(memory.original_sections_for("a.py").is_empty());
        assert!(memory.find_best_attempt("a.py").is_none());
        assert!(!memory.all_tests_passed_latest_run("a.py"));

        let insights = memory.previous_attempts_insights("a.py");
        assert!(insights.previous_attempts_history.is_empty());
        assert!(insights.failed_approaches_to_avoid.is_empty());
    }

    #[test]
    fn llm_interactions_are_tagged_and_filterable() {
        let mut memory = started_memory();
        memory
            .log_llm_interaction("a.py", "code_fixing", "p1", "r1", None, BTreeMap::new())
            .expect("log a");
        memory
            .log_llm_interaction("b.py", "code_fixing", "p2", "r2", None, BTreeMap::new())
            .expect("log b");

        let for_a = memory.interactions_for("a.py");
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].prompt, "p1");
    }

    #[test]
    fn code_digest_is_stable_and_distinguishes_code() {
        assert_eq!(code_digest("x = 1"), code_digest("x = 1"));
        assert_ne!(code_digest("x = 1"), code_digest("x = 2"));
    }

    #[test]
    fn save_original_relevant_code_overwrites() {
        let mut memory = started_memory();
        let mut first = BTreeMap::new();
        first.insert(
            "validate".to_string(),
            CodeSection {
                line_start: 1,
                line_end: 2,
                content: "v1".to_string(),
            },
        );
        memory
            .save_original_relevant_code("a.py", first)
            .expect("first save");

        let mut second = BTreeMap::new();
        second.insert(
            "validate".to_string(),
            CodeSection {
                line_start: 1,
                line_end: 3,
                content: "v2".to_string(),
            },
        );
        memory
            .save_original_relevant_code("a.py", second)
            .expect("second save");

        let sections = memory.original_sections_for("a.py");
        assert_eq!(sections["validate"].content, "v2");
    }
}
