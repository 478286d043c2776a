//! Auto-fix loop orchestration.
//!
//! Coordinates the collaborators strictly sequentially: each attempt's prompt
//! is built from freshly-queried memory so it sees every committed prior
//! attempt. Collaborator failures (LLM unavailable, unusable response, test
//! runner error) are recorded as failed attempts and the loop continues; they
//! never abort the run.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use harness::config::MendConfig;
use harness::history::TestExecutionHistory;
use harness::legacy::LegacyResults;
use harness::region::RegionExtractor;
use harness::runner::TestRunner;
use harness::suite::SuiteFile;

use crate::capture::{self, AttemptWriteRequest};
use crate::explain::Explainer;
use crate::llm::{self, LlmClient};
use crate::memory::{ExecutionMemory, LlmInteraction, NewFixAttempt};
use crate::prompt::{PromptBuilder, PromptInputs};
use crate::report::{self, FixReport};
use crate::targeting::RegionThenMetadataResolver;

/// The injected collaborator seams the loop sequences.
pub struct FixCollaborators<'a> {
    pub runner: &'a dyn TestRunner,
    pub llm: &'a dyn LlmClient,
    pub explainer: &'a dyn Explainer,
    pub extractor: &'a dyn RegionExtractor,
}

/// One fix run's inputs.
pub struct FixRequest<'a> {
    pub suite: &'a SuiteFile,
    pub suite_path: &'a Path,
    pub config: &'a MendConfig,
    /// Directory containing the agent source file and `.mend/` artifacts.
    pub workspace_root: &'a Path,
}

/// Result of one fix run.
#[derive(Debug)]
pub struct FixOutcome {
    pub execution_id: String,
    pub report: FixReport,
    pub history: TestExecutionHistory,
}

/// Unique execution id: timestamp plus random suffix.
pub fn generate_execution_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("fix-{}-{}", timestamp, suffix.to_lowercase())
}

/// Run the fix loop end-to-end for one suite.
///
/// The loop stops early the moment a re-run passes every test; otherwise it
/// runs until `max_retries`. When the loop ends without success the original
/// source is restored; the best attempt is reported, not left applied.
#[instrument(skip_all, fields(agent = %request.suite.agent.name))]
pub fn run_fix(
    collaborators: &FixCollaborators<'_>,
    request: &FixRequest<'_>,
    memory: &mut ExecutionMemory,
) -> Result<FixOutcome> {
    info!("fix run started");
    let execution_id = generate_execution_id();
    let config_value = serde_json::to_value(request.config).context("serialize config")?;
    memory.start_execution(&execution_id, config_value);

    let agent_path = request.workspace_root.join(&request.suite.agent.file_path);
    let file_key = request.suite.agent.file_path.display().to_string();
    let original_source = fs::read_to_string(&agent_path)
        .with_context(|| format!("read agent source {}", agent_path.display()))?;

    let sections = collaborators
        .extractor
        .extract(&original_source)
        .context("extract code regions")?;
    memory.save_original_relevant_code(&file_key, sections)?;

    debug!("running baseline");
    let baseline = collaborators
        .runner
        .run(request.suite, request.suite_path)
        .context("run baseline tests")?;
    let mut history = TestExecutionHistory::new();
    history.add_baseline_result(baseline.clone())?;
    memory.log_test_run(&file_key, baseline.to_legacy_format())?;
    info!(
        failed = baseline.failure_count(),
        total = baseline.summary.total_tests,
        "baseline finished"
    );

    let mut warnings = Vec::new();
    let builder = PromptBuilder::new(request.config.prompt_budget_bytes);
    let resolver = RegionThenMetadataResolver;
    let mut current_source = original_source.clone();
    let mut fixed = baseline.is_successful();
    let mut attempt_number = 0u32;

    while !fixed && attempt_number < request.config.max_retries {
        attempt_number += 1;
        info!(attempt = attempt_number, "starting fix attempt");

        // Re-query memory each iteration; the prompt must see the latest
        // committed attempt, never a cached copy.
        let insights = memory.previous_attempts_insights(&file_key);
        let incremental = memory.incremental_learning(&file_key);
        let analysis = memory.failure_analysis(&file_key, &resolver);
        let before = memory
            .latest_run(&file_key)
            .cloned()
            .unwrap_or_else(|| baseline.to_legacy_format());

        let failing_cases = insights.current_failed_cases.clone();
        let prompt = builder
            .build_fix(&PromptInputs {
                file_path: file_key.clone(),
                file_content: current_source.clone(),
                failing_cases,
                learning: Some(insights),
                incremental: Some(incremental),
                targeting: Some(analysis),
                related_files: BTreeMap::new(),
            })?
            .render();

        let response = match collaborators.llm.complete(&prompt) {
            Ok(response) => response,
            Err(err) => {
                warn!(attempt = attempt_number, error = %err, "llm request failed");
                log_collaborator_failure(
                    memory,
                    &CollaboratorFailure {
                        file_key: &file_key,
                        attempt_number,
                        source: &current_source,
                        before: &before,
                        prompt: &prompt,
                        response: "",
                        why: format!("llm request failed: {err:#}"),
                    },
                )?;
                continue;
            }
        };
        memory.log_llm_interaction(
            &file_key,
            "code_fixing",
            &prompt,
            &response,
            None,
            BTreeMap::from([("attempt_number".to_string(), Value::from(attempt_number))]),
        )?;

        let Some(fixed_code) = llm::extract_code_block(&response) else {
            warn!(attempt = attempt_number, "no usable code in llm response");
            log_collaborator_failure(
                memory,
                &CollaboratorFailure {
                    file_key: &file_key,
                    attempt_number,
                    source: &current_source,
                    before: &before,
                    prompt: &prompt,
                    response: &response,
                    why: "llm response contained no usable code".to_string(),
                },
            )?;
            continue;
        };

        fs::write(&agent_path, &fixed_code)
            .with_context(|| format!("apply fix to {}", agent_path.display()))?;

        let result = match collaborators.runner.run(request.suite, request.suite_path) {
            Ok(result) => result,
            Err(err) => {
                warn!(attempt = attempt_number, error = %err, "test run failed after fix");
                fs::write(&agent_path, &current_source)
                    .with_context(|| format!("roll back {}", agent_path.display()))?;
                log_collaborator_failure(
                    memory,
                    &CollaboratorFailure {
                        file_key: &file_key,
                        attempt_number,
                        source: &current_source,
                        before: &before,
                        prompt: &prompt,
                        response: &response,
                        why: format!("test runner failed: {err:#}"),
                    },
                )?;
                continue;
            }
        };

        history.add_fix_attempt_result(result.clone())?;
        let after = result.to_legacy_format();
        let success = result.is_successful();
        let explanation = collaborators.explainer.explain(&before, &after);
        memory.log_test_run(&file_key, after.clone())?;

        let mut interaction = LlmInteraction::new("code_fixing", prompt.clone(), response.clone());
        interaction
            .metadata
            .insert("attempt_number".to_string(), Value::from(attempt_number));

        let fallback_approach = format!("attempt {attempt_number} code rewrite");
        memory.log_fix_attempt(NewFixAttempt {
            file_path: file_key.clone(),
            attempt_number,
            original_code: current_source.clone(),
            fixed_code: fixed_code.clone(),
            success,
            test_results_before: before,
            test_results_after: after,
            approach_description: llm::extract_approach(&response, &fallback_approach),
            code_changes: describe_changes(&current_source, &fixed_code),
            llm_interaction: interaction,
            why_approach_failed: if success {
                None
            } else {
                explanation
                    .why_approach_failed
                    .or_else(|| Some("tests still failing".to_string()))
            },
            lessons_learned: explanation.lessons_learned,
            what_worked_partially: explanation.what_worked_partially,
        })?;

        if let Some(attempt) = memory.attempts_for(&file_key).into_iter().last() {
            capture::write_attempt_best_effort(
                &AttemptWriteRequest {
                    root: request.workspace_root,
                    execution_id: &execution_id,
                    prompt: &prompt,
                    response: &response,
                    attempt,
                },
                &mut warnings,
            );
        }

        info!(
            attempt = attempt_number,
            passed = result.summary.passed_tests,
            total = result.summary.total_tests,
            "attempt finished"
        );

        current_source = fixed_code;
        if success {
            history.set_final_result(result)?;
            fixed = true;
        }
    }

    if !fixed && current_source != original_source {
        fs::write(&agent_path, &original_source)
            .with_context(|| format!("restore {}", agent_path.display()))?;
        debug!("restored original source after unsuccessful fix loop");
    }

    let report = report::build_report(&execution_id, &file_key, &history, memory, warnings);
    if let Err(err) = capture::write_report(request.workspace_root, &report) {
        warn!(error = %err, "report capture failed");
    }
    info!(status = ?report.status, "fix run complete");

    Ok(FixOutcome {
        execution_id,
        report,
        history,
    })
}

struct CollaboratorFailure<'a> {
    file_key: &'a str,
    attempt_number: u32,
    source: &'a str,
    before: &'a LegacyResults,
    prompt: &'a str,
    response: &'a str,
    why: String,
}

/// Record an attempt whose collaborator failed before tests could improve.
/// The before snapshot doubles as the after state: nothing changed.
fn log_collaborator_failure(
    memory: &mut ExecutionMemory,
    failure: &CollaboratorFailure<'_>,
) -> Result<()> {
    let mut interaction =
        LlmInteraction::new("code_fixing", failure.prompt, failure.response);
    interaction.metadata.insert(
        "attempt_number".to_string(),
        Value::from(failure.attempt_number),
    );
    memory.log_fix_attempt(NewFixAttempt {
        file_path: failure.file_key.to_string(),
        attempt_number: failure.attempt_number,
        original_code: failure.source.to_string(),
        fixed_code: failure.source.to_string(),
        success: false,
        test_results_before: failure.before.clone(),
        test_results_after: failure.before.clone(),
        approach_description: "no code change applied".to_string(),
        code_changes: "none".to_string(),
        llm_interaction: interaction,
        why_approach_failed: Some(failure.why.clone()),
        lessons_learned: None,
        what_worked_partially: None,
    })
}

/// Human-readable diff summary for the attempt record.
fn describe_changes(original: &str, fixed: &str) -> String {
    let before: Vec<&str> = original.lines().collect();
    let after: Vec<&str> = fixed.lines().collect();
    let first_change = before
        .iter()
        .zip(after.iter())
        .position(|(left, right)| left != right);
    match first_change {
        Some(index) => format!(
            "rewrote file ({} -> {} lines, first change at line {})",
            before.len(),
            after.len(),
            index + 1
        ),
        None if before.len() != after.len() => format!(
            "rewrote file ({} -> {} lines, tail changed)",
            before.len(),
            after.len()
        ),
        None => "no textual change".to_string(),
    }
}
