//! Loop-level tests for full fix-run scenarios.
//!
//! These drive `run_fix` end-to-end with scripted collaborators to verify
//! sequencing: baseline capture, per-attempt learning, early termination,
//! best-attempt reporting, and source restoration.

use std::fs;
use std::path::Path;

use harness::config::MendConfig;
use harness::region::MarkerExtractor;
use harness::test_support::result_with_failures;

use mend::explain::HeuristicExplainer;
use mend::memory::ExecutionMemory;
use mend::report::FixReportStatus;
use mend::run::{FixCollaborators, FixRequest, run_fix};
use mend::test_support::{ScriptedLlm, ScriptedRunner};

const AGENT_SOURCE: &str = "\
# mend:start:validate_input
def validate_input(data):
    return True
# mend:end:validate_input
";

const SUITE: &str = r#"
[agent]
name = "agent"
file_path = "agent.py"

[[tests]]
name = "test_valid"
region = "validate_input"
cmd = ["true"]
expected_output = "ok"
"#;

fn write_workspace(root: &Path) -> std::path::PathBuf {
    fs::write(root.join("agent.py"), AGENT_SOURCE).expect("write agent");
    let suite_path = root.join("suite.toml");
    fs::write(&suite_path, SUITE).expect("write suite");
    suite_path
}

fn config(max_retries: u32) -> MendConfig {
    let mut cfg = MendConfig::default();
    cfg.auto_fix = true;
    cfg.max_retries = max_retries;
    cfg.llm.command = vec!["unused".to_string()];
    cfg
}

fn response(approach: &str, code: &str) -> String {
    format!("{approach}\n```python\n{code}\n```")
}

/// Full lifecycle: baseline fails 3/3, attempt 1 fixes one test, attempt 2
/// fixes the rest. The loop stops early, the fix stays applied, and the
/// report pins the §8 improvement scenario.
#[test]
fn fix_loop_converges_and_keeps_final_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let suite_path = write_workspace(temp.path());
    let suite = harness::suite::SuiteFile::load(&suite_path).expect("suite");

    let runner = ScriptedRunner::with_results(vec![
        result_with_failures("agent", 3, 3),
        result_with_failures("agent", 1, 3),
        result_with_failures("agent", 0, 3),
    ]);
    let llm = ScriptedLlm::with_responses(vec![
        response("Add a type check.", "def validate_input(data):\n    return isinstance(data, str)"),
        response(
            "Also reject empty strings.",
            "def validate_input(data):\n    return isinstance(data, str) and len(data) > 0",
        ),
    ]);
    let extractor = MarkerExtractor::default();
    let collaborators = FixCollaborators {
        runner: &runner,
        llm: &llm,
        explainer: &HeuristicExplainer,
        extractor: &extractor,
    };
    let cfg = config(3);
    let request = FixRequest {
        suite: &suite,
        suite_path: &suite_path,
        config: &cfg,
        workspace_root: temp.path(),
    };

    let mut memory = ExecutionMemory::new();
    let outcome = run_fix(&collaborators, &request, &mut memory).expect("run fix");

    assert_eq!(outcome.report.status, FixReportStatus::Fixed);
    assert_eq!(outcome.report.improvement.baseline_failed, 3);
    assert_eq!(outcome.report.improvement.current_failed, 0);
    assert_eq!(outcome.report.improvement.improvement, 3);
    assert!(outcome.report.improvement.has_improvement);
    assert!(outcome.report.improvement.all_passed);

    let best = outcome.report.best_attempt.as_ref().expect("best attempt");
    assert_eq!(best.attempt_number, 2);
    assert_eq!(best.success_rate, 1.0);

    // History: baseline, two attempts, final.
    let run_types: Vec<String> = outcome
        .report
        .progression
        .iter()
        .map(|entry| entry.run_type.clone())
        .collect();
    assert_eq!(
        run_types,
        vec!["baseline", "fix_attempt_1", "fix_attempt_2", "final"]
    );

    // The successful fix stays applied.
    let source = fs::read_to_string(temp.path().join("agent.py")).expect("agent source");
    assert!(source.contains("len(data) > 0"));

    // Memory committed both attempts and the passing latest run.
    assert_eq!(memory.attempts_for("agent.py").len(), 2);
    assert!(memory.all_tests_passed_latest_run("agent.py"));

    // Attempt artifacts were captured.
    let attempts_dir = temp
        .path()
        .join(".mend")
        .join("attempts")
        .join(&outcome.execution_id);
    assert!(attempts_dir.join("1").join("prompt.md").is_file());
    assert!(attempts_dir.join("2").join("result.json").is_file());
}

/// The second attempt's prompt must include learning context from the first
/// committed attempt: each iteration re-queries memory.
#[test]
fn later_prompts_carry_learning_from_earlier_attempts() {
    let temp = tempfile::tempdir().expect("tempdir");
    let suite_path = write_workspace(temp.path());
    let suite = harness::suite::SuiteFile::load(&suite_path).expect("suite");

    let runner = ScriptedRunner::with_results(vec![
        result_with_failures("agent", 2, 2),
        result_with_failures("agent", 2, 2),
        result_with_failures("agent", 0, 2),
    ]);
    let llm = ScriptedLlm::with_responses(vec![
        response("Raise on bad input.", "def validate_input(data):\n    raise TypeError"),
        response("Return False instead.", "def validate_input(data):\n    return False"),
    ]);
    let extractor = MarkerExtractor::default();
    let collaborators = FixCollaborators {
        runner: &runner,
        llm: &llm,
        explainer: &HeuristicExplainer,
        extractor: &extractor,
    };
    let cfg = config(2);
    let request = FixRequest {
        suite: &suite,
        suite_path: &suite_path,
        config: &cfg,
        workspace_root: temp.path(),
    };

    let mut memory = ExecutionMemory::new();
    run_fix(&collaborators, &request, &mut memory).expect("run fix");

    let prompts = llm.prompts_seen();
    assert_eq!(prompts.len(), 2);
    assert!(
        !prompts[0].contains("### Learning Context"),
        "attempt 1 has no history yet"
    );
    assert!(
        prompts[1].contains("Raise on bad input."),
        "attempt 2 must see attempt 1's failed approach"
    );
    assert!(prompts[1].contains("### Previous Attempts"));
}

/// LLM failures become failed attempts; the loop exhausts retries, restores
/// the original source, and reports Unchanged rather than erroring.
#[test]
fn llm_failure_is_recorded_not_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let suite_path = write_workspace(temp.path());
    let suite = harness::suite::SuiteFile::load(&suite_path).expect("suite");

    let runner = ScriptedRunner::with_results(vec![result_with_failures("agent", 1, 2)]);
    let llm = ScriptedLlm::with_responses(Vec::new());
    let extractor = MarkerExtractor::default();
    let collaborators = FixCollaborators {
        runner: &runner,
        llm: &llm,
        explainer: &HeuristicExplainer,
        extractor: &extractor,
    };
    let cfg = config(2);
    let request = FixRequest {
        suite: &suite,
        suite_path: &suite_path,
        config: &cfg,
        workspace_root: temp.path(),
    };

    let mut memory = ExecutionMemory::new();
    let outcome = run_fix(&collaborators, &request, &mut memory).expect("run fix");

    assert_eq!(outcome.report.status, FixReportStatus::Unchanged);
    let attempts = memory.attempts_for("agent.py");
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|attempt| !attempt.success));
    assert!(
        attempts[0]
            .why_approach_failed
            .as_deref()
            .expect("why")
            .contains("llm request failed")
    );

    let source = fs::read_to_string(temp.path().join("agent.py")).expect("agent source");
    assert_eq!(source, AGENT_SOURCE);
}

/// Exhausted retries with partial progress: the best attempt is reported and
/// the original source is restored; closest-we-got is a valid terminal
/// state, not a crash.
#[test]
fn exhausted_retries_report_best_attempt_and_restore_source() {
    let temp = tempfile::tempdir().expect("tempdir");
    let suite_path = write_workspace(temp.path());
    let suite = harness::suite::SuiteFile::load(&suite_path).expect("suite");

    let runner = ScriptedRunner::with_results(vec![
        result_with_failures("agent", 3, 3),
        result_with_failures("agent", 2, 3),
        result_with_failures("agent", 1, 3),
    ]);
    let llm = ScriptedLlm::with_responses(vec![
        response("First try.", "def validate_input(data):\n    return 1"),
        response("Second try.", "def validate_input(data):\n    return 2"),
    ]);
    let extractor = MarkerExtractor::default();
    let collaborators = FixCollaborators {
        runner: &runner,
        llm: &llm,
        explainer: &HeuristicExplainer,
        extractor: &extractor,
    };
    let cfg = config(2);
    let request = FixRequest {
        suite: &suite,
        suite_path: &suite_path,
        config: &cfg,
        workspace_root: temp.path(),
    };

    let mut memory = ExecutionMemory::new();
    let outcome = run_fix(&collaborators, &request, &mut memory).expect("run fix");

    assert_eq!(outcome.report.status, FixReportStatus::Improved);
    let best = outcome.report.best_attempt.as_ref().expect("best attempt");
    assert_eq!(best.attempt_number, 2);

    let source = fs::read_to_string(temp.path().join("agent.py")).expect("agent source");
    assert_eq!(source, AGENT_SOURCE);
}

/// A baseline that already passes runs zero attempts and reports Fixed.
#[test]
fn passing_baseline_skips_the_loop() {
    let temp = tempfile::tempdir().expect("tempdir");
    let suite_path = write_workspace(temp.path());
    let suite = harness::suite::SuiteFile::load(&suite_path).expect("suite");

    let runner = ScriptedRunner::with_results(vec![result_with_failures("agent", 0, 2)]);
    let llm = ScriptedLlm::with_responses(Vec::new());
    let extractor = MarkerExtractor::default();
    let collaborators = FixCollaborators {
        runner: &runner,
        llm: &llm,
        explainer: &HeuristicExplainer,
        extractor: &extractor,
    };
    let cfg = config(3);
    let request = FixRequest {
        suite: &suite,
        suite_path: &suite_path,
        config: &cfg,
        workspace_root: temp.path(),
    };

    let mut memory = ExecutionMemory::new();
    let outcome = run_fix(&collaborators, &request, &mut memory).expect("run fix");

    assert_eq!(outcome.report.status, FixReportStatus::Fixed);
    assert!(outcome.report.best_attempt.is_none());
    assert!(llm.prompts_seen().is_empty());
    assert!(memory.attempts_for("agent.py").is_empty());
}
