//! CLI command implementations.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use harness::config::{self, MendConfig};
use harness::region::MarkerExtractor;
use harness::runner::{CommandTestRunner, RunLimits, TestRunner};
use harness::suite::{SuiteFile, discover_suites};

use crate::capture;
use crate::explain::LlmExplainer;
use crate::llm::CommandLlm;
use crate::memory::ExecutionMemory;
use crate::report::FixReport;
use crate::run::{FixCollaborators, FixRequest, run_fix};

/// List all suites in a directory.
pub fn list_suites(dir: &Path) -> Result<()> {
    let suites = discover_suites(dir)?;
    for suite in suites {
        println!("{}", suite.agent.name);
    }
    Ok(())
}

/// Run a suite once and print per-test results.
pub fn test_suite(suite_path: &Path) -> Result<()> {
    let (suite, cfg, root) = load_suite(suite_path)?;
    let runner = command_runner(&cfg, &root);
    let result = runner.run(&suite, suite_path).context("run suite")?;

    for case in &result.test_cases {
        println!("test: {} {}", case.name, case.status.as_str());
        if let Some(message) = &case.error_message {
            println!("test:   {}", message);
        }
    }
    println!(
        "suite: {} {} ({}/{} passed)",
        suite.agent.name,
        result.status.as_str(),
        result.summary.passed_tests,
        result.summary.total_tests
    );
    Ok(())
}

/// Run a suite and auto-fix failures, printing the final report.
pub fn fix_suite(suite_path: &Path) -> Result<()> {
    let (suite, cfg, root) = load_suite(suite_path)?;
    if !cfg.auto_fix {
        bail!("auto_fix is disabled; enable it in config or suite settings");
    }

    let runner = command_runner(&cfg, &root);
    let llm = CommandLlm::new(
        cfg.llm.command.clone(),
        Duration::from_secs(cfg.llm.timeout_secs),
        cfg.output_limit_bytes,
    )?;
    let explainer = LlmExplainer::new(&llm);
    let extractor = MarkerExtractor::new(&cfg.markers.comment_prefix)?;

    let collaborators = FixCollaborators {
        runner: &runner,
        llm: &llm,
        explainer: &explainer,
        extractor: &extractor,
    };
    let request = FixRequest {
        suite: &suite,
        suite_path,
        config: &cfg,
        workspace_root: &root,
    };
    let mut memory = ExecutionMemory::new();
    info!(agent = %suite.agent.name, "starting fix");
    let outcome = run_fix(&collaborators, &request, &mut memory)?;
    print_report(&outcome.report);
    Ok(())
}

/// Print the latest captured fix report under the given root.
pub fn show_report(root: &Path) -> Result<()> {
    let Some(path) = capture::latest_report_path(root)? else {
        bail!("no captured reports under {}", root.join(".mend").display());
    };
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let report: FixReport = serde_json::from_str(&contents).context("parse report")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &FixReport) {
    println!(
        "fix: execution={} file={} status={:?}",
        report.execution_id, report.file_path, report.status
    );
    println!(
        "fix: baseline_failed={} current_failed={} improvement={} trend={:?}",
        report.improvement.baseline_failed,
        report.improvement.current_failed,
        report.improvement.improvement,
        report.improvement_trend
    );
    if let Some(best) = &report.best_attempt {
        println!(
            "fix: best_attempt={} success_rate={:.1}% approach={}",
            best.attempt_number,
            best.success_rate * 100.0,
            best.approach_description
        );
    }
    for entry in &report.progression {
        println!(
            "fix: run {} failed={} [{}]",
            entry.run_type,
            entry.failed_count,
            entry.failed_tests.join(", ")
        );
    }
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }
}

fn command_runner(cfg: &MendConfig, root: &Path) -> CommandTestRunner {
    CommandTestRunner::new(
        root,
        RunLimits {
            timeout: Duration::from_secs(cfg.test_timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        },
    )
}

fn load_suite(suite_path: &Path) -> Result<(SuiteFile, MendConfig, PathBuf)> {
    if !suite_path.exists() {
        bail!("suite not found at {}", suite_path.display());
    }
    let suite = SuiteFile::load(suite_path).context("load suite")?;
    let root = suite_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let cfg = config::load_config(&root.join(".mend").join("config.toml"))?;
    let cfg = config::apply_suite_settings(cfg, &suite.settings)?;
    debug!(agent = %suite.agent.name, root = %root.display(), "suite loaded");
    Ok((suite, cfg, root))
}
