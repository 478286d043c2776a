//! Attempt artifact capture under `.mend/attempts/`.
//!
//! Each attempt writes its prompt, raw response, and attempt record for later
//! inspection. Capture failures are collected as warnings, never loop
//! failures; in-memory state remains the system of record.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::memory::FixAttempt;
use crate::report::FixReport;

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub prompt_path: PathBuf,
    pub response_path: PathBuf,
    pub result_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(root: &Path, execution_id: &str, attempt_number: u32) -> Self {
        let dir = root
            .join(".mend")
            .join("attempts")
            .join(execution_id)
            .join(attempt_number.to_string());
        Self {
            dir: dir.clone(),
            prompt_path: dir.join("prompt.md"),
            response_path: dir.join("response.md"),
            result_path: dir.join("result.json"),
        }
    }
}

pub struct AttemptWriteRequest<'a> {
    pub root: &'a Path,
    pub execution_id: &'a str,
    pub prompt: &'a str,
    pub response: &'a str,
    pub attempt: &'a FixAttempt,
}

/// Write one attempt's artifacts in deterministic order.
pub fn write_attempt(request: &AttemptWriteRequest<'_>) -> Result<AttemptPaths> {
    let paths = AttemptPaths::new(
        request.root,
        request.execution_id,
        request.attempt.attempt_number,
    );
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;

    write_text(&paths.prompt_path, request.prompt)?;
    write_text(&paths.response_path, request.response)?;
    write_json(&paths.result_path, request.attempt)?;
    Ok(paths)
}

/// Write an attempt's artifacts, demoting failure to a warning.
pub fn write_attempt_best_effort(request: &AttemptWriteRequest<'_>, warnings: &mut Vec<String>) {
    if let Err(err) = write_attempt(request) {
        warn!(error = %err, "attempt artifact capture failed");
        warnings.push(format!(
            "attempt {} capture: {err:#}",
            request.attempt.attempt_number
        ));
    }
}

/// Path for an execution's final report.
pub fn report_path(root: &Path, execution_id: &str) -> PathBuf {
    root.join(".mend")
        .join("reports")
        .join(format!("{execution_id}.json"))
}

/// Persist the final report for the `report` CLI command.
pub fn write_report(root: &Path, report: &FixReport) -> Result<PathBuf> {
    let path = report_path(root, &report.execution_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create report dir {}", parent.display()))?;
    }
    write_json(&path, report)?;
    Ok(path)
}

/// Most recently named report under `.mend/reports/`, if any.
pub fn latest_report_path(root: &Path) -> Result<Option<PathBuf>> {
    let dir = root.join(".mend").join("reports");
    if !dir.exists() {
        return Ok(None);
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.context("read report entry")?;
        if entry.path().extension().and_then(|ext| ext.to_str()) == Some("json") {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths.pop())
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize artifact")?;
    buf.push('\n');
    write_text(path, &buf)
}
