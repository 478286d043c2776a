//! Test execution against a suite's declared commands.
//!
//! The [`TestRunner`] trait decouples the fix loop from actual test execution.
//! Tests use scripted runners that return predetermined results without
//! spawning processes.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::result::{TestCaseResult, TestExecutionResult, TestStatus};
use crate::suite::{Assertion, SuiteFile, TestSpec};

/// Limits for test command execution.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    /// Maximum time before killing a test command.
    pub timeout: Duration,
    /// Maximum bytes to capture from stdout/stderr.
    pub output_limit_bytes: usize,
}

impl RunLimits {
    /// Default limits: 120s timeout, 50KB output.
    pub fn default_limits() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            output_limit_bytes: 50_000,
        }
    }
}

/// Abstraction over test execution backends.
pub trait TestRunner {
    /// Run every test in the suite and collect a unified result.
    fn run(&self, suite: &SuiteFile, config_path: &Path) -> Result<TestExecutionResult>;
}

/// Runner that executes each test's command as a subprocess.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    /// Working directory for test commands.
    pub workdir: PathBuf,
    pub limits: RunLimits,
}

impl CommandTestRunner {
    pub fn new(workdir: impl Into<PathBuf>, limits: RunLimits) -> Self {
        Self {
            workdir: workdir.into(),
            limits,
        }
    }
}

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(agent = %suite.agent.name, tests = suite.tests.len()))]
    fn run(&self, suite: &SuiteFile, config_path: &Path) -> Result<TestExecutionResult> {
        let mut result = TestExecutionResult::new(
            suite.agent.name.clone(),
            suite.agent.file_path.clone(),
            config_path.to_path_buf(),
        );
        let timeout = suite
            .settings
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.limits.timeout);

        let mut cases = Vec::with_capacity(suite.tests.len());
        for test in &suite.tests {
            let case = self.run_test(suite, test, timeout);
            debug!(test = %test.name, status = case.status.as_str(), "test finished");
            cases.push(case);
        }
        result.add_test_cases(cases);
        Ok(result)
    }
}

impl CommandTestRunner {
    /// Execute one test. Spawn failures and timeouts become Error cases
    /// rather than runner errors, so one broken test never aborts the run.
    fn run_test(&self, suite: &SuiteFile, test: &TestSpec, timeout: Duration) -> TestCaseResult {
        let started = Instant::now();
        let mut case = TestCaseResult::new(test.name.clone(), TestStatus::Error);
        case.region = test.region.clone();
        case.input = test.input.clone().map(Value::String);
        case.expected_output = test.expected_output.clone().map(Value::String);
        case.timestamp = Some(Utc::now());

        let execution = self.execute_command(suite, test, timeout);
        case.execution_time = Some(started.elapsed().as_secs_f64());

        match execution {
            Err(err) => {
                warn!(test = %test.name, error = %err, "test command could not run");
                case.error_message = Some(format!("{err:#}"));
            }
            Ok(execution) => {
                case.actual_output = Some(Value::String(execution.stdout.clone()));
                self.judge(test, &execution, &mut case);
            }
        }
        case
    }

    fn execute_command(
        &self,
        suite: &SuiteFile,
        test: &TestSpec,
        timeout: Duration,
    ) -> Result<Execution> {
        let mut command = Command::new(&test.cmd[0]);
        command
            .args(&test.cmd[1..])
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &suite.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("spawn test command {:?}", test.cmd))?;

        if let Some(input) = &test.input
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(input.as_bytes())
                .context("write test input")?;
        }
        drop(child.stdin.take());

        let mut timed_out = false;
        let status = match child.wait_timeout(timeout)? {
            Some(status) => status,
            None => {
                timed_out = true;
                child.kill().ok();
                child.wait().context("wait after kill")?
            }
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut stdout).context("read stdout")?;
        }
        if let Some(mut err) = child.stderr.take() {
            err.read_to_end(&mut stderr).context("read stderr")?;
        }
        truncate_output(&mut stdout, self.limits.output_limit_bytes);
        truncate_output(&mut stderr, self.limits.output_limit_bytes);

        Ok(Execution {
            exit_code: status.code(),
            success: status.success(),
            timed_out,
            timeout,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
        })
    }

    fn judge(&self, test: &TestSpec, execution: &Execution, case: &mut TestCaseResult) {
        if execution.timed_out {
            case.status = TestStatus::Error;
            case.error_message = Some(format!(
                "timed out after {}s",
                execution.timeout.as_secs()
            ));
            return;
        }
        if !execution.success {
            case.status = TestStatus::Failed;
            case.error_message = Some(format!("exit code {:?}", execution.exit_code));
            if !execution.stderr.trim().is_empty() {
                case.error_details = Some(execution.stderr.trim().to_string());
            }
            return;
        }

        let failures = failed_assertions(test, &execution.stdout);
        if failures.is_empty() {
            case.status = TestStatus::Passed;
        } else {
            case.status = TestStatus::Failed;
            case.error_message = Some(failures[0].clone());
            if failures.len() > 1 {
                case.error_details = Some(failures.join("\n"));
            }
        }
    }
}

struct Execution {
    exit_code: Option<i32>,
    success: bool,
    timed_out: bool,
    timeout: Duration,
    stdout: String,
    stderr: String,
}

/// Evaluate the test's assertions (including the `expected_output` shorthand)
/// against stdout, returning one message per failed assertion.
fn failed_assertions(test: &TestSpec, stdout: &str) -> Vec<String> {
    let mut failures = Vec::new();
    if let Some(expected) = &test.expected_output
        && stdout.trim() != expected.trim()
    {
        failures.push(format!(
            "expected output {:?}, got {:?}",
            expected.trim(),
            stdout.trim()
        ));
    }
    for assertion in &test.assertions {
        match assertion {
            Assertion::Equals { expected } => {
                if stdout.trim() != expected.trim() {
                    failures.push(format!(
                        "equals assertion failed: expected {:?}, got {:?}",
                        expected.trim(),
                        stdout.trim()
                    ));
                }
            }
            Assertion::Contains { expected } => {
                if !stdout.contains(expected) {
                    failures.push(format!("contains assertion failed: {expected:?} not found"));
                }
            }
            Assertion::Matches { pattern } => match regex::Regex::new(pattern) {
                Ok(re) if re.is_match(stdout) => {}
                Ok(_) => failures.push(format!("matches assertion failed: {pattern:?}")),
                Err(err) => failures.push(format!("invalid pattern {pattern:?}: {err}")),
            },
        }
    }
    failures
}

fn truncate_output(buf: &mut Vec<u8>, limit: usize) {
    if buf.len() > limit {
        buf.truncate(limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::SuiteFile;

    fn suite_with_test(test: &str) -> SuiteFile {
        let input = format!(
            r#"
[agent]
name = "agent"
file_path = "agent.py"

{test}
"#
        );
        SuiteFile::parse_str(&input).expect("suite parses")
    }

    fn runner() -> CommandTestRunner {
        CommandTestRunner::new(
            std::env::temp_dir(),
            RunLimits {
                timeout: Duration::from_secs(5),
                output_limit_bytes: 4096,
            },
        )
    }

    #[test]
    fn passing_command_yields_passed_case() {
        let suite = suite_with_test(
            r#"
[[tests]]
name = "echoes"
cmd = ["sh", "-c", "echo hello"]
expected_output = "hello"
"#,
        );
        let result = runner().run(&suite, Path::new("suite.toml")).expect("run");
        assert!(result.is_successful());
        assert_eq!(result.test_cases[0].status, TestStatus::Passed);
    }

    #[test]
    fn wrong_output_yields_failed_case() {
        let suite = suite_with_test(
            r#"
[[tests]]
name = "echoes"
cmd = ["sh", "-c", "echo goodbye"]
expected_output = "hello"
"#,
        );
        let result = runner().run(&suite, Path::new("suite.toml")).expect("run");
        let case = &result.test_cases[0];
        assert_eq!(case.status, TestStatus::Failed);
        assert!(case.error_message.as_deref().expect("message").contains("expected output"));
    }

    #[test]
    fn nonzero_exit_yields_failed_case() {
        let suite = suite_with_test(
            r#"
[[tests]]
name = "fails"
cmd = ["sh", "-c", "echo oops >&2; exit 3"]
expected_output = "never"
"#,
        );
        let result = runner().run(&suite, Path::new("suite.toml")).expect("run");
        let case = &result.test_cases[0];
        assert_eq!(case.status, TestStatus::Failed);
        assert!(case.error_message.as_deref().expect("message").contains("exit code"));
        assert_eq!(case.error_details.as_deref(), Some("oops"));
    }

    #[test]
    fn missing_binary_yields_error_case_not_runner_error() {
        let suite = suite_with_test(
            r#"
[[tests]]
name = "missing"
cmd = ["definitely-not-a-real-binary-4f1a"]
expected_output = "x"
"#,
        );
        let result = runner().run(&suite, Path::new("suite.toml")).expect("run");
        assert_eq!(result.test_cases[0].status, TestStatus::Error);
    }

    #[test]
    fn timeout_yields_error_case() {
        let suite = suite_with_test(
            r#"
[settings]
timeout_secs = 1

[[tests]]
name = "sleeps"
cmd = ["sh", "-c", "sleep 5"]
expected_output = "never"
"#,
        );
        let result = runner().run(&suite, Path::new("suite.toml")).expect("run");
        let case = &result.test_cases[0];
        assert_eq!(case.status, TestStatus::Error);
        assert!(case.error_message.as_deref().expect("message").contains("timed out"));
    }

    #[test]
    fn stdin_input_reaches_command() {
        let suite = suite_with_test(
            r#"
[[tests]]
name = "reads_stdin"
cmd = ["sh", "-c", "read line; echo got-$line"]
input = "data"
expected_output = "got-data"
"#,
        );
        let result = runner().run(&suite, Path::new("suite.toml")).expect("run");
        assert_eq!(result.test_cases[0].status, TestStatus::Passed);
    }

    #[test]
    fn assertion_kinds_are_evaluated() {
        let suite = suite_with_test(
            r#"
[[tests]]
name = "asserted"
cmd = ["sh", "-c", "echo 'value: 42'"]

[[tests.assertions]]
type = "contains"
expected = "value"

[[tests.assertions]]
type = "matches"
pattern = "value: \\d+"
"#,
        );
        let result = runner().run(&suite, Path::new("suite.toml")).expect("run");
        assert_eq!(result.test_cases[0].status, TestStatus::Passed);
    }
}
