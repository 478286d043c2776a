//! Suite file parsing and validation.
//!
//! Suites are TOML files defining the agent under test and its test cases.
//! Each test runs a command and checks assertions against its stdout.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

/// A parsed suite file: agent metadata, settings overrides, and tests.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SuiteFile {
    pub agent: AgentMeta,
    #[serde(default)]
    pub settings: SuiteSettings,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

/// The agent under test.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AgentMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub name: String,
    /// Source file containing the marked regions to test and fix.
    pub file_path: PathBuf,
    #[serde(default)]
    pub description: Option<String>,
}

/// Per-suite overrides for the tool configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SuiteSettings {
    /// Per-test timeout override in seconds.
    pub timeout_secs: Option<u64>,
    /// Maximum auto-fix attempts for this suite.
    pub max_retries: Option<u32>,
    /// Enable the auto-fix loop when tests fail.
    pub auto_fix: Option<bool>,
}

/// One declarative test: a command plus assertions on its output.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TestSpec {
    pub name: String,
    /// Region of the agent source this test targets.
    #[serde(default)]
    pub region: Option<String>,
    /// Command to execute (argv form).
    pub cmd: Vec<String>,
    /// Text fed to the command on stdin.
    #[serde(default)]
    pub input: Option<String>,
    /// Shorthand for a single trimmed-equals assertion on stdout.
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

/// Assertion on a test command's stdout.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Assertion {
    /// Output equals the expected text after trimming.
    Equals { expected: String },
    /// Output contains the expected text.
    Contains { expected: String },
    /// Output matches the regular expression.
    Matches { pattern: String },
}

impl SuiteFile {
    /// Load and validate a suite file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read suite {}", path.display()))?;
        let suite: SuiteFile =
            toml::from_str(&contents).with_context(|| format!("parse suite {}", path.display()))?;
        suite
            .validate()
            .with_context(|| format!("validate suite {}", path.display()))?;
        Ok(suite)
    }

    pub fn parse_str(contents: &str) -> Result<Self> {
        let suite: SuiteFile = toml::from_str(contents).context("parse suite")?;
        suite.validate()?;
        Ok(suite)
    }

    fn validate(&self) -> Result<()> {
        validate_agent_name(&self.agent.name)?;
        if self.agent.file_path.as_os_str().is_empty() {
            bail!("agent.file_path must be non-empty");
        }
        if let Some(timeout_secs) = self.settings.timeout_secs
            && timeout_secs == 0
        {
            bail!("settings.timeout_secs must be > 0");
        }
        if let Some(max_retries) = self.settings.max_retries
            && max_retries == 0
        {
            bail!("settings.max_retries must be > 0");
        }
        if self.tests.is_empty() {
            bail!("tests must be a non-empty array");
        }
        let mut names: Vec<&str> = self.tests.iter().map(|test| test.name.as_str()).collect();
        names.sort_unstable();
        for pair in names.windows(2) {
            if pair[0] == pair[1] {
                bail!("duplicate test name {}", pair[0]);
            }
        }
        for (index, test) in self.tests.iter().enumerate() {
            test.validate()
                .with_context(|| format!("tests[{}] invalid", index))?;
        }
        for (key, value) in &self.env {
            if key.trim().is_empty() {
                bail!("env key must be non-empty");
            }
            if value.is_empty() {
                bail!("env {} must be non-empty", key);
            }
        }
        Ok(())
    }
}

impl TestSpec {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("test name must be non-empty");
        }
        if self.cmd.is_empty() || self.cmd[0].trim().is_empty() {
            bail!("cmd must be a non-empty array");
        }
        if self.expected_output.is_none() && self.assertions.is_empty() {
            bail!("test must declare expected_output or at least one assertion");
        }
        for assertion in &self.assertions {
            assertion.validate()?;
        }
        Ok(())
    }
}

impl Assertion {
    fn validate(&self) -> Result<()> {
        match self {
            Assertion::Equals { expected } | Assertion::Contains { expected } => {
                if expected.is_empty() {
                    bail!("assertion expected value must be non-empty");
                }
            }
            Assertion::Matches { pattern } => {
                regex::Regex::new(pattern)
                    .with_context(|| format!("invalid assertion pattern {pattern}"))?;
            }
        }
        Ok(())
    }
}

/// Discover and load all suite files from a directory.
///
/// Returns suites sorted by agent name. Errors if duplicate names are found.
pub fn discover_suites(dir: &Path) -> Result<Vec<SuiteFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut suites = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read suites dir {}", dir.display()))? {
        let entry = entry.context("read suite entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        suites.push(SuiteFile::load(&path)?);
    }
    suites.sort_by(|left, right| left.agent.name.cmp(&right.agent.name));
    for pair in suites.windows(2) {
        if pair[0].agent.name == pair[1].agent.name {
            return Err(anyhow!("duplicate agent.name {}", pair[0].agent.name));
        }
    }
    Ok(suites)
}

fn validate_agent_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("agent.name must be non-empty");
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("agent.name must use [a-z0-9_-] only");
    }
    Ok(())
}
