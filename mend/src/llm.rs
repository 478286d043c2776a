//! LLM client seam.
//!
//! The [`LlmClient`] trait decouples the fix loop from the model backend.
//! The network transport stays external: [`CommandLlm`] shells out to a
//! configured command that reads the prompt on stdin and writes the
//! completion to stdout. Tests use scripted clients.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Abstraction over completion backends: prompt in, text out.
pub trait LlmClient {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Client that spawns a configured command for each completion.
#[derive(Debug, Clone)]
pub struct CommandLlm {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandLlm {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            bail!("llm command must be a non-empty array");
        }
        Ok(Self {
            command,
            timeout,
            output_limit_bytes,
        })
    }
}

impl LlmClient for CommandLlm {
    #[instrument(skip_all, fields(prompt_bytes = prompt.len()))]
    fn complete(&self, prompt: &str) -> Result<String> {
        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn llm command {:?}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .context("write prompt to llm command")?;
        }

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                child.kill().ok();
                child.wait().context("wait after kill")?;
                warn!(timeout_secs = self.timeout.as_secs(), "llm command timed out");
                return Err(anyhow!(
                    "llm command timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
        };

        let mut stdout = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut stdout).context("read llm stdout")?;
        }
        if stdout.len() > self.output_limit_bytes {
            stdout.truncate(self.output_limit_bytes);
        }

        if !status.success() {
            let mut stderr = Vec::new();
            if let Some(mut err) = child.stderr.take() {
                err.read_to_end(&mut stderr).ok();
            }
            bail!(
                "llm command failed with status {:?}: {}",
                status.code(),
                String::from_utf8_lossy(&stderr).trim()
            );
        }

        let response = String::from_utf8_lossy(&stdout).to_string();
        if response.trim().is_empty() {
            bail!("llm command produced an empty response");
        }
        debug!(response_bytes = response.len(), "llm completion received");
        Ok(response)
    }
}

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*\r?\n(.*?)```").expect("fence pattern should be valid")
});

/// Extract the code a response proposes.
///
/// The first fenced block wins; a fence-free response is taken whole. Returns
/// None for empty or fence-only responses; callers record those as failed
/// attempts rather than aborting the loop.
pub fn extract_code_block(response: &str) -> Option<String> {
    if let Some(caps) = FENCED_BLOCK.captures(response) {
        let code = caps[1].trim_end().to_string();
        return (!code.trim().is_empty()).then_some(code);
    }
    if response.contains("```") {
        // A dangling fence with no closing marker is unusable.
        return None;
    }
    let trimmed = response.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// First prose line of a response, for use as an approach description.
pub fn extract_approach(response: &str, fallback: &str) -> String {
    let mut in_fence = false;
    for line in response.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && !trimmed.is_empty() {
            let mut approach = trimmed.to_string();
            if approach.len() > 200 {
                approach.truncate(200);
            }
            return approach;
        }
    }
    fallback.to_string()
}
