//! Tool configuration stored under `.mend/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::suite::SuiteSettings;

/// Mend configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MendConfig {
    /// Maximum auto-fix attempts per file.
    pub max_retries: u32,

    /// Run the auto-fix loop when the baseline has failures.
    pub auto_fix: bool,

    /// Per-test wall-clock budget in seconds.
    pub test_timeout_secs: u64,

    /// Truncate captured test/LLM output beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Byte budget for assembled fix prompts.
    pub prompt_budget_bytes: usize,

    pub llm: LlmConfig,

    pub markers: MarkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmConfig {
    /// Command invoked for completions (prompt on stdin, text on stdout).
    pub command: Vec<String>,
    /// Maximum time to wait for one completion.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MarkerConfig {
    /// Comment prefix for region markers (`#`, `//`, `--`).
    pub comment_prefix: String,
}

impl Default for MendConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            auto_fix: false,
            test_timeout_secs: 120,
            output_limit_bytes: 50_000,
            prompt_budget_bytes: 24_000,
            llm: LlmConfig::default(),
            markers: MarkerConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 5 * 60,
        }
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            comment_prefix: "#".to_string(),
        }
    }
}

impl MendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.test_timeout_secs == 0 {
            return Err(anyhow!("test_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.llm.timeout_secs == 0 {
            return Err(anyhow!("llm.timeout_secs must be > 0"));
        }
        if self.auto_fix
            && (self.llm.command.is_empty() || self.llm.command[0].trim().is_empty())
        {
            return Err(anyhow!("llm.command must be set when auto_fix is enabled"));
        }
        if self.markers.comment_prefix.trim().is_empty() {
            return Err(anyhow!("markers.comment_prefix must be non-empty"));
        }
        Ok(())
    }
}

/// Apply a suite's settings overrides on top of the loaded config.
pub fn apply_suite_settings(mut cfg: MendConfig, settings: &SuiteSettings) -> Result<MendConfig> {
    if let Some(timeout_secs) = settings.timeout_secs {
        cfg.test_timeout_secs = timeout_secs;
    }
    if let Some(max_retries) = settings.max_retries {
        cfg.max_retries = max_retries;
    }
    if let Some(auto_fix) = settings.auto_fix {
        cfg.auto_fix = auto_fix;
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `MendConfig::default()`.
pub fn load_config(path: &Path) -> Result<MendConfig> {
    if !path.exists() {
        let cfg = MendConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: MendConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &MendConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, MendConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = MendConfig::default();
        cfg.max_retries = 5;
        cfg.markers.comment_prefix = "//".to_string();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn auto_fix_requires_llm_command() {
        let cfg = MendConfig {
            auto_fix: true,
            ..MendConfig::default()
        };
        let err = cfg.validate().expect_err("missing llm command");
        assert!(err.to_string().contains("llm.command"));
    }

    #[test]
    fn zero_retries_is_rejected() {
        let cfg = MendConfig {
            max_retries: 0,
            ..MendConfig::default()
        };
        let _err = cfg.validate().expect_err("zero retries");
    }

    #[test]
    fn suite_settings_override_config() {
        let settings = SuiteSettings {
            timeout_secs: Some(7),
            max_retries: Some(9),
            auto_fix: None,
        };
        let cfg = apply_suite_settings(MendConfig::default(), &settings).expect("apply");
        assert_eq!(cfg.test_timeout_secs, 7);
        assert_eq!(cfg.max_retries, 9);
        assert!(!cfg.auto_fix);
    }

    #[test]
    fn suite_settings_cannot_produce_invalid_config() {
        let settings = SuiteSettings {
            timeout_secs: Some(0),
            max_retries: None,
            auto_fix: None,
        };
        let _err =
            apply_suite_settings(MendConfig::default(), &settings).expect_err("invalid override");
    }
}
