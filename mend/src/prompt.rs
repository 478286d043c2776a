//! Fix prompt assembly within a byte budget.
//!
//! The template is split into sections tagged with HTML comment markers
//! (`<!-- section:KEY required|droppable -->`). When the rendered prompt
//! exceeds the budget, droppable sections are removed in a fixed priority
//! order, and as a last resort the final section is truncated. Required
//! sections always survive.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::insights::{FailedCase, IncrementalLearning, PreviousAttemptsInsights};
use crate::targeting::FailureAnalysis;

const FIX_TEMPLATE: &str = include_str!("prompts/fix.md");

/// Least critical first: related files go before the learning context.
const DROP_ORDER: [&str; 4] = ["related", "history", "targeting", "learning"];

/// All inputs needed to build a fix prompt.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub file_path: String,
    pub file_content: String,
    pub failing_cases: Vec<FailedCase>,
    /// Learning context; pass None when there is nothing to say yet.
    pub learning: Option<PreviousAttemptsInsights>,
    pub incremental: Option<IncrementalLearning>,
    pub targeting: Option<FailureAnalysis>,
    pub related_files: BTreeMap<String, String>,
}

/// A rendered prompt ready to send to the LLM client.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn render(&self) -> String {
        self.content.clone()
    }
}

/// Builds fix prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_fix(&self, input: &PromptInputs) -> Result<PromptPack> {
        let mut env = Environment::new();
        env.add_template("fix", FIX_TEMPLATE)
            .expect("fix template should be valid");
        let template = env.get_template("fix").expect("fix template registered");

        let history = input
            .learning
            .as_ref()
            .map(|learning| learning.previous_attempts_history.clone())
            .filter(|records| !records.is_empty());

        let rendered = template
            .render(context! {
                file_path => input.file_path,
                file_content => input.file_content,
                failing_cases => input.failing_cases,
                learning => input.learning.as_ref().filter(|learning| has_learning_content(learning)),
                incremental => input.incremental,
                targeting => input.targeting,
                history => history,
                related_files => (!input.related_files.is_empty()).then_some(&input.related_files),
            })
            .context("render fix template")?;

        let sections = assemble(&rendered, self.budget_bytes);
        Ok(PromptPack { content: sections })
    }
}

fn has_learning_content(learning: &PreviousAttemptsInsights) -> bool {
    !learning.failed_approaches_to_avoid.is_empty()
        || !learning.successful_patterns_to_build_on.is_empty()
        || !learning.what_not_to_try_again.is_empty()
        || !learning.repeated_code_attempts.is_empty()
}

struct Section {
    key: String,
    required: bool,
    content: String,
}

static SECTION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker pattern should be valid")
});

/// Split rendered output into sections, enforce the budget, and join.
fn assemble(rendered: &str, budget: usize) -> String {
    let mut sections = parse_sections(rendered);
    enforce_budget(&mut sections, budget);
    sections
        .iter()
        .map(|section| section.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_MARKER.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (index, caps) in markers.iter().enumerate() {
        let start = caps.get(0).expect("capture 0").end();
        let end = markers
            .get(index + 1)
            .map(|next| next.get(0).expect("capture 0").start())
            .unwrap_or(rendered.len());
        let content = rendered[start..end].trim().to_string();
        let required = &caps[2] == "required";
        if content.is_empty() && !required {
            continue;
        }
        sections.push(Section {
            key: caps[1].to_string(),
            required,
            content,
        });
    }
    sections
}

fn enforce_budget(sections: &mut Vec<Section>, budget: usize) {
    let total = |sections: &[Section]| -> usize {
        sections.iter().map(|section| section.content.len()).sum()
    };

    for key in DROP_ORDER {
        if total(sections) <= budget {
            return;
        }
        if let Some(index) = sections
            .iter()
            .position(|section| section.key == key && !section.required)
        {
            debug!(
                section = key,
                bytes_dropped = sections[index].content.len(),
                "dropped prompt section for budget"
            );
            sections.remove(index);
        }
    }

    // Still over budget with only required sections left: truncate the last.
    if total(sections) > budget && !sections.is_empty() {
        let others: usize = sections[..sections.len() - 1]
            .iter()
            .map(|section| section.content.len())
            .sum();
        let allowed = budget.saturating_sub(others);
        let last = sections.last_mut().expect("sections is non-empty");
        if last.content.len() > allowed {
            let marker = "\n[truncated]";
            if allowed > marker.len() {
                last.content.truncate(allowed - marker.len());
                last.content.push_str(marker);
            } else {
                last.content.truncate(allowed);
            }
            debug!(section = %last.key, "truncated prompt section for budget");
        }
    }
}
