//! Attempt explanation strategies.
//!
//! After each attempt the loop derives three free-text fields: lessons
//! learned, why the approach failed, and what worked partially. The
//! [`Explainer`] trait makes the strategy injectable: the LLM-backed
//! implementation degrades to the deterministic heuristic whenever its
//! collaborator is unavailable, so explanation never fails an attempt.

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::warn;

use harness::legacy::LegacyResults;

use crate::llm::LlmClient;

/// The three derived explanation fields for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Explanation {
    pub lessons_learned: Option<String>,
    pub why_approach_failed: Option<String>,
    pub what_worked_partially: Option<String>,
}

/// Strategy for explaining a before/after test result pair.
pub trait Explainer {
    fn explain(&self, before: &LegacyResults, after: &LegacyResults) -> Explanation;
}

/// Deterministic explanation from numeric deltas alone. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicExplainer;

impl Explainer for HeuristicExplainer {
    fn explain(&self, before: &LegacyResults, after: &LegacyResults) -> Explanation {
        let before_failed: BTreeSet<String> = before.failed_case_names().into_iter().collect();
        let after_failed: BTreeSet<String> = after.failed_case_names().into_iter().collect();
        let after_passed: BTreeSet<String> = after.passed_case_names().into_iter().collect();

        let newly_passing: Vec<&String> = before_failed.intersection(&after_passed).collect();
        let newly_failing: Vec<&String> = after_failed
            .iter()
            .filter(|name| !before_failed.contains(*name))
            .collect();
        let (after_total, after_passed_count, after_failed_count, after_error_count) =
            after.case_counts();
        let remaining = after_failed_count + after_error_count;

        if remaining == 0 && after_total > 0 {
            return Explanation {
                lessons_learned: Some(format!(
                    "All {after_total} tests pass after this change."
                )),
                why_approach_failed: None,
                what_worked_partially: None,
            };
        }

        let lessons_learned = Some(if newly_passing.is_empty() {
            format!(
                "The change fixed no failing tests; {remaining} of {after_total} still fail."
            )
        } else {
            format!(
                "Fixed {} test(s) ({}); {} of {} still fail.",
                newly_passing.len(),
                name_list(&newly_passing),
                remaining,
                after_total
            )
        });

        let mut why = format!(
            "{remaining} test(s) still failing after the change ({} passing of {})",
            after_passed_count, after_total
        );
        if !newly_failing.is_empty() {
            why.push_str(&format!(
                "; the change broke previously-passing test(s): {}",
                name_list(&newly_failing)
            ));
        }

        let what_worked_partially = (!newly_passing.is_empty()).then(|| {
            format!("Newly passing: {}", name_list(&newly_passing))
        });

        Explanation {
            lessons_learned,
            why_approach_failed: Some(why),
            what_worked_partially,
        }
    }
}

/// LLM-backed explanation with the heuristic as its fallback.
pub struct LlmExplainer<'a> {
    client: &'a dyn LlmClient,
    fallback: HeuristicExplainer,
}

#[derive(Debug, Deserialize)]
struct ExplanationReply {
    #[serde(default)]
    lessons_learned: Option<String>,
    #[serde(default)]
    why_approach_failed: Option<String>,
    #[serde(default)]
    what_worked_partially: Option<String>,
}

impl<'a> LlmExplainer<'a> {
    pub fn new(client: &'a dyn LlmClient) -> Self {
        Self {
            client,
            fallback: HeuristicExplainer,
        }
    }

    fn build_prompt(before: &LegacyResults, after: &LegacyResults) -> String {
        let (before_total, before_passed, _, _) = before.case_counts();
        let (after_total, after_passed, _, _) = after.case_counts();
        format!(
            "You are reviewing one automated code-fix attempt.\n\
             Before the change: {before_passed}/{before_total} tests passed.\n\
             After the change: {after_passed}/{after_total} tests passed.\n\
             Still failing: {}\n\n\
             Respond with JSON only:\n\
             {{\"lessons_learned\": \"...\", \"why_approach_failed\": \"...\", \
             \"what_worked_partially\": \"...\"}}\n\
             Use null for fields that do not apply.",
            after.failed_case_names().join(", ")
        )
    }

    fn parse_reply(response: &str) -> Option<ExplanationReply> {
        let start = response.find('{')?;
        let end = response.rfind('}')?;
        serde_json::from_str(&response[start..=end]).ok()
    }
}

impl Explainer for LlmExplainer<'_> {
    fn explain(&self, before: &LegacyResults, after: &LegacyResults) -> Explanation {
        let prompt = Self::build_prompt(before, after);
        match self.client.complete(&prompt) {
            Ok(response) => match Self::parse_reply(&response) {
                Some(reply) => Explanation {
                    lessons_learned: non_empty(reply.lessons_learned),
                    why_approach_failed: non_empty(reply.why_approach_failed),
                    what_worked_partially: non_empty(reply.what_worked_partially),
                },
                None => {
                    warn!("unparseable explanation reply, using heuristic fallback");
                    self.fallback.explain(before, after)
                }
            },
            Err(err) => {
                warn!(error = %err, "explanation request failed, using heuristic fallback");
                self.fallback.explain(before, after)
            }
        }
    }
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|text| !text.trim().is_empty())
}

fn name_list(names: &[&String]) -> String {
    const SHOWN: usize = 3;
    let mut list = names
        .iter()
        .take(SHOWN)
        .map(|name| name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    if names.len() > SHOWN {
        list.push_str(&format!(" and {} more", names.len() - SHOWN));
    }
    list
}
