//! Marker-based extraction of named code regions.
//!
//! Regions are delimited in agent source files with comment markers:
//!
//! ```text
//! # mend:start:validate_input
//! def validate_input(data):
//!     ...
//! # mend:end:validate_input
//! ```
//!
//! The comment prefix is configurable per language (`#`, `//`, `--`).

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A named segment of source, 1-based inclusive line range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSection {
    pub line_start: u32,
    pub line_end: u32,
    pub content: String,
}

/// Produces the region map the fix loop stores as immutable ground truth.
pub trait RegionExtractor {
    fn extract(&self, source: &str) -> Result<BTreeMap<String, CodeSection>>;
}

/// Extractor scanning `<prefix> mend:start:<name>` / `<prefix> mend:end:<name>`
/// marker pairs.
#[derive(Debug, Clone)]
pub struct MarkerExtractor {
    marker: Regex,
}

impl MarkerExtractor {
    pub fn new(comment_prefix: &str) -> Result<Self> {
        let pattern = format!(
            r"^\s*{}\s*mend:(start|end):([A-Za-z0-9_.-]+)\s*$",
            regex::escape(comment_prefix)
        );
        let marker = Regex::new(&pattern)
            .with_context(|| format!("build marker pattern for prefix {comment_prefix}"))?;
        Ok(Self { marker })
    }
}

impl Default for MarkerExtractor {
    fn default() -> Self {
        Self::new("#").expect("default marker pattern should be valid")
    }
}

impl RegionExtractor for MarkerExtractor {
    fn extract(&self, source: &str) -> Result<BTreeMap<String, CodeSection>> {
        let mut sections = BTreeMap::new();
        let mut open: Option<(String, u32, Vec<&str>)> = None;

        for (index, line) in source.lines().enumerate() {
            let line_number = index as u32 + 1;
            let Some(caps) = self.marker.captures(line) else {
                if let Some((_, _, lines)) = &mut open {
                    lines.push(line);
                }
                continue;
            };
            let is_start = &caps[1] == "start";
            let name = caps[2].to_string();

            if is_start {
                if let Some((current, start, _)) = &open {
                    bail!(
                        "region {} opened at line {} before {} was closed",
                        name,
                        start,
                        current
                    );
                }
                if sections.contains_key(&name) {
                    bail!("duplicate region {name}");
                }
                open = Some((name, line_number, Vec::new()));
            } else {
                match open.take() {
                    Some((current, start, lines)) => {
                        if current != name {
                            bail!("region end {} does not match open region {}", name, current);
                        }
                        sections.insert(
                            name,
                            CodeSection {
                                line_start: start + 1,
                                line_end: line_number - 1,
                                content: lines.join("\n"),
                            },
                        );
                    }
                    None => bail!("region end {name} without matching start"),
                }
            }
        }

        if let Some((name, start, _)) = open {
            bail!("region {} opened at line {} is never closed", name, start);
        }
        Ok(sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_named_regions_with_line_numbers() {
        let source = "\
import os

# mend:start:validate_input
def validate_input(data):
    return bool(data)
# mend:end:validate_input

# mend:start:process_data
def process_data(data):
    return data.upper()
# mend:end:process_data
";
        let sections = MarkerExtractor::default()
            .extract(source)
            .expect("extract regions");

        assert_eq!(sections.len(), 2);
        let validate = &sections["validate_input"];
        assert_eq!(validate.line_start, 4);
        assert_eq!(validate.line_end, 5);
        assert!(validate.content.contains("def validate_input"));
        assert!(!validate.content.contains("mend:"));
    }

    #[test]
    fn empty_source_yields_empty_map() {
        let sections = MarkerExtractor::default().extract("").expect("extract");
        assert!(sections.is_empty());
    }

    #[test]
    fn rejects_unclosed_region() {
        let source = "# mend:start:broken\ndef broken():\n    pass\n";
        let err = MarkerExtractor::default()
            .extract(source)
            .expect_err("unclosed");
        assert!(err.to_string().contains("never closed"));
    }

    #[test]
    fn rejects_crossed_markers() {
        let source = "\
# mend:start:a
# mend:start:b
# mend:end:b
# mend:end:a
";
        let err = MarkerExtractor::default()
            .extract(source)
            .expect_err("crossed");
        assert!(err.to_string().contains("before a was closed"));
    }

    #[test]
    fn rejects_mismatched_end() {
        let source = "# mend:start:a\n# mend:end:b\n";
        let err = MarkerExtractor::default()
            .extract(source)
            .expect_err("mismatched");
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn supports_other_comment_prefixes() {
        let source = "// mend:start:main\nfn main() {}\n// mend:end:main\n";
        let extractor = MarkerExtractor::new("//").expect("extractor");
        let sections = extractor.extract(source).expect("extract");
        assert_eq!(sections["main"].content, "fn main() {}");
    }
}
