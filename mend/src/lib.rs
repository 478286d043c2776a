//! Iterative auto-fix loop for failing agent tests.
//!
//! The loop re-runs a suite after each LLM-proposed rewrite, learning from
//! every attempt. The architecture enforces a strict separation:
//!
//! - **[`memory`]**: The system of record for one execution: fix attempts,
//!   LLM interactions, test runs. Every read accessor is total; an unseen
//!   file path yields an empty structure, never an error.
//! - **[`insights`], [`targeting`], [`compare`]**: Pure projections over
//!   memory that drive prompt construction and best-attempt selection.
//! - **[`llm`], [`explain`]**: Collaborator seams with scripted fakes for
//!   tests and deterministic fallbacks for degraded operation.
//!
//! Orchestration ([`run`]) sequences collaborators strictly: each attempt's
//! prompt depends on the fully-committed history of all prior attempts.

pub mod capture;
pub mod cli;
pub mod compare;
pub mod explain;
pub mod insights;
pub mod llm;
pub mod memory;
pub mod prompt;
pub mod report;
pub mod run;
pub mod targeting;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
