//! Test execution domain for the mend auto-fix tool.
//!
//! This crate owns everything about *running and representing tests*: the
//! unified result models, the legacy region-keyed format and its round trips,
//! multi-run execution history, declarative suite files, the subprocess test
//! runner, and marker-based region extraction. The architecture keeps a strict
//! separation:
//!
//! - **Models** ([`result`], [`legacy`], [`history`]): pure, deterministic
//!   data with derived state recomputed on mutation. No I/O.
//! - **Collaborator seams** ([`runner`], [`region`]): traits with
//!   subprocess/regex-backed implementations, scriptable in tests.
//!
//! The auto-fix loop itself lives in the `mend` crate and consumes these
//! types through the accessor methods only.

pub mod config;
pub mod history;
pub mod legacy;
pub mod logging;
pub mod region;
pub mod result;
pub mod runner;
pub mod suite;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
