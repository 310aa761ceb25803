//! Feature request to merged pull request, driven by tool-augmented LLM agents.
//!
//! A cycle turns free-text feature requests into a structured ticket, builds
//! the change on a feature branch, opens a pull request, evaluates it with
//! review, QA and impact agents, and lets a confidence formula decide the
//! merge. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (answer parsing, scoring, branch
//!   naming, backoff). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting capabilities (model API, git, source-control
//!   host, browser tests, deploys, log sink, workspace files) behind traits so
//!   tests can swap in fakes.
//! - **[`tools`]**: Named adapters that expose capabilities to the model.
//! - **[`agents`]**: The bounded tool-use loop and the seven role agents.
//!
//! [`pipeline`] wires them into one cycle for the CLI.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
