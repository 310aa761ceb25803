//! Side-effecting adapters: config, processes, git, HTTP providers, and stores.

pub mod browser;
pub mod config;
pub mod deploy;
pub mod gemini;
pub mod git;
pub mod init;
pub mod log_sink;
pub mod model;
pub mod process;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod source_control;
pub mod workspace;
