//! Stable exit codes for devflow CLI commands.

/// Command succeeded; for `run`, the cycle completed or had nothing to publish.
pub const OK: i32 = 0;
/// The cycle failed or was gated, or the command hit a configuration,
/// input or I/O error.
pub const FAILED: i32 = 1;
