//! Stable exit codes for terrarun CLI commands.
//!
//! Commands that run the provisioning tool exit with the tool's own code.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid configuration, input or lifecycle state, or any other error.
pub const INVALID: i32 = 1;
/// A state query found no value for the requested role or field.
pub const NOT_FOUND: i32 = 2;
/// A state query ran before any state file was written.
pub const STATE_MISSING: i32 = 3;
