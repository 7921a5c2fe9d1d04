//! Template pruning and environment lifecycle for terraform-driven test
//! infrastructure.
//!
//! A sumaform-style template declares every role a test run could need.
//! This crate selects the roles a run actually uses, rewrites the template
//! and its variable files accordingly, fills in per-run repositories and
//! drives terraform through init, apply, taint and destroy. The architecture
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic text and data rewrites (HCL literals,
//!   keep-set resolution, template segments, reference filtering, variable
//!   files, repository placeholders). No I/O.
//! - **[`io`]**: Side-effecting operations (configuration, subprocesses,
//!   working directory, state file). Isolated behind traits for tests.
//!
//! Orchestration modules ([`prune`], [`lifecycle`]) combine the two to
//! implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod lifecycle;
pub mod logging;
pub mod prune;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
