//! Deterministic, pure logic for template and variable-file rewriting.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and data structures and return deterministic outputs suitable for
//! tests.

pub mod hcl;
pub mod keep;
pub mod references;
pub mod repos;
pub mod template;
pub mod tfvars;
pub mod variables;
