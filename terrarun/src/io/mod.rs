//! I/O helpers: configuration, subprocesses, working directory and state.

pub mod config;
pub mod process;
pub mod state;
pub mod tool;
pub mod workdir;
