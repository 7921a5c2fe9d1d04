//! Working directory layout and preparation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use super::config::EnvConfig;

pub const MAIN_TF: &str = "main.tf";
pub const VARIABLES_TF: &str = "variables.tf";
pub const STATE_FILE: &str = "terraform.tfstate";

/// Canonical paths within a working directory.
#[derive(Debug, Clone)]
pub struct WorkdirPaths {
    pub root: PathBuf,
    pub main_tf: PathBuf,
    pub variables_tf: PathBuf,
    pub state_file: PathBuf,
    pub plugin_dir: PathBuf,
    pub backend_modules: PathBuf,
    pub backend_link: PathBuf,
}

impl WorkdirPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            main_tf: root.join(MAIN_TF),
            variables_tf: root.join(VARIABLES_TF),
            state_file: root.join(STATE_FILE),
            plugin_dir: root.join(".terraform"),
            backend_modules: root.join("backend_modules"),
            backend_link: root.join("modules").join("backend"),
            root,
        }
    }

    /// Path of a tracked variable file inside the working directory.
    pub fn local(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

/// Basenames of the configured variable files, as the tool sees them.
pub fn local_tfvars_names(cfg: &EnvConfig) -> Result<Vec<String>> {
    cfg.tfvars_files.iter().map(|file| basename(file)).collect()
}

/// Copy the template, variable declarations and variable files into the
/// working directory and link the backend module.
///
/// Returns the basenames of the variable files.
#[instrument(skip_all, fields(workdir = %cfg.workdir.display()))]
pub fn prepare_workdir(cfg: &EnvConfig, paths: &WorkdirPaths) -> Result<Vec<String>> {
    fs::create_dir_all(&paths.root)
        .with_context(|| format!("create workdir {}", paths.root.display()))?;

    copy_unless_same(&cfg.template, &paths.main_tf)?;

    if let Some(description) = &cfg.variables_description {
        if description.is_file() {
            copy_unless_same(description, &paths.variables_tf)?;
        } else {
            warn!(path = %description.display(), "variable declarations not found, skipping");
        }
    }

    let mut names = Vec::with_capacity(cfg.tfvars_files.len());
    for file in &cfg.tfvars_files {
        let name = basename(file)?;
        copy_unless_same(file, &paths.local(&name))?;
        names.push(name);
    }

    link_backend(&cfg.backend, paths)?;
    info!(tfvars = ?names, "working directory prepared");
    Ok(names)
}

fn copy_unless_same(from: &Path, to: &Path) -> Result<()> {
    if same_file(from, to) {
        debug!(path = %from.display(), "source is already in place");
        return Ok(());
    }
    fs::copy(from, to)
        .with_context(|| format!("copy {} to {}", from.display(), to.display()))?;
    debug!(from = %from.display(), to = %to.display(), "copied");
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn basename(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("variable file path has no file name: {}", path.display()))
}

/// Link `backend_modules/<backend>` to `modules/backend` when the
/// working directory uses that layout. An existing link is replaced.
fn link_backend(backend: &str, paths: &WorkdirPaths) -> Result<()> {
    let target = paths.backend_modules.join(backend);
    if !target.exists() {
        debug!(backend, "no backend module directory, skipping link");
        return Ok(());
    }
    let target = target
        .canonicalize()
        .with_context(|| format!("resolve {}", target.display()))?;

    if fs::symlink_metadata(&paths.backend_link).is_ok_and(|m| m.file_type().is_symlink()) {
        fs::remove_file(&paths.backend_link)
            .with_context(|| format!("unlink {}", paths.backend_link.display()))?;
    }
    if let Some(parent) = paths.backend_link.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    symlink_dir(&target, &paths.backend_link)?;
    info!(backend, link = %paths.backend_link.display(), "linked backend module");
    Ok(())
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("link {} to {}", link.display(), target.display()))
}

#[cfg(not(unix))]
fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    Err(anyhow!(
        "cannot link {} to {}: symlinks unsupported on this platform",
        link.display(),
        target.display()
    ))
}
