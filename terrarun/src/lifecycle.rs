//! Environment lifecycle: prepare, init, apply, taint, destroy.
//!
//! An [`Environment`] owns one working directory and drives the
//! provisioning tool through it. Transitions are guarded by an explicit
//! [`LifecycleState`]; preparation happens at most once per instance.
//!
//! Tool output is streamed line by line to stdout and appended to the
//! configured log file while the command runs.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::Write;

use anyhow::{Context, Result};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::repos::{InjectOutcome, RepositoryMap};
use crate::io::config::EnvConfig;
use crate::io::state::{StateError, StateFile};
use crate::io::tool::{Invocation, TerraformCli, Tool};
use crate::io::workdir::{WorkdirPaths, local_tfvars_names, prepare_workdir};
use crate::prune;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unprepared,
    Prepared,
    Initialized,
    Applied,
    Destroyed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot {operation} an environment that is {state:?}")]
    InvalidTransition {
        operation: &'static str,
        state: LifecycleState,
    },
}

/// Parameters of an apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// `-parallelism`; the configured default when `None`.
    pub parallelism: Option<u32>,
    /// Prune the template and variable files before applying.
    pub prune: bool,
    /// Roles kept in addition to the default survivors.
    pub keep: BTreeSet<String>,
    /// Also drop proxies, monitoring, retail and DHCP/DNS roles by default.
    pub delete_all: bool,
}

/// Result of tainting one resource address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tainted {
    pub address: String,
    pub exit_code: i32,
}

/// Outcome of repository injection across the working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectReport {
    pub template: InjectOutcome,
    /// Variable files that received `additional_repos`.
    pub updated_tfvars: Vec<String>,
}

/// States in which the working directory exists and is not torn down.
const ACTIVE: [LifecycleState; 3] = [
    LifecycleState::Prepared,
    LifecycleState::Initialized,
    LifecycleState::Applied,
];

pub struct Environment<T: Tool> {
    cfg: EnvConfig,
    paths: WorkdirPaths,
    tool: T,
    state: LifecycleState,
    tfvars: Vec<String>,
}

impl Environment<TerraformCli> {
    /// Environment driving the configured terraform binary, with the
    /// configured variables exported to every invocation.
    pub fn terraform(cfg: EnvConfig) -> Result<Self> {
        let tool = TerraformCli::from_config(&cfg);
        Self::new(cfg, tool)
    }
}

impl<T: Tool> Environment<T> {
    pub fn new(cfg: EnvConfig, tool: T) -> Result<Self> {
        cfg.validate()?;
        let paths = WorkdirPaths::new(&cfg.workdir);
        let tfvars = local_tfvars_names(&cfg)?;
        Ok(Self {
            cfg,
            paths,
            tool,
            state: LifecycleState::Unprepared,
            tfvars,
        })
    }

    /// Pick up an existing working directory, inferring how far it got.
    pub fn resume(cfg: EnvConfig, tool: T) -> Result<Self> {
        let mut env = Self::new(cfg, tool)?;
        env.state = if env.paths.state_file.is_file() {
            LifecycleState::Applied
        } else if env.paths.plugin_dir.is_dir() {
            LifecycleState::Initialized
        } else if env.paths.main_tf.is_file() {
            LifecycleState::Prepared
        } else {
            LifecycleState::Unprepared
        };
        debug!(state = ?env.state, "resumed environment");
        Ok(env)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn paths(&self) -> &WorkdirPaths {
        &self.paths
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    /// Variable file names as passed to the tool.
    pub fn tfvars(&self) -> &[String] {
        &self.tfvars
    }

    /// Copy inputs into the working directory. Later calls are no-ops.
    pub fn prepare(&mut self) -> Result<()> {
        if self.state != LifecycleState::Unprepared {
            debug!(state = ?self.state, "already prepared");
            return Ok(());
        }
        self.tfvars = prepare_workdir(&self.cfg, &self.paths)?;
        self.state = LifecycleState::Prepared;
        Ok(())
    }

    /// Set additional repositories in the variable files and the template's
    /// placeholders.
    #[instrument(skip_all)]
    pub fn inject_repositories(&self, repositories: &RepositoryMap) -> Result<InjectReport> {
        self.require("inject repositories into", &ACTIVE)?;
        let mut updated_tfvars = Vec::new();
        for name in &self.tfvars {
            if prune::inject_tfvars_file(&self.paths.local(name), repositories)? {
                updated_tfvars.push(name.clone());
            }
        }
        let template = prune::inject_template_file(&self.paths.main_tf, repositories)?;
        Ok(InjectReport {
            template,
            updated_tfvars,
        })
    }

    /// Run `init`. The state only advances on success.
    pub fn init(&mut self) -> Result<i32> {
        self.require("init", &ACTIVE)?;
        let code = self.stream(&Invocation::init())?;
        if code == 0 {
            if self.state == LifecycleState::Prepared {
                self.state = LifecycleState::Initialized;
            }
        } else {
            warn!(exit_code = code, "init failed");
        }
        Ok(code)
    }

    /// Optionally prune, then run `apply`. Returns the tool's exit code.
    ///
    /// A failed apply may still have created resources, so the environment
    /// counts as applied either way.
    #[instrument(skip_all, fields(prune = options.prune, delete_all = options.delete_all))]
    pub fn apply(&mut self, options: &ApplyOptions) -> Result<i32> {
        self.require("apply", &[LifecycleState::Initialized, LifecycleState::Applied])?;
        if options.prune {
            self.prune(&options.keep, options.delete_all)?;
        }
        let parallelism = options.parallelism.unwrap_or(self.cfg.parallelism);
        let code = self.stream(&Invocation::apply(parallelism, &self.tfvars))?;
        if code != 0 {
            warn!(exit_code = code, "apply failed");
        }
        self.state = LifecycleState::Applied;
        Ok(code)
    }

    /// Prune the working copies of the template and every variable file.
    pub fn prune(&self, keep: &BTreeSet<String>, delete_all: bool) -> Result<()> {
        self.require("prune", &ACTIVE)?;
        prune::prune_template_file(&self.paths.main_tf, keep, delete_all)?;
        let mut seen = BTreeSet::new();
        for name in &self.tfvars {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let path = self.paths.local(name);
            if path.is_file() {
                prune::prune_tfvars_file(&path, keep, delete_all)?;
            } else {
                warn!(path = %path.display(), "variable file missing, not pruned");
            }
        }
        Ok(())
    }

    /// Resource addresses in the state whose start matches `pattern`.
    ///
    /// Without a state file there is nothing to list and the tool is not run.
    pub fn resources(&self, pattern: Option<&Regex>) -> Result<Vec<String>> {
        if !self.paths.state_file.is_file() {
            debug!("no state file, no resources");
            return Ok(Vec::new());
        }
        let mut all = Vec::new();
        let code = self.tool.run(&Invocation::state_list(), &mut |line| {
            let line = line.trim_end();
            if !line.is_empty() {
                all.push(line.to_string());
            }
        })?;
        if code != 0 {
            warn!(exit_code = code, "state list failed");
            return Ok(Vec::new());
        }
        Ok(match pattern {
            Some(pattern) => all
                .into_iter()
                .filter(|address| matches_at_start(pattern, address))
                .collect(),
            None => all,
        })
    }

    /// Taint every resource matching `pattern`, one command per address.
    #[instrument(skip_all, fields(pattern = pattern.as_str()))]
    pub fn taint(&mut self, pattern: &Regex) -> Result<Vec<Tainted>> {
        self.require("taint", &[LifecycleState::Applied])?;
        let addresses = self.resources(Some(pattern))?;
        info!(count = addresses.len(), "tainting resources");
        let mut results = Vec::with_capacity(addresses.len());
        for address in addresses {
            println!("{address}");
            let exit_code = self.stream(&Invocation::taint(&address))?;
            if exit_code != 0 {
                warn!(address = %address, exit_code, "taint failed");
            }
            results.push(Tainted { address, exit_code });
        }
        Ok(results)
    }

    /// Run `destroy` with every tracked variable file.
    pub fn destroy(&mut self) -> Result<i32> {
        self.require("destroy", &ACTIVE)?;
        let code = self.stream(&Invocation::destroy(&self.tfvars))?;
        if code == 0 {
            self.state = LifecycleState::Destroyed;
        } else {
            warn!(exit_code = code, "destroy failed");
        }
        Ok(code)
    }

    pub fn hostname(&self, role: &str) -> Result<Option<String>, StateError> {
        Ok(self.load_state()?.hostname(role))
    }

    pub fn hostnames(&self, role: &str) -> Result<Vec<String>, StateError> {
        Ok(self.load_state()?.hostnames(role))
    }

    pub fn single_node_ip(&self) -> Result<Option<String>, StateError> {
        Ok(self.load_state()?.single_node_ip())
    }

    fn load_state(&self) -> Result<StateFile, StateError> {
        StateFile::load(&self.paths.state_file)
    }

    fn require(&self, operation: &'static str, allowed: &[LifecycleState]) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(LifecycleError::InvalidTransition {
            operation,
            state: self.state,
        }
        .into())
    }

    /// Run `invocation`, echoing output to stdout and the log file.
    fn stream(&self, invocation: &Invocation) -> Result<i32> {
        let mut log = self.open_log()?;
        let mut stdout = std::io::stdout();
        self.tool.run(invocation, &mut |line| {
            if let Err(e) = writeln!(stdout, "{line}") {
                warn!(err = %e, "failed to write tool output");
            }
            if let Some(file) = log.as_mut()
                && let Err(e) = writeln!(file, "{line}").and_then(|()| file.flush())
            {
                warn!(err = %e, "failed to write log file");
            }
        })
    }

    fn open_log(&self) -> Result<Option<File>> {
        let Some(path) = &self.cfg.output_file else {
            return Ok(None);
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        Ok(Some(file))
    }
}

/// Match anchored at the start of `text` only. The leftmost match starts at
/// zero whenever any match does.
fn matches_at_start(pattern: &Regex, text: &str) -> bool {
    pattern.find(text).is_some_and(|m| m.start() == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_anchored_matching() {
        let pattern = Regex::new(".*(domain|main_disk).*").expect("regex");
        assert!(matches_at_start(
            &pattern,
            "module.server.module.host.libvirt_domain.domain[0]"
        ));
        let pattern = Regex::new("domain").expect("regex");
        assert!(!matches_at_start(&pattern, "module.server.libvirt_domain.domain[0]"));
        let pattern = Regex::new("module\\.proxy").expect("regex");
        assert!(matches_at_start(&pattern, "module.proxy.module.host"));
    }
}
