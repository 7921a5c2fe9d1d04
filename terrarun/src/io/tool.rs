//! Provisioning tool abstraction.
//!
//! The [`Tool`] trait decouples lifecycle orchestration from the terraform
//! binary. Tests use scripted tools that record invocations and replay
//! predetermined output without spawning processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use tracing::{info, instrument};

use crate::io::config::EnvConfig;
use crate::io::process::run_streaming;

/// Arguments of one provisioning tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub args: Vec<String>,
}

impl Invocation {
    fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn init() -> Self {
        Self::new(["init"])
    }

    pub fn apply(parallelism: u32, var_files: &[String]) -> Self {
        let mut invocation = Self::new([
            "apply".to_string(),
            "-auto-approve".to_string(),
            format!("-parallelism={parallelism}"),
        ]);
        invocation.push_var_files(var_files);
        invocation
    }

    pub fn destroy(var_files: &[String]) -> Self {
        let mut invocation = Self::new(["destroy", "-auto-approve"]);
        invocation.push_var_files(var_files);
        invocation
    }

    pub fn taint(address: &str) -> Self {
        Self::new(["taint", address])
    }

    pub fn state_list() -> Self {
        Self::new(["state", "list"])
    }

    fn push_var_files(&mut self, var_files: &[String]) {
        self.args
            .extend(var_files.iter().map(|file| format!("-var-file={file}")));
    }

    /// Command name, e.g. `apply`.
    pub fn command(&self) -> &str {
        self.args.first().map_or("", String::as_str)
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

/// Abstraction over the provisioning tool.
pub trait Tool {
    /// Run `invocation` to completion, feeding every output line (stdout and
    /// stderr merged) to `on_line`. Returns the exit code.
    fn run(&self, invocation: &Invocation, on_line: &mut dyn FnMut(&str)) -> Result<i32>;
}

/// Tool that spawns the terraform binary in the working directory.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    bin: PathBuf,
    workdir: PathBuf,
    env: BTreeMap<String, String>,
}

impl TerraformCli {
    pub fn new(bin: &Path, workdir: &Path, env: BTreeMap<String, String>) -> Self {
        Self {
            bin: bin.to_path_buf(),
            workdir: workdir.to_path_buf(),
            env,
        }
    }

    /// Terraform as configured, with the configured variables exported.
    pub fn from_config(cfg: &EnvConfig) -> Self {
        Self::new(&cfg.terraform_bin, &cfg.workdir, cfg.variables.clone())
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(&invocation.args)
            .current_dir(&self.workdir)
            .envs(&self.env);
        cmd
    }
}

impl Tool for TerraformCli {
    #[instrument(skip_all, fields(command = invocation.command()))]
    fn run(&self, invocation: &Invocation, on_line: &mut dyn FnMut(&str)) -> Result<i32> {
        info!(bin = %self.bin.display(), args = %invocation, "running terraform");
        run_streaming(self.command(invocation), on_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn apply_arguments() {
        let invocation = Invocation::apply(20, &[]);
        assert_eq!(invocation.args, vec!["apply", "-auto-approve", "-parallelism=20"]);

        let invocation = Invocation::apply(10, &files(&["a.tfvars", "b.tfvars"]));
        assert_eq!(
            invocation.to_string(),
            "apply -auto-approve -parallelism=10 -var-file=a.tfvars -var-file=b.tfvars"
        );
    }

    #[test]
    fn destroy_taint_and_state_arguments() {
        assert_eq!(
            Invocation::destroy(&files(&["x.tfvars"])).args,
            vec!["destroy", "-auto-approve", "-var-file=x.tfvars"]
        );
        assert_eq!(
            Invocation::taint("module.server.libvirt_domain.domain[0]").args,
            vec!["taint", "module.server.libvirt_domain.domain[0]"]
        );
        assert_eq!(Invocation::state_list().args, vec!["state", "list"]);
        assert_eq!(Invocation::init().command(), "init");
    }

    #[cfg(unix)]
    #[test]
    fn terraform_cli_runs_in_workdir_with_env() {
        let temp = tempfile::tempdir().expect("tempdir");
        let env = BTreeMap::from([("CUCUMBER_BRANCH".to_string(), "test".to_string())]);
        let tool = TerraformCli::new(Path::new("sh"), temp.path(), env);
        let invocation = Invocation::new(["-c", "pwd; echo $CUCUMBER_BRANCH"]);

        let mut lines = Vec::new();
        let code = tool
            .run(&invocation, &mut |line| lines.push(line.to_string()))
            .expect("run");
        assert_eq!(code, 0);
        let workdir = temp.path().canonicalize().expect("canonicalize");
        assert_eq!(lines.len(), 2);
        assert_eq!(
            Path::new(&lines[0]).canonicalize().expect("canonicalize pwd"),
            workdir
        );
        assert_eq!(lines[1], "test");
    }
}
