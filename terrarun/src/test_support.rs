//! Test-only helpers: a scripted provisioning tool and a sumaform-like
//! fixture tree.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::io::config::EnvConfig;
use crate::io::tool::{Invocation, Tool};

/// Template with a base module, core roles, two minions and an aggregator.
pub const TEMPLATE: &str = r#"terraform {
  required_version = "1.0.10"
}

// WORKAROUND: pinned until the provider is released
provider "libvirt" {
  uri = "qemu:///system"
}

module "base" {
  source = "./modules/base"
  name_prefix = "uyuni-ci-"
}

module "server" {
  source = "./modules/server"
  base_configuration = module.base.configuration
  // server_additional_repos
}

module "proxy" {
  source = "./modules/proxy"
  base_configuration = module.base.configuration
  server_configuration = module.server.configuration
  // proxy_additional_repos
}

module "sles15sp5-minion" {
  source = "./modules/minion"
  server_configuration = module.server.configuration
}

module "rocky8-minion" {
  source = "./modules/minion"
  server_configuration = module.proxy.configuration
}

module "controller" {
  source = "./modules/controller"
  base_configuration = module.base.configuration
  server_configuration = module.server.configuration
  proxy_configuration = module.proxy.configuration
  sle15sp5_minion_configuration = module.sles15sp5-minion.configuration
  rocky8_minion_configuration = module.rocky8-minion.configuration
}

output "configuration" {
  value = {
    controller = module.controller.configuration
    server = module.server.configuration
    proxy = module.proxy.configuration
    sles15sp5-minion = module.sles15sp5-minion.configuration
    rocky8-minion = module.rocky8-minion.configuration
  }
}
"#;

/// Variable file matching [`TEMPLATE`].
pub const TFVARS: &str = r#"PRODUCT_VERSION = "uyuni-master"
ENVIRONMENT_CONFIGURATION = {
  controller = {
    name = "controller"
  }
  server = {
    name = "server"
    memory = 16384
  }
  proxy = {
    name = "proxy"
  }
  sles15sp5_minion = {
    name = "sles15sp5-minion"
  }
  rocky8_minion = {
    name = "rocky8-minion"
  }
}
"#;

/// Variable declarations with defaults.
pub const VARIABLES: &str = r#"variable "CUCUMBER_BRANCH" {
  type    = string
  default = "master"
}

variable "SCC_USER" {
  type = string
}
"#;

/// State file as left behind by a successful apply of [`TEMPLATE`].
pub const STATE: &str = r#"{
  "version": 4,
  "outputs": {
    "configuration": {
      "value": {
        "controller": { "hostname": "uyuni-ci-ctl.mgr.example.org" },
        "server": { "hostnames": ["uyuni-ci-srv.mgr.example.org"] },
        "proxy": { "hostname": "uyuni-ci-pxy.mgr.example.org" },
        "ipaddrs": [["192.168.122.10"]]
      }
    }
  }
}
"#;

/// Resource addresses reported by `state list` for [`STATE`].
pub const RESOURCES: [&str; 6] = [
    "module.base.module.base_backend.libvirt_volume.volumes[\"opensuse155o\"]",
    "module.proxy.module.proxy.module.host.libvirt_domain.domain[0]",
    "module.proxy.module.proxy.module.host.libvirt_volume.main_disk[0]",
    "module.server.module.server.module.host.data.template_file.user_data",
    "module.server.module.server.module.host.libvirt_domain.domain[0]",
    "module.server.module.server.module.host.libvirt_volume.main_disk[0]",
];

/// A source checkout and an empty working directory.
pub struct Fixture {
    pub src: TempDir,
    pub work: TempDir,
    pub cfg: EnvConfig,
}

impl Fixture {
    pub fn workdir_file(&self, name: &str) -> PathBuf {
        self.work.path().join(name)
    }

    pub fn read_workdir_file(&self, name: &str) -> Result<String> {
        let path = self.workdir_file(name);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}

/// Write the sumaform-like inputs and return a config pointing at them.
pub fn fixture() -> Result<Fixture> {
    let src = tempfile::tempdir().context("create source dir")?;
    let work = tempfile::tempdir().context("create workdir")?;
    fs::write(src.path().join("uyuni.tf"), TEMPLATE).context("write template")?;
    fs::write(src.path().join("uyuni.tfvars"), TFVARS).context("write tfvars")?;
    fs::write(src.path().join("variables.tf"), VARIABLES).context("write variables")?;
    fs::create_dir_all(work.path().join("backend_modules/libvirt"))
        .context("create backend modules")?;

    let cfg = EnvConfig {
        workdir: work.path().to_path_buf(),
        template: src.path().join("uyuni.tf"),
        variables_description: Some(src.path().join("variables.tf")),
        tfvars_files: vec![src.path().join("uyuni.tfvars")],
        output_file: Some(work.path().join("terraform.log")),
        ..EnvConfig::default()
    };
    Ok(Fixture { src, work, cfg })
}

/// Provisioning tool replaying scripted output and exit codes per command.
///
/// Every invocation is recorded. Commands without a scripted exit code
/// succeed.
#[derive(Debug, Default)]
pub struct ScriptedTool {
    calls: RefCell<Vec<Invocation>>,
    exit_codes: BTreeMap<String, i32>,
    outputs: BTreeMap<String, Vec<String>>,
    writes: BTreeMap<String, (PathBuf, String)>,
}

impl ScriptedTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exit_code(mut self, command: &str, code: i32) -> Self {
        self.exit_codes.insert(command.to_string(), code);
        self
    }

    pub fn with_output(mut self, command: &str, lines: &[&str]) -> Self {
        self.outputs.insert(
            command.to_string(),
            lines.iter().map(|line| line.to_string()).collect(),
        );
        self
    }

    /// Write `contents` to `path` whenever `command` runs.
    pub fn writes_file(mut self, command: &str, path: PathBuf, contents: &str) -> Self {
        self.writes
            .insert(command.to_string(), (path, contents.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// Recorded invocations rendered as argument strings.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(ToString::to_string).collect()
    }
}

impl Tool for ScriptedTool {
    fn run(&self, invocation: &Invocation, on_line: &mut dyn FnMut(&str)) -> Result<i32> {
        self.calls.borrow_mut().push(invocation.clone());
        let command = invocation.command();
        if let Some((path, contents)) = self.writes.get(command) {
            fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
        }
        for line in self.outputs.get(command).into_iter().flatten() {
            on_line(line);
        }
        Ok(self.exit_codes.get(command).copied().unwrap_or(0))
    }
}
