//! Environment configuration stored in `terrarun.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default configuration file name, looked up in the current directory.
pub const CONFIG_FILE: &str = "terrarun.toml";

/// How a working directory is prepared and how the tool is invoked.
///
/// Missing fields default to the layout of a sumaform checkout driven by
/// the system terraform binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvConfig {
    /// Provisioning tool executable.
    pub terraform_bin: PathBuf,

    /// Working directory the tool runs in.
    pub workdir: PathBuf,

    /// Template copied to `<workdir>/main.tf`.
    pub template: PathBuf,

    /// Optional variable declarations copied to `<workdir>/variables.tf`.
    pub variables_description: Option<PathBuf>,

    /// Typed variable files copied into the working directory by basename.
    pub tfvars_files: Vec<PathBuf>,

    /// Backend module linked to `<workdir>/modules/backend`.
    pub backend: String,

    /// Log file that tool output is appended to.
    pub output_file: Option<PathBuf>,

    /// Default `-parallelism` for apply.
    pub parallelism: u32,

    /// Extra environment variables for every tool invocation.
    pub variables: BTreeMap<String, String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            terraform_bin: PathBuf::from("/usr/bin/terraform"),
            workdir: PathBuf::from("."),
            template: PathBuf::from("main.tf"),
            variables_description: None,
            tfvars_files: Vec::new(),
            backend: "libvirt".to_string(),
            output_file: None,
            parallelism: 10,
            variables: BTreeMap::new(),
        }
    }
}

impl EnvConfig {
    pub fn validate(&self) -> Result<()> {
        if self.terraform_bin.as_os_str().is_empty() {
            return Err(anyhow!("terraform_bin must not be empty"));
        }
        if self.workdir.as_os_str().is_empty() {
            return Err(anyhow!("workdir must not be empty"));
        }
        if self.backend.trim().is_empty() {
            return Err(anyhow!("backend must not be empty"));
        }
        if self.parallelism == 0 {
            return Err(anyhow!("parallelism must be > 0"));
        }
        if let Some(name) = self.variables.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(anyhow!("invalid environment variable name {name:?}"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EnvConfig::default()`.
pub fn load_config(path: &Path) -> Result<EnvConfig> {
    if !path.exists() {
        let cfg = EnvConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EnvConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EnvConfig::default());
        assert_eq!(cfg.parallelism, 10);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
workdir = "/srv/sumaform"
template = "ci/uyuni-master.tf"
tfvars_files = ["ci/uyuni.tfvars"]

[variables]
CUCUMBER_BRANCH = "master"
"#,
        )
        .expect("write config");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.workdir, PathBuf::from("/srv/sumaform"));
        assert_eq!(cfg.tfvars_files, vec![PathBuf::from("ci/uyuni.tfvars")]);
        assert_eq!(cfg.terraform_bin, PathBuf::from("/usr/bin/terraform"));
        assert_eq!(cfg.backend, "libvirt");
        assert_eq!(
            cfg.variables.get("CUCUMBER_BRANCH").map(String::as_str),
            Some("master")
        );
    }

    #[test]
    fn rejects_zero_parallelism() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "parallelism = 0\n").expect("write config");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("parallelism"));
    }

    #[test]
    fn rejects_bad_variable_names() {
        let mut cfg = EnvConfig::default();
        cfg.variables.insert("A=B".to_string(), "x".to_string());
        assert!(cfg.validate().is_err());
    }
}
