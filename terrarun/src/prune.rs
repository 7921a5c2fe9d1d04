//! File-level pruning and repository injection.
//!
//! Each function reads one file, runs the matching pure rewrite from
//! [`crate::core`] and writes the result back in place, so the tool always
//! sees the rewritten file.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::repos::{self, InjectOutcome, InjectStatus, RepositoryMap};
use crate::core::tfvars::VariableFile;
use crate::core::{keep, template};

/// Prune a template file in place. Returns the resolved keep-set.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn prune_template_file(
    path: &Path,
    explicit_keep: &BTreeSet<String>,
    delete_all: bool,
) -> Result<BTreeSet<String>> {
    let text = read(path)?;
    let declared = template::module_names(&text);
    let resolved = keep::resolve(explicit_keep, delete_all, declared.iter().map(String::as_str));
    let pruned = template::prune(&text, &resolved);
    write(path, &pruned)?;
    info!(kept = resolved.len(), declared = declared.len(), "template pruned");
    Ok(resolved)
}

/// Prune a variable file in place. Returns the removed roles.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn prune_tfvars_file(
    path: &Path,
    explicit_keep: &BTreeSet<String>,
    delete_all: bool,
) -> Result<Vec<String>> {
    let mut file = load_tfvars(path)?;
    let removed = file.prune_variables(explicit_keep, delete_all);
    write(path, &file.to_text())?;
    info!(removed = ?removed, "variable file pruned");
    Ok(removed)
}

/// Replace repository placeholders in a template file.
///
/// The file is only rewritten when every placeholder was found exactly once.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn inject_template_file(path: &Path, repositories: &RepositoryMap) -> Result<InjectOutcome> {
    let text = read(path)?;
    let outcome = repos::inject(&text, repositories)?;
    if outcome.status == InjectStatus::Success {
        write(path, &outcome.text)?;
    } else {
        warn!(status = ?outcome.status, role = ?outcome.role, "template left unchanged");
    }
    Ok(outcome)
}

/// Set `additional_repos` in a variable file. Returns whether it changed.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn inject_tfvars_file(path: &Path, repositories: &RepositoryMap) -> Result<bool> {
    let mut file = load_tfvars(path)?;
    if !file.inject_repositories(repositories) {
        info!("no custom repository was added");
        return Ok(false);
    }
    write(path, &file.to_text())?;
    Ok(true)
}

fn load_tfvars(path: &Path) -> Result<VariableFile> {
    let text = read(path)?;
    VariableFile::parse(&text).with_context(|| format!("parse {}", path.display()))
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    const TEMPLATE: &str = r#"module "base" {
  source = "./modules/base"
}

module "server" {
  source = "./modules/server"
  // server_additional_repos
}

module "sles15-minion" {
  source = "./modules/minion"
  server_configuration = module.server.configuration
}

module "controller" {
  source = "./modules/controller"
  server_configuration = module.server.configuration
  sles15_minion_configuration = module.sles15-minion.configuration
}
"#;

    const TFVARS: &str = r#"ENVIRONMENT_CONFIGURATION = {
  controller = {
    name = "ctl"
  }
  server = {
    name = "srv"
  }
  sles15_minion = {
    name = "min"
  }
}
"#;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn prunes_template_in_place() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("main.tf");
        fs::write(&path, TEMPLATE).expect("write");

        let resolved = prune_template_file(&path, &BTreeSet::new(), false).expect("prune");
        assert_eq!(resolved, set(&["base", "controller", "server"]));

        let text = fs::read_to_string(&path).expect("read");
        assert!(!text.contains("sles15-minion"));
        assert!(text.contains("server_configuration = module.server.configuration"));
        assert!(text.contains("// server_additional_repos"));
    }

    #[test]
    fn prunes_tfvars_in_place() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("uyuni.tfvars");
        fs::write(&path, TFVARS).expect("write");

        let removed = prune_tfvars_file(&path, &BTreeSet::new(), false).expect("prune");
        assert_eq!(removed, vec!["sles15_minion"]);
        let text = fs::read_to_string(&path).expect("read");
        assert!(text.contains("server = {"));
        assert!(!text.contains("sles15_minion"));
    }

    #[test]
    fn injection_writes_only_on_success() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("main.tf");
        fs::write(&path, TEMPLATE).expect("write");

        let missing: RepositoryMap = BTreeMap::from([(
            "proxy".to_string(),
            BTreeMap::from([("tools".to_string(), "http://tools".to_string())]),
        )]);
        let outcome = inject_template_file(&path, &missing).expect("inject");
        assert_eq!(outcome.status, InjectStatus::Missing);
        assert_eq!(fs::read_to_string(&path).expect("read"), TEMPLATE);

        let present: RepositoryMap = BTreeMap::from([(
            "server".to_string(),
            BTreeMap::from([("tools".to_string(), "http://tools".to_string())]),
        )]);
        let outcome = inject_template_file(&path, &present).expect("inject");
        assert_eq!(outcome.status, InjectStatus::Success);
        assert!(
            fs::read_to_string(&path)
                .expect("read")
                .contains("  additional_repos = { \"tools\" = \"http://tools\" }\n")
        );
    }

    #[test]
    fn tfvars_injection_reports_changes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("uyuni.tfvars");
        fs::write(&path, TFVARS).expect("write");

        let repositories: RepositoryMap = BTreeMap::from([(
            "server".to_string(),
            BTreeMap::from([("mu".to_string(), "http://mu".to_string())]),
        )]);
        assert!(inject_tfvars_file(&path, &repositories).expect("inject"));
        assert!(fs::read_to_string(&path).expect("read").contains("additional_repos = {"));

        let unrelated: RepositoryMap = BTreeMap::from([(
            "proxy".to_string(),
            BTreeMap::from([("mu".to_string(), "http://mu".to_string())]),
        )]);
        assert!(!inject_tfvars_file(&path, &unrelated).expect("inject"));
    }
}
