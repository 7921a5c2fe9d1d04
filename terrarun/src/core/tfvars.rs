//! Typed variable files (`*.tfvars`) and their environment configuration.
//!
//! A variable file carries one role per entry of its
//! `ENVIRONMENT_CONFIGURATION` map. Pruning drops entries the same way the
//! template pruner drops modules; repository injection sets
//! `additional_repos` on server and proxy entries.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use super::hcl::{self, Map, ParseError, Value};
use super::keep;
use super::repos::RepositoryMap;

/// Top-level attribute holding the per-role configuration.
pub const ENVIRONMENT_CONFIGURATION: &str = "ENVIRONMENT_CONFIGURATION";

const ADDITIONAL_REPOS: &str = "additional_repos";

/// Repository input key to the role entries it applies to.
const REPOSITORY_TARGETS: [(&str, [&str; 2]); 2] = [
    ("server", ["server", "server_containerized"]),
    ("proxy", ["proxy", "proxy_containerized"]),
];

static BLOCK_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\}\n(\w)").unwrap());

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse variable file: {0}")]
    Parse(#[from] ParseError),
    #[error("ENVIRONMENT_CONFIGURATION must be a map")]
    InvalidBlock,
    #[error("ENVIRONMENT_CONFIGURATION.{role} must be a map")]
    InvalidRole { role: String },
}

/// A parsed variable file with a validated environment configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableFile {
    attributes: Map,
}

impl VariableFile {
    pub fn parse(src: &str) -> Result<Self, ConfigError> {
        let attributes = hcl::parse_attributes(src)?;
        if let Some(block) = attributes.get(ENVIRONMENT_CONFIGURATION) {
            let roles = block.as_map().ok_or(ConfigError::InvalidBlock)?;
            if let Some((role, _)) = roles.iter().find(|(_, value)| value.as_map().is_none()) {
                return Err(ConfigError::InvalidRole {
                    role: role.to_string(),
                });
            }
        }
        Ok(Self { attributes })
    }

    pub fn attributes(&self) -> &Map {
        &self.attributes
    }

    /// Role names of the environment configuration, in file order.
    pub fn roles(&self) -> Vec<&str> {
        self.environment()
            .map(|roles| roles.keys().collect())
            .unwrap_or_default()
    }

    pub fn role(&self, name: &str) -> Option<&Map> {
        self.environment()?.get(name)?.as_map()
    }

    fn environment(&self) -> Option<&Map> {
        self.attributes.get(ENVIRONMENT_CONFIGURATION)?.as_map()
    }

    fn environment_mut(&mut self) -> Option<&mut Map> {
        self.attributes
            .get_mut(ENVIRONMENT_CONFIGURATION)?
            .as_map_mut()
    }

    /// Drop roles outside the resolved keep-set. Returns the removed roles.
    pub fn prune_variables(
        &mut self,
        explicit_keep: &BTreeSet<String>,
        delete_all: bool,
    ) -> Vec<String> {
        let Some(roles) = self.environment_mut() else {
            warn!("no {ENVIRONMENT_CONFIGURATION} block found");
            return Vec::new();
        };
        let resolved = keep::resolve(explicit_keep, delete_all, roles.keys());
        let mut removed = Vec::new();
        roles.retain(|role, _| {
            let kept = resolved.contains(role);
            if !kept {
                info!(role, "removing");
                removed.push(role.to_string());
            }
            kept
        });
        removed
    }

    /// Set `additional_repos` on server and proxy roles. Returns whether
    /// anything changed.
    pub fn inject_repositories(&mut self, repositories: &RepositoryMap) -> bool {
        let Some(roles) = self.environment_mut() else {
            warn!("no {ENVIRONMENT_CONFIGURATION} block found");
            return false;
        };
        let mut updated = false;
        for (input_key, targets) in REPOSITORY_TARGETS {
            let Some(repos) = repositories.get(input_key).filter(|r| !r.is_empty()) else {
                continue;
            };
            for target in targets {
                if let Some(role) = roles.get_mut(target).and_then(Value::as_map_mut) {
                    role.insert(ADDITIONAL_REPOS, Value::from(repos));
                    updated = true;
                }
            }
        }
        updated
    }

    /// Serialize back to HCL with a blank line between top-level blocks.
    pub fn to_text(&self) -> String {
        let text = hcl::to_text(&self.attributes);
        let mut text = BLOCK_SEPARATOR.replace_all(&text, "}\n\n$1").into_owned();
        text.push('\n');
        text
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    const TFVARS: &str = r#"URL_PREFIX = "https://ci.example.org"
ENVIRONMENT_CONFIGURATION = {
  controller = {
    mac = "aa:bb:cc"
  }
  server_containerized = {
    mac = "00:11:22"
  }
  sles15_minion = { mac = "11:22:33" }
  rocky_minion = {
    mac = "44:55:66"
  }
}
BASE_CONFIGURATIONS = {
  base_core = {}
}
"#;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn prunes_unselected_roles() {
        let mut file = VariableFile::parse(TFVARS).expect("parse");
        let removed = file.prune_variables(&set(&["rocky_minion"]), false);
        assert_eq!(removed, vec!["sles15_minion".to_string()]);

        let text = file.to_text();
        assert!(text.contains("controller = {"));
        assert!(text.contains("rocky_minion = {"));
        assert!(!text.contains("sles15_minion"));
        assert!(text.contains("BASE_CONFIGURATIONS = {\n  base_core = {}\n}"));
        assert!(text.contains("URL_PREFIX = \"https://ci.example.org\"\n"));
    }

    #[test]
    fn separates_top_level_blocks_and_ends_with_newline() {
        let file = VariableFile::parse(TFVARS).expect("parse");
        let text = file.to_text();
        assert!(text.contains("}\n\nBASE_CONFIGURATIONS"));
        assert!(text.ends_with("}\n"));
        assert!(!text.ends_with("\n\n"));
    }

    #[test]
    fn pruned_output_parses_back() {
        let mut file = VariableFile::parse(TFVARS).expect("parse");
        file.prune_variables(&BTreeSet::new(), true);
        let reparsed = VariableFile::parse(&file.to_text()).expect("reparse");
        assert_eq!(reparsed, file);
        assert_eq!(reparsed.roles(), vec!["controller", "server_containerized"]);
    }

    #[test]
    fn missing_block_is_a_no_op() {
        let mut file = VariableFile::parse("A = 1\nB = \"x\"\n").expect("parse");
        assert!(file.prune_variables(&set(&["server"]), true).is_empty());
        assert_eq!(file.to_text(), "A = 1\nB = \"x\"\n");
    }

    #[test]
    fn rejects_non_map_roles() {
        let err = VariableFile::parse("ENVIRONMENT_CONFIGURATION = { server = \"x\" }\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRole { role } if role == "server"));

        let err = VariableFile::parse("ENVIRONMENT_CONFIGURATION = [1]\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBlock));

        let err = VariableFile::parse("ENVIRONMENT_CONFIGURATION = {\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn injects_repositories_into_server_and_proxy() {
        let mut file = VariableFile::parse(TFVARS).expect("parse");
        let repositories: RepositoryMap = BTreeMap::from([
            (
                "server".to_string(),
                BTreeMap::from([("mu".to_string(), "http://mu/server".to_string())]),
            ),
            (
                "proxy".to_string(),
                BTreeMap::from([("mu".to_string(), "http://mu/proxy".to_string())]),
            ),
        ]);
        assert!(file.inject_repositories(&repositories));

        let server = file.role("server_containerized").expect("server role");
        let repos = server.get("additional_repos").and_then(Value::as_map).expect("repos");
        assert_eq!(repos.get("mu"), Some(&Value::from("http://mu/server")));
        assert!(file.role("controller").expect("controller").get("additional_repos").is_none());
        assert!(file.to_text().contains("    additional_repos = {\n      mu = \"http://mu/server\"\n    }"));
    }

    #[test]
    fn injection_without_matching_roles_reports_no_change() {
        let mut file = VariableFile::parse(TFVARS).expect("parse");
        let repositories: RepositoryMap = BTreeMap::from([(
            "minion".to_string(),
            BTreeMap::from([("mu".to_string(), "http://mu".to_string())]),
        )]);
        assert!(!file.inject_repositories(&repositories));
    }
}
