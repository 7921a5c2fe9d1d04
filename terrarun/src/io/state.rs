//! Queries against the provisioning tool's state file.
//!
//! Host identities live under `outputs.configuration.value`, keyed by role.
//! A role entry carries either a `hostnames` list or a single `hostname`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file {0} does not exist")]
    Missing(PathBuf),
    #[error("read state file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse state file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A loaded state document.
#[derive(Debug, Clone)]
pub struct StateFile {
    document: Value,
}

impl StateFile {
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let contents = fs::read_to_string(path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => StateError::Missing(path.to_path_buf()),
            _ => StateError::Read {
                path: path.to_path_buf(),
                source,
            },
        })?;
        Self::parse(&contents).map_err(|source| StateError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            document: serde_json::from_str(contents)?,
        })
    }

    fn configuration(&self) -> Option<&Value> {
        self.document.pointer("/outputs/configuration/value")
    }

    /// All hostnames recorded for `role`.
    pub fn hostnames(&self, role: &str) -> Vec<String> {
        let Some(entry) = self.configuration().and_then(|value| value.get(role)) else {
            return Vec::new();
        };
        if let Some(list) = entry.get("hostnames").and_then(Value::as_array) {
            return list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        entry
            .get("hostname")
            .and_then(Value::as_str)
            .map(|name| vec![name.to_string()])
            .unwrap_or_default()
    }

    /// The primary hostname of `role`: the first of `hostnames`, else `hostname`.
    pub fn hostname(&self, role: &str) -> Option<String> {
        self.hostnames(role).into_iter().next()
    }

    /// First address of a single-node deployment (`ipaddrs[0][0]`).
    pub fn single_node_ip(&self) -> Option<String> {
        self.configuration()?
            .pointer("/ipaddrs/0/0")?
            .as_str()
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATE: &str = r#"{
  "version": 4,
  "outputs": {
    "configuration": {
      "value": {
        "controller": { "hostname": "uyuni-master-ctl.mgr.suse.de" },
        "server": { "hostnames": ["uyuni-master-srv.mgr.suse.de", "alias.mgr.suse.de"] },
        "proxy": { "hostnames": [], "hostname": "ignored" },
        "ipaddrs": [["192.168.1.10", "fe80::1"]]
      }
    }
  }
}"#;

    #[test]
    fn looks_up_hostnames() {
        let state = StateFile::parse(STATE).expect("parse");
        assert_eq!(
            state.hostname("controller").as_deref(),
            Some("uyuni-master-ctl.mgr.suse.de")
        );
        assert_eq!(
            state.hostname("server").as_deref(),
            Some("uyuni-master-srv.mgr.suse.de")
        );
        assert_eq!(state.hostnames("server").len(), 2);
        assert_eq!(state.hostname("invalid"), None);
    }

    #[test]
    fn empty_hostnames_list_yields_none() {
        let state = StateFile::parse(STATE).expect("parse");
        assert_eq!(state.hostname("proxy"), None);
    }

    #[test]
    fn single_node_ip() {
        let state = StateFile::parse(STATE).expect("parse");
        assert_eq!(state.single_node_ip().as_deref(), Some("192.168.1.10"));

        let state = StateFile::parse(r#"{"outputs": {}}"#).expect("parse");
        assert_eq!(state.single_node_ip(), None);
        assert_eq!(state.hostname("controller"), None);
    }

    #[test]
    fn missing_file_is_distinguished() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = StateFile::load(&temp.path().join("terraform.tfstate")).unwrap_err();
        assert!(matches!(err, StateError::Missing(_)));

        let path = temp.path().join("broken.tfstate");
        fs::write(&path, "{ not json").expect("write");
        let err = StateFile::load(&path).unwrap_err();
        assert!(matches!(err, StateError::Parse { .. }));
    }
}
