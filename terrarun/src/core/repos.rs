//! Injection of additional repositories into template placeholders.
//!
//! A role opts into injection with a comment marker line such as
//! `  // server_additional_repos`. The marker is replaced by an
//! `additional_repos = { ... }` attribute at the same indentation.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use jsonschema::validator_for;
use minijinja::{Environment, context};
use regex::Regex;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use super::hcl;

/// Role name to repository name to repository URL.
pub type RepositoryMap = BTreeMap<String, BTreeMap<String, String>>;

const PLACEHOLDER_SUFFIX: &str = "_additional_repos";

const REPOS_TEMPLATE: &str = "{{ indent }}additional_repos = { \
{%- for entry in entries %} {{ entry.name }} = {{ entry.url }}{% if not loop.last %},{% endif %}{% endfor %} }";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([ \t]*)//[ \t]*([A-Za-z0-9_-]+)_additional_repos[ \t]*\r?\n?$").unwrap()
});

static REPOSITORY_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "type": "object",
        "additionalProperties": {
            "type": "object",
            "additionalProperties": { "type": "string" }
        }
    })
});

/// Result code of an injection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectStatus {
    Success,
    /// Input is not a role -> name -> URL mapping of strings.
    Malformed,
    /// A placeholder occurs more than once.
    Ambiguous,
    /// A placeholder is absent.
    Missing,
}

impl InjectStatus {
    pub fn code(self) -> i32 {
        match self {
            InjectStatus::Success => 0,
            InjectStatus::Malformed => 1,
            InjectStatus::Ambiguous => 2,
            InjectStatus::Missing => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectOutcome {
    /// Rewritten text, or the input unchanged when `status` is not `Success`.
    pub text: String,
    pub status: InjectStatus,
    /// Role that caused a failure.
    pub role: Option<String>,
}

impl InjectOutcome {
    fn unchanged(text: &str, status: InjectStatus, role: Option<&str>) -> Self {
        Self {
            text: text.to_string(),
            status,
            role: role.map(str::to_string),
        }
    }
}

#[derive(Debug, Error)]
#[error("malformed repository mapping: {0}")]
pub struct MalformedRepositories(pub String);

/// Validate and convert a JSON document into a [`RepositoryMap`].
pub fn parse_repositories(value: &Value) -> Result<RepositoryMap, MalformedRepositories> {
    let validator = validator_for(&REPOSITORY_SCHEMA)
        .map_err(|err| MalformedRepositories(format!("invalid schema: {err}")))?;
    let messages: Vec<String> = validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(MalformedRepositories(messages.join("; ")));
    }
    serde_json::from_value(value.clone()).map_err(|err| MalformedRepositories(err.to_string()))
}

/// The marker comment for `role`.
pub fn placeholder(role: &str) -> String {
    format!("//{role}{PLACEHOLDER_SUFFIX}")
}

/// True if `line` is a repository placeholder marker for any role.
pub fn is_placeholder_line(line: &str) -> bool {
    PLACEHOLDER.is_match(line)
}

/// Inject from a raw JSON document, reporting `Malformed` when it does not
/// have the expected shape.
pub fn inject_json(text: &str, repositories: &Value) -> Result<InjectOutcome> {
    match parse_repositories(repositories) {
        Ok(map) => inject(text, &map),
        Err(err) => {
            warn!(error = %err, "repository injection skipped");
            Ok(InjectOutcome::unchanged(text, InjectStatus::Malformed, None))
        }
    }
}

/// Replace the placeholder of every role with a non-empty mapping.
///
/// All placeholders are checked before anything is rewritten, so a failure
/// for one role leaves the whole text untouched.
pub fn inject(text: &str, repositories: &RepositoryMap) -> Result<InjectOutcome> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut sites: BTreeMap<usize, &str> = BTreeMap::new();

    for (role, repos) in repositories {
        if repos.is_empty() {
            debug!(role = %role, "no repositories to inject");
            continue;
        }
        let matches: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| placeholder_role(line) == Some(role.as_str()))
            .map(|(index, _)| index)
            .collect();
        match matches.as_slice() {
            [] => {
                warn!(role = %role, "placeholder {} not found", placeholder(role));
                return Ok(InjectOutcome::unchanged(text, InjectStatus::Missing, Some(role)));
            }
            [index] => {
                sites.insert(*index, role.as_str());
            }
            _ => {
                warn!(role = %role, count = matches.len(), "placeholder is ambiguous");
                return Ok(InjectOutcome::unchanged(text, InjectStatus::Ambiguous, Some(role)));
            }
        }
    }

    let mut env = Environment::new();
    env.add_template("additional_repos", REPOS_TEMPLATE)?;
    let template = env.get_template("additional_repos")?;

    let mut out = String::with_capacity(text.len());
    for (index, line) in lines.iter().enumerate() {
        let Some(role) = sites.get(&index) else {
            out.push_str(line);
            continue;
        };
        let repos = repositories
            .get(*role)
            .ok_or_else(|| anyhow!("no repositories for role {role}"))?;
        let entries: Vec<BTreeMap<&str, String>> = repos
            .iter()
            .map(|(name, url)| BTreeMap::from([("name", hcl::quote(name)), ("url", hcl::quote(url))]))
            .collect();
        let indent = line.len() - line.trim_start_matches([' ', '\t']).len();
        let rendered = template.render(context! {
            indent => &line[..indent],
            entries => entries,
        })?;
        out.push_str(&rendered);
        out.push_str(line_ending(line));
        debug!(role = %role, count = repos.len(), "injected repositories");
    }

    Ok(InjectOutcome {
        text: out,
        status: InjectStatus::Success,
        role: None,
    })
}

fn placeholder_role(line: &str) -> Option<&str> {
    PLACEHOLDER
        .captures(line)
        .and_then(|captures| captures.get(2))
        .map(|m| m.as_str())
}

fn line_ending(line: &str) -> &str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}
