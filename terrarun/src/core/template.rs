//! Segment-level pruning of the main template.
//!
//! The template is modelled as a flat sequence of top-level segments. A
//! segment starts at a top-level block declaration line and runs up to the
//! next one, so every edit is either the removal of a whole segment or a
//! line filter inside a single segment. Nothing is ever substituted across
//! segment boundaries.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use super::references;
use super::repos::is_placeholder_line;

/// Name of the module that aggregates every role's outputs.
pub const AGGREGATOR: &str = "controller";

const COMMENT_MARKER: &str = "//";

static BLOCK_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^[ \t]*([A-Za-z_][A-Za-z0-9_-]*)((?:[ \t]+(?:"[^"]*"|[A-Za-z_][A-Za-z0-9_-]*))*)[ \t]*\{"#,
    )
    .unwrap()
});

static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// Text before the first top-level block.
    Header,
    Module { name: String },
    Output,
    /// Any other top-level block (`terraform`, `provider`, `locals`, ...).
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    pub kind: SegmentKind,
    pub text: &'a str,
}

/// Split `text` into top-level segments.
///
/// Brace depth is tracked outside strings, comments and heredocs, so nested
/// blocks and braces inside values never start a new segment.
pub fn split(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut scanner = DepthScanner::default();
    let mut start = 0;
    let mut kind = SegmentKind::Header;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if scanner.at_top_level()
            && let Some(next_kind) = block_kind(line)
        {
            if offset > start || kind != SegmentKind::Header {
                segments.push(Segment {
                    kind,
                    text: &text[start..offset],
                });
            }
            start = offset;
            kind = next_kind;
        }
        scanner.scan_line(line);
        offset += line.len();
    }

    if offset > start || kind != SegmentKind::Header {
        segments.push(Segment {
            kind,
            text: &text[start..offset],
        });
    }
    segments
}

/// Names of all modules declared in `text`, in order.
pub fn module_names(text: &str) -> Vec<String> {
    split(&strip_comments(text))
        .into_iter()
        .filter_map(|segment| match segment.kind {
            SegmentKind::Module { name } => Some(name),
            _ => None,
        })
        .collect()
}

/// Modules that other modules depend on structurally and are never pruned.
pub fn is_structural(name: &str) -> bool {
    name == AGGREGATOR || name == "base" || name.starts_with("base_") || name.starts_with("base-")
}

/// Remove full-line `//` comments. Repository placeholders are kept.
pub fn strip_comments(text: &str) -> String {
    text.split_inclusive('\n')
        .filter(|line| {
            !line.trim_start().starts_with(COMMENT_MARKER) || is_placeholder_line(line)
        })
        .collect()
}

/// Remove every module outside `keep` and filter dangling references.
///
/// The aggregator and top-level `output` blocks are never removed; their
/// `configuration` lines are filtered down to the surviving modules instead.
/// Applying `prune` twice with the same keep-set yields the same text.
pub fn prune(text: &str, keep: &BTreeSet<String>) -> String {
    let stripped = strip_comments(text);
    let segments = split(&stripped);

    let mut survivors = keep.clone();
    for segment in &segments {
        if let SegmentKind::Module { name } = &segment.kind
            && is_structural(name)
        {
            survivors.insert(name.clone());
        }
    }

    let mut out = String::with_capacity(stripped.len());
    for segment in &segments {
        match &segment.kind {
            SegmentKind::Module { name } if name == AGGREGATOR => {
                out.push_str(&references::filter(segment.text, &survivors));
            }
            SegmentKind::Module { name } if survivors.contains(name) => {
                debug!(module = %name, "keeping module");
                out.push_str(segment.text);
            }
            SegmentKind::Module { name } => {
                info!(module = %name, "removing module");
            }
            SegmentKind::Output => out.push_str(&references::filter(segment.text, &survivors)),
            SegmentKind::Header | SegmentKind::Other => out.push_str(segment.text),
        }
    }
    collapse_blank_lines(&out)
}

/// Collapse runs of two or more blank lines into a single blank line.
pub fn collapse_blank_lines(text: &str) -> String {
    BLANK_RUN.replace_all(text, "\n\n").into_owned()
}

fn block_kind(line: &str) -> Option<SegmentKind> {
    let captures = BLOCK_OPENER.captures(line)?;
    let keyword = captures.get(1)?.as_str();
    let labels = captures.get(2).map_or("", |m| m.as_str());
    let kind = match keyword {
        "module" => match labels.split_whitespace().next() {
            Some(label) => SegmentKind::Module {
                name: label.trim_matches('"').to_string(),
            },
            None => SegmentKind::Other,
        },
        "output" => SegmentKind::Output,
        _ => SegmentKind::Other,
    };
    Some(kind)
}

/// Tracks brace depth line by line, ignoring strings, comments and heredocs.
#[derive(Debug, Default)]
struct DepthScanner {
    depth: usize,
    in_block_comment: bool,
    heredoc: Option<String>,
}

impl DepthScanner {
    fn at_top_level(&self) -> bool {
        self.depth == 0 && !self.in_block_comment && self.heredoc.is_none()
    }

    fn scan_line(&mut self, line: &str) {
        if let Some(tag) = &self.heredoc {
            if line.trim() == tag {
                self.heredoc = None;
            }
            return;
        }

        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();
            if self.in_block_comment {
                if c == '*' && next == Some('/') {
                    self.in_block_comment = false;
                    i += 1;
                }
                i += 1;
                continue;
            }
            match c {
                '"' => i = skip_string(&chars, i + 1),
                '#' => break,
                '/' if next == Some('/') => break,
                '/' if next == Some('*') => {
                    self.in_block_comment = true;
                    i += 1;
                }
                '<' if next == Some('<') => {
                    let rest: String = chars[i + 2..].iter().collect();
                    let tag: String = rest
                        .trim_start_matches('-')
                        .chars()
                        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                        .collect();
                    if !tag.is_empty() {
                        self.heredoc = Some(tag);
                        return;
                    }
                    i += 1;
                }
                '{' => self.depth += 1,
                '}' => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }
            i += 1;
        }
    }
}

/// Return the index just past the closing quote of a string starting at `i`.
fn skip_string(chars: &[char], mut i: usize) -> usize {
    let mut interpolation = 0usize;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '$' if interpolation == 0 && chars.get(i + 1) == Some(&'{') => {
                interpolation = 1;
                i += 1;
            }
            '{' if interpolation > 0 => interpolation += 1,
            '}' if interpolation > 0 => interpolation -= 1,
            '"' if interpolation > 0 => i = skip_string(chars, i + 1),
            '"' => return i,
            _ => {}
        }
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"terraform {
  required_version = ">= 1.0"
}

// WORKAROUND: pin the provider until the next release
module "base" {
  source = "./modules/base"
  images = ["sles15sp5o", "rockylinux8"]
}

module "server" {
  source             = "./modules/server"
  base_configuration = module.base.configuration
  name               = "server"
  // server_additional_repos
}

module "proxy" {
  source             = "./modules/proxy"
  base_configuration = module.base.configuration
  server_configuration = module.server.configuration
}

module "sles15sp5-minion" {
  source = "./modules/minion"
  base_configuration = module.base.configuration
  additional_grains = { "role" = "{minion}" }
}

module "rocky8-minion" {
  source = "./modules/minion"
  base_configuration = module.base.configuration
  user_data = <<EOF
#cloud-config
write_files: [{ path: "/tmp/x" }]
EOF
}

module "controller" {
  source = "./modules/controller"
  base_configuration = module.base.configuration
  server_configuration = module.server.configuration
  proxy_configuration  = module.proxy.configuration
  sles15_minion_configuration = module.sles15sp5-minion.configuration
  rocky8_minion_configuration = module.rocky8-minion.configuration
  # WORKAROUND for minion bootstrap
}

output "configuration" {
  value = {
    controller = module.controller.configuration
    server = module.server.configuration
    sles15sp5-minion = module.sles15sp5-minion.configuration
  }
}
"#;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn split_recognizes_top_level_blocks_only() {
        let kinds: Vec<SegmentKind> = split(TEMPLATE).into_iter().map(|s| s.kind).collect();
        let module = |name: &str| SegmentKind::Module {
            name: name.to_string(),
        };
        assert_eq!(
            kinds,
            vec![
                SegmentKind::Other,
                module("base"),
                module("server"),
                module("proxy"),
                module("sles15sp5-minion"),
                module("rocky8-minion"),
                module("controller"),
                SegmentKind::Output,
            ]
        );
    }

    #[test]
    fn split_reassembles_to_original_text() {
        let joined: String = split(TEMPLATE).iter().map(|s| s.text).collect();
        assert_eq!(joined, TEMPLATE);
    }

    #[test]
    fn module_names_bind_on_declaration_token() {
        assert_eq!(
            module_names(TEMPLATE),
            vec![
                "base",
                "server",
                "proxy",
                "sles15sp5-minion",
                "rocky8-minion",
                "controller"
            ]
        );
    }

    #[test]
    fn server_only_keep_set_drops_minions_and_their_references() {
        let pruned = prune(TEMPLATE, &set(&["server"]));
        let names = module_names(&pruned);
        assert_eq!(names, vec!["base", "server", "controller"]);
        assert!(pruned.contains("server_configuration = module.server.configuration"));
        assert!(!pruned.contains("_minion_configuration"));
        assert!(!pruned.contains("proxy_configuration"));
        assert!(!pruned.contains("WORKAROUND"));
        assert!(pruned.contains("output \"configuration\" {"));
        assert!(pruned.contains("controller = module.controller.configuration"));
        assert!(!pruned.contains("sles15sp5-minion = module"));
        assert!(pruned.contains("// server_additional_repos"));
    }

    #[test]
    fn keeps_explicit_minion_and_its_controller_line() {
        let pruned = prune(TEMPLATE, &set(&["server", "proxy", "rocky8-minion"]));
        assert_eq!(
            module_names(&pruned),
            vec!["base", "server", "proxy", "rocky8-minion", "controller"]
        );
        assert!(pruned.contains("rocky8_minion_configuration = module.rocky8-minion.configuration"));
        assert!(!pruned.contains("sles15_minion_configuration"));
        assert!(pruned.contains("write_files: [{ path: \"/tmp/x\" }]"));
    }

    #[test]
    fn prune_is_idempotent() {
        for keep in [
            set(&["server"]),
            set(&["server", "proxy", "rocky8-minion"]),
            set(&[]),
            set(&["sles15sp5-minion", "rocky8-minion", "server", "proxy"]),
        ] {
            let once = prune(TEMPLATE, &keep);
            assert_eq!(prune(&once, &keep), once, "keep-set {keep:?}");
        }
    }

    #[test]
    fn prune_collapses_blank_lines_left_by_removed_modules() {
        let pruned = prune(TEMPLATE, &set(&["server"]));
        assert!(!pruned.contains("\n\n\n"));
    }

    #[test]
    fn substring_names_do_not_collide() {
        let text = "module \"minion\" {\n  a = 1\n}\n\nmodule \"sles-minion\" {\n  b = 2\n}\n";
        let pruned = prune(text, &set(&["minion"]));
        assert_eq!(module_names(&pruned), vec!["minion"]);
        assert!(pruned.contains("a = 1"));
        assert!(!pruned.contains("b = 2"));
    }

    #[test]
    fn braces_in_strings_and_comments_do_not_shift_segments() {
        let text = "module \"a\" {\n  x = \"}\" # }\n  y = \"${lookup(var.m, \"k\", \"}\")}\"\n  /* { */\n}\nmodule \"b\" {\n}\n";
        let names: Vec<String> = split(text)
            .into_iter()
            .filter_map(|s| match s.kind {
                SegmentKind::Module { name } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
