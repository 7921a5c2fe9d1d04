//! Line filter for blocks that aggregate other modules' outputs.
//!
//! The aggregator (`controller`) and top-level `output` blocks reference each
//! role through a `configuration` attribute. Once a role is pruned those lines
//! would dangle, so they are dropped here; every other line is kept.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::template::AGGREGATOR;

/// Lines carrying this marker are temporary annotations and never survive.
pub const WORKAROUND_MARKER: &str = "WORKAROUND";

const CONFIGURATION: &str = "configuration";
const CONTAINERIZED_SUFFIX: &str = "_containerized";

static OUTPUT_DECLARATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*output\s+"[^"]*"\s*\{"#).unwrap());

/// Filter `body` line by line, keeping only references to kept roles.
pub fn filter(body: &str, keep: &BTreeSet<String>) -> String {
    let expanded = expand_keep_set(keep);
    body.split_inclusive('\n')
        .filter(|line| retains_line(line, &expanded))
        .collect()
}

/// Add the aggregator and the `<role>_configuration` tokens of every kept role.
///
/// A containerized role also contributes the tokens of its base role, so
/// `server_configuration = module.server_containerized.configuration` stays
/// when `server_containerized` is kept.
pub fn expand_keep_set(keep: &BTreeSet<String>) -> BTreeSet<String> {
    let mut expanded = keep.clone();
    expanded.insert(AGGREGATOR.to_string());
    let roles: Vec<String> = expanded.iter().cloned().collect();
    for role in &roles {
        let mut bases = vec![role.as_str()];
        if let Some(base) = role.strip_suffix(CONTAINERIZED_SUFFIX) {
            bases.push(base);
        }
        for base in bases {
            expanded.insert(format!("{base}_{CONFIGURATION}"));
            expanded.insert(format!("{}_{CONFIGURATION}", base.replace('-', "_")));
        }
    }
    expanded
}

/// Decide whether a single line survives, given an expanded keep-set.
pub fn retains_line(line: &str, expanded: &BTreeSet<String>) -> bool {
    if line.contains(WORKAROUND_MARKER) {
        return false;
    }
    if OUTPUT_DECLARATION.is_match(line) || !line.contains(CONFIGURATION) {
        return true;
    }
    references_kept_role(line, expanded)
}

fn references_kept_role(line: &str, expanded: &BTreeSet<String>) -> bool {
    if leading_token(line).is_some_and(|token| expanded.contains(token)) {
        return true;
    }
    // Interior segments of a dotted traversal: `module.<role>.configuration`.
    let segments: Vec<&str> = line.split('.').collect();
    segments.len() > 2
        && segments[1..segments.len() - 1]
            .iter()
            .any(|segment| expanded.contains(*segment))
}

fn leading_token(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let end = trimmed
        .find(|c: char| c == '=' || c.is_whitespace())
        .unwrap_or(trimmed.len());
    let token = &trimmed[..end];
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn drops_configuration_lines_of_removed_roles() {
        let controller = r#"module "controller" {
  source = "./modules/controller"
  server_configuration = module.server.configuration
  proxy_configuration  = module.proxy.configuration
  sle15sp5_minion_configuration = module.sles15sp5-minion.configuration
  rocky8_minion_configuration    = module.rocky8-minion.configuration
  # WORKAROUND until the proxy image is fixed
}
"#;
        let expected = r#"module "controller" {
  source = "./modules/controller"
  server_configuration = module.server.configuration
  proxy_configuration  = module.proxy.configuration
  rocky8_minion_configuration    = module.rocky8-minion.configuration
}
"#;
        let keep = set(&["rocky8-minion", "server", "proxy"]);
        assert_eq!(filter(controller, &keep), expected);
    }

    #[test]
    fn role_prefix_does_not_match_longer_role() {
        let expanded = expand_keep_set(&set(&["server"]));
        assert!(retains_line(
            "  server_configuration = module.server.configuration\n",
            &expanded
        ));
        assert!(!retains_line(
            "  server_containerized_configuration = module.server_containerized.configuration\n",
            &expanded
        ));
        assert!(!retains_line(
            "  proxy_configuration = module.proxy.configuration\n",
            &expanded
        ));
    }

    #[test]
    fn containerized_role_keeps_base_configuration_token() {
        let expanded = expand_keep_set(&set(&["server_containerized"]));
        assert!(retains_line(
            "  server_configuration = module.server_containerized.configuration\n",
            &expanded
        ));
        assert!(expanded.contains("server_configuration"));
        assert!(!expanded.contains("server"));
    }

    #[test]
    fn output_declarations_and_plain_lines_survive() {
        let expanded = expand_keep_set(&BTreeSet::new());
        assert!(retains_line("output \"configuration\" {\n", &expanded));
        assert!(retains_line("  value = {\n", &expanded));
        assert!(retains_line(
            "    controller = module.controller.configuration\n",
            &expanded
        ));
        assert!(!retains_line(
            "    server = module.server.configuration\n",
            &expanded
        ));
    }

    #[test]
    fn workaround_lines_always_dropped() {
        let expanded = expand_keep_set(&set(&["server"]));
        assert!(!retains_line(
            "  server_configuration = module.server.configuration // WORKAROUND\n",
            &expanded
        ));
    }

    #[test]
    fn filtering_twice_changes_nothing() {
        let body = "module \"controller\" {\n  a_configuration = module.a.configuration\n  b_configuration = module.b.configuration\n}\n";
        let keep = set(&["a"]);
        let once = filter(body, &keep);
        assert_eq!(filter(&once, &keep), once);
        assert!(!once.contains("module.b."));
    }
}
