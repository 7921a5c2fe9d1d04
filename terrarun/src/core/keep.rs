//! Resolution of the set of roles that survive pruning.

use std::collections::BTreeSet;

use tracing::info;

/// Role name fragments that are never kept unless explicitly requested.
pub const ALWAYS_EXCLUDED: [&str; 2] = ["minion", "client"];

/// Additional fragments excluded when everything optional is being deleted.
pub const DELETE_ALL_EXCLUDED: [&str; 5] = [
    "terminal",
    "buildhost",
    "proxy",
    "dhcp_dns",
    "monitoring_server",
];

/// True if `name` is kept by default under the exclusion policy.
///
/// Exclusion is by substring, so `proxy` also excludes `proxy_containerized`.
pub fn kept_by_default(name: &str, delete_all: bool) -> bool {
    let excluded = |fragment: &&str| name.contains(*fragment);
    if ALWAYS_EXCLUDED.iter().any(excluded) {
        return false;
    }
    !(delete_all && DELETE_ALL_EXCLUDED.iter().any(excluded))
}

/// Names from `declared` that survive the default exclusion policy.
pub fn default_keep<'a, I>(declared: I, delete_all: bool) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    declared
        .into_iter()
        .filter(|name| kept_by_default(name, delete_all))
        .map(str::to_string)
        .collect()
}

/// Resolve the final keep-set: default survivors plus explicit requests.
pub fn resolve<'a, I>(explicit_keep: &BTreeSet<String>, delete_all: bool, declared: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let defaults = default_keep(declared, delete_all);
    info!(?defaults, delete_all, "default resources to keep");
    let resolved: BTreeSet<String> = defaults.union(explicit_keep).cloned().collect();
    info!(?resolved, "resources to keep");
    resolved
}
