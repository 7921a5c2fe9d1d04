//! Default values of `variable` declarations.

use std::collections::BTreeMap;

use super::hcl::{self, ParseError, Value};

/// Map every declared variable with a `default` to that default.
pub fn read_defaults(src: &str) -> Result<BTreeMap<String, Value>, ParseError> {
    let body = hcl::parse_body(src)?;
    let defaults = body
        .blocks("variable")
        .filter_map(|block| {
            let name = block.labels.first()?;
            let default = block.body.attribute("default")?;
            Some((name.clone(), default.clone()))
        })
        .collect();
    Ok(defaults)
}
