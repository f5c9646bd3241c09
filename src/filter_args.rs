//! Command-line filter expressions
//!
//! `field=value`, `field!=value`, `field~value`, `field!~value`, `field?` and
//! `!field?`. A field may be `a|b` to match any of several properties and
//! values may be comma separated.

use anyhow::{Result, bail};
use logscope_types::{DataSourceFilter, PropertySelector, ScalarValue};

/// Parse one filter expression
pub fn parse_filter(expr: &str) -> Result<DataSourceFilter> {
    let expr = expr.trim();

    if let Some(field) = expr.strip_suffix('?') {
        if !field.contains(['=', '~']) {
            let (field, exists) = match field.strip_prefix('!') {
                Some(field) => (field, false),
                None => (field, true),
            };
            return Ok(DataSourceFilter::Exists {
                selector: parse_selector(field)?,
                exists,
                consider_nulls: true,
            });
        }
    }

    let Some((at, op)) = find_operator(expr) else {
        bail!("Filter '{}' has no operator (expected =, !=, ~, !~ or ?)", expr);
    };

    let (include, exact) = match op {
        "=" => (true, true),
        "!=" => (false, true),
        "~" => (true, false),
        _ => (false, false),
    };

    let values = expr[at + op.len()..]
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ScalarValue::from)
        .collect();

    Ok(DataSourceFilter::Match {
        selector: parse_selector(&expr[..at])?,
        include,
        exact,
        values,
    })
}

/// Parse a breakdown or filter field, `a|b` meaning any of `a` and `b`
pub fn parse_selector(field: &str) -> Result<PropertySelector> {
    let mut paths: Vec<String> = field.split('|').map(|p| p.trim().to_string()).collect();

    if paths.iter().any(String::is_empty) {
        bail!("Empty property name in '{}'", field);
    }

    if paths.len() == 1 {
        Ok(PropertySelector::Single(paths.remove(0)))
    } else {
        Ok(PropertySelector::AnyOf(paths))
    }
}

/// Leftmost operator and its byte offset
fn find_operator(expr: &str) -> Option<(usize, &'static str)> {
    let bytes = expr.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'!' => match bytes.get(i + 1) {
                Some(b'=') => return Some((i, "!=")),
                Some(b'~') => return Some((i, "!~")),
                _ => {}
            },
            b'=' => return Some((i, "=")),
            b'~' => return Some((i, "~")),
            _ => {}
        }
    }
    None
}
