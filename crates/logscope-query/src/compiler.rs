//! Query compiler
//!
//! Translates structured queries into the backend's line-oriented query
//! language:
//!
//! ```text
//! fields @timestamp, @message, @ptr
//! | filter severity = "ERROR"
//! | sort @timestamp desc
//! | limit 5000
//! ```

use logscope_types::{
    BucketSpec, DataSourceFilter, DataSourceQuery, PropertySelector, ScalarValue,
};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};

/// Row cap for entry fetches
pub const FETCH_RESULT_LIMIT: u32 = 5000;

/// Row cap for histograms; rows are buckets, not log lines
pub const HISTOGRAM_RESULT_LIMIT: u32 = 10_000;

pub(crate) const TIMESTAMP_FIELD: &str = "@timestamp";
pub(crate) const MESSAGE_FIELD: &str = "@message";
pub(crate) const POINTER_FIELD: &str = "@ptr";
pub(crate) const BUCKET_FIELD: &str = "bucket";
pub(crate) const COUNT_FIELD: &str = "count";
pub(crate) const BREAKDOWN_FIELD: &str = "breakdown";

const DURATION_UNITS: [(&str, i64); 4] = [
    ("h", 60 * 60 * 1000),
    ("m", 60 * 1000),
    ("s", 1000),
    ("ms", 1),
];

/// Compile a query; `bucket` sets the histogram bin width
pub fn compile(query: &DataSourceQuery, bucket: &BucketSpec) -> QueryResult<String> {
    let mut lines = Vec::new();

    match query {
        DataSourceQuery::FetchEntries { filters } => {
            lines.push(format!(
                "fields {TIMESTAMP_FIELD}, {MESSAGE_FIELD}, {POINTER_FIELD}"
            ));
            push_filters(&mut lines, filters)?;
            lines.push(format!("| sort {TIMESTAMP_FIELD} desc"));
            lines.push(format!("| limit {FETCH_RESULT_LIMIT}"));
        }
        DataSourceQuery::BuildHistogram {
            filters, breakdown, ..
        } => {
            let bin = duration_literal(bucket.duration_ms)?;
            match breakdown {
                Some(selector) => {
                    lines.push(format!(
                        "fields {TIMESTAMP_FIELD}, {} as {BREAKDOWN_FIELD}",
                        breakdown_expr(selector)?
                    ));
                    push_filters(&mut lines, filters)?;
                    lines.push(format!(
                        "| stats count(*) as {COUNT_FIELD} by bin({bin}) as {BUCKET_FIELD}, {BREAKDOWN_FIELD}"
                    ));
                }
                None => {
                    lines.push(format!("fields {TIMESTAMP_FIELD}"));
                    push_filters(&mut lines, filters)?;
                    lines.push(format!(
                        "| stats count(*) as {COUNT_FIELD} by bin({bin}) as {BUCKET_FIELD}"
                    ));
                }
            }
            lines.push(format!("| limit {HISTOGRAM_RESULT_LIMIT}"));
        }
    }

    Ok(lines.join("\n"))
}

/// Row cap the backend should apply for this query kind
pub fn result_limit(query: &DataSourceQuery) -> u32 {
    match query {
        DataSourceQuery::FetchEntries { .. } => FETCH_RESULT_LIMIT,
        DataSourceQuery::BuildHistogram { .. } => HISTOGRAM_RESULT_LIMIT,
    }
}

/// Duration literal in the largest of h/m/s/ms that divides the width evenly
pub fn duration_literal(duration_ms: i64) -> QueryResult<String> {
    if duration_ms <= 0 {
        return Err(QueryError::NonIntegralDuration(duration_ms));
    }

    DURATION_UNITS
        .iter()
        .find(|(_, unit_ms)| duration_ms % unit_ms == 0)
        .map(|(unit, unit_ms)| format!("{}{unit}", duration_ms / unit_ms))
        .ok_or(QueryError::NonIntegralDuration(duration_ms))
}

fn push_filters(lines: &mut Vec<String>, filters: &[DataSourceFilter]) -> QueryResult<()> {
    for filter in filters {
        if let Some(expr) = filter_expr(filter)? {
            lines.push(format!("| filter {expr}"));
        }
    }
    Ok(())
}

/// Boolean expression for one filter, `None` if it constrains nothing
fn filter_expr(filter: &DataSourceFilter) -> QueryResult<Option<String>> {
    match filter {
        DataSourceFilter::Match {
            selector,
            include,
            exact,
            values,
        } => {
            let mut terms = Vec::with_capacity(selector.paths().len() * values.len());
            for path in selector.paths() {
                let field = field_ref(path)?;
                for value in values {
                    terms.push(comparison(&field, value, *include, *exact));
                }
            }

            if terms.is_empty() {
                return Ok(None);
            }

            let joiner = if *include { " or " } else { " and " };
            Ok(Some(terms.join(joiner)))
        }
        DataSourceFilter::Exists {
            selector,
            exists,
            consider_nulls,
        } => {
            if !consider_nulls {
                return Err(QueryError::UnsupportedFilter(format!(
                    "presence test on {} must treat null as absent",
                    selector.paths().join("|")
                )));
            }

            let terms = selector
                .paths()
                .iter()
                .map(|path| -> QueryResult<String> {
                    let field = field_ref(path)?;
                    Ok(if *exists {
                        format!("ispresent({field})")
                    } else {
                        format!("not ispresent({field})")
                    })
                })
                .collect::<QueryResult<Vec<_>>>()?;

            if terms.is_empty() {
                return Ok(None);
            }

            let joiner = if *exists { " or " } else { " and " };
            Ok(Some(terms.join(joiner)))
        }
    }
}

fn comparison(field: &str, value: &ScalarValue, include: bool, exact: bool) -> String {
    match value {
        ScalarValue::String(s) if !exact => {
            let op = if include { "like" } else { "not like" };
            format!("{field} {op} {}", substring_pattern(s))
        }
        _ => {
            let op = if include { "=" } else { "!=" };
            format!("{field} {op} {}", literal(value))
        }
    }
}

fn literal(value: &ScalarValue) -> String {
    match value {
        ScalarValue::String(s) => Value::String(s.clone()).to_string(),
        ScalarValue::Number(n) => n.to_string(),
        ScalarValue::Bool(b) => b.to_string(),
    }
}

/// Case-insensitive regex literal matching `s` anywhere
fn substring_pattern(s: &str) -> String {
    let escaped = regex::escape(s).replace('/', "\\/");
    format!("/(?i){escaped}/")
}

fn breakdown_expr(selector: &PropertySelector) -> QueryResult<String> {
    let fields = selector
        .paths()
        .iter()
        .map(|path| field_ref(path))
        .collect::<QueryResult<Vec<_>>>()?;

    match fields.as_slice() {
        [] => Err(QueryError::UnsupportedFilter(
            "breakdown selector has no properties".to_string(),
        )),
        [single] => Ok(single.clone()),
        many => Ok(format!("coalesce({})", many.join(", "))),
    }
}

/// Field reference; anything beyond plain identifiers gets backticks
fn field_ref(path: &str) -> QueryResult<String> {
    if path.is_empty() {
        return Err(QueryError::UnsupportedFilter(
            "empty property path".to_string(),
        ));
    }

    let plain = path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '.'));

    if plain {
        Ok(path.to_string())
    } else {
        Ok(format!("`{}`", path.replace('`', "\\`")))
    }
}
