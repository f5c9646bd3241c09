//! Command-line arguments

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, TimeDelta, Utc};
use clap::Parser;
use logscope_types::{DataSourceQuery, TimeRange};

use crate::filter_args::{parse_filter, parse_selector};
use crate::render::OutputFormat;

/// Window searched when neither --since nor --start/--end is given
const DEFAULT_SINCE: &str = "1h";

/// Logscope - search log groups and chart them over time
#[derive(Parser, Debug)]
#[command(name = "logscope")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file (defaults to <config dir>/logscope/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log group to search; repeat for several
    #[arg(long = "log-group", value_name = "GROUP")]
    pub log_groups: Vec<String>,

    /// Search the trailing window, e.g. 30s, 15m, 1h, 2d
    #[arg(long, value_name = "DURATION", conflicts_with_all = ["start", "end"])]
    pub since: Option<String>,

    /// Window start (RFC 3339 or epoch milliseconds)
    #[arg(long, value_name = "TIME", requires = "end")]
    pub start: Option<String>,

    /// Window end (RFC 3339 or epoch milliseconds)
    #[arg(long, value_name = "TIME", requires = "start")]
    pub end: Option<String>,

    /// Filter expression: field=v, field!=v, field~v, field!~v, field?, !field?
    #[arg(long = "filter", value_name = "EXPR")]
    pub filters: Vec<String>,

    /// Skip fetching log entries
    #[arg(long)]
    pub no_entries: bool,

    /// Build a histogram of matching entries
    #[arg(long)]
    pub histogram: bool,

    /// Split the histogram by this field (implies --histogram)
    #[arg(long, value_name = "FIELD")]
    pub breakdown: Option<String>,

    /// Base poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Serve JSON requests from stdin, one per line, and write JSON messages to stdout
    #[arg(long, conflicts_with_all = ["since", "start", "end", "filters", "histogram", "breakdown"])]
    pub stdio: bool,
}

impl Args {
    /// Window to search, relative to `now` unless given explicitly
    pub fn time_range(&self, now: DateTime<Utc>) -> Result<TimeRange> {
        if let (Some(start), Some(end)) = (&self.start, &self.end) {
            let range = TimeRange::between(parse_instant(start)?, parse_instant(end)?);
            if !range.is_valid() {
                bail!("--start {} is after --end {}", start, end);
            }
            return Ok(range);
        }

        let since = parse_duration(self.since.as_deref().unwrap_or(DEFAULT_SINCE))?;
        Ok(TimeRange::between(now - since, now))
    }

    /// Queries requested on the command line
    pub fn queries(&self) -> Result<Vec<DataSourceQuery>> {
        let filters = self
            .filters
            .iter()
            .map(|expr| parse_filter(expr))
            .collect::<Result<Vec<_>>>()?;

        let mut queries = Vec::new();

        if !self.no_entries {
            queries.push(DataSourceQuery::FetchEntries {
                filters: filters.clone(),
            });
        }

        if self.histogram || self.breakdown.is_some() {
            let breakdown = self.breakdown.as_deref().map(parse_selector).transpose()?;
            queries.push(DataSourceQuery::BuildHistogram {
                filters,
                breakdown,
                saved_search_id: None,
            });
        }

        if queries.is_empty() {
            bail!("Nothing to do: --no-entries needs --histogram or --breakdown");
        }
        Ok(queries)
    }
}

/// `<n><unit>` with unit one of s, m, h, d
pub fn parse_duration(raw: &str) -> Result<TimeDelta> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .with_context(|| format!("Duration '{}' has no unit (s, m, h or d)", raw))?;
    let (amount, unit) = raw.split_at(split);

    let amount: i64 = amount
        .parse()
        .with_context(|| format!("Invalid duration '{}'", raw))?;

    let delta = match unit {
        "s" => TimeDelta::try_seconds(amount),
        "m" => TimeDelta::try_minutes(amount),
        "h" => TimeDelta::try_hours(amount),
        "d" => TimeDelta::try_days(amount),
        _ => bail!("Unknown duration unit '{}' in '{}'", unit, raw),
    };
    delta.with_context(|| format!("Duration '{}' is out of range", raw))
}

/// RFC 3339 timestamp or epoch milliseconds
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .with_context(|| format!("Invalid time '{}' (expected RFC 3339 or epoch ms)", raw))
}
