//! Terminal output for server messages

use std::io::Write;

use anyhow::Result;
use clap::ValueEnum;
use logscope_types::{ElaboratedTimeRange, HistogramSeries, LogEntry, QueryStatistics, ServerMessage};

/// Width of the longest histogram bar
const BAR_WIDTH: u64 = 50;

/// How results are printed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable entries and an ASCII histogram
    #[default]
    Text,
    /// One JSON object per message
    Json,
}

/// Write one message in the chosen format
pub fn render(message: &ServerMessage, format: OutputFormat, out: &mut impl Write) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, message)?;
            writeln!(out)?;
        }
        OutputFormat::Text => match message {
            ServerMessage::SendEntries { entries, stats } => {
                render_entries(entries, stats.as_ref(), out)?
            }
            // Partial histograms are only interesting to live views
            ServerMessage::SendHistogram {
                elaborated_time_range,
                histogram,
                done: true,
                ..
            } => render_histogram(elaborated_time_range, histogram, out)?,
            ServerMessage::SendHistogram { .. } | ServerMessage::DoneLoadingEntries { .. } => {}
        },
    }
    out.flush()?;
    Ok(())
}

fn render_entries(
    entries: &[LogEntry],
    stats: Option<&QueryStatistics>,
    out: &mut impl Write,
) -> Result<()> {
    for entry in entries {
        writeln!(
            out,
            "{} {:<3} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            entry.level().as_str(),
            entry.message()
        )?;
    }

    match stats {
        Some(stats) => writeln!(
            out,
            "-- {} entries ({} matched, {} scanned)",
            entries.len(),
            stats.records_matched,
            stats.records_scanned
        )?,
        None => writeln!(out, "-- {} entries", entries.len())?,
    }
    Ok(())
}

fn render_histogram(
    elaborated: &ElaboratedTimeRange,
    histogram: &[HistogramSeries],
    out: &mut impl Write,
) -> Result<()> {
    let totals = bucket_totals(elaborated.bucket_count(), histogram);
    let max = totals.iter().copied().max().unwrap_or(0);

    writeln!(
        out,
        "-- histogram: {} buckets of {}",
        totals.len(),
        elaborated.bucket_spec.name
    )?;

    for (timestamp, total) in elaborated.timestamps.iter().zip(&totals) {
        writeln!(
            out,
            "{:>15} {:<width$} {}",
            elaborated.bucket_spec.format_timestamp(*timestamp),
            "#".repeat(bar_len(*total, max)),
            total,
            width = BAR_WIDTH as usize
        )?;
    }

    if histogram.iter().any(|series| series.breakdown.is_some()) {
        for series in histogram {
            let label = series.breakdown.as_deref().unwrap_or("(none)");
            writeln!(out, "   {}: {}", label, series.total())?;
        }
    }
    Ok(())
}

/// Per-bucket sum across all series
fn bucket_totals(buckets: usize, histogram: &[HistogramSeries]) -> Vec<u64> {
    let mut totals = vec![0; buckets];
    for series in histogram {
        for (total, count) in totals.iter_mut().zip(&series.counts) {
            *total += count.unwrap_or(0);
        }
    }
    totals
}

fn bar_len(count: u64, max: u64) -> usize {
    if count == 0 || max == 0 {
        return 0;
    }
    (count * BAR_WIDTH / max).max(1) as usize
}
