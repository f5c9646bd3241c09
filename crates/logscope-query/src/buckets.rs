//! Bucket catalog and time range elaboration
//!
//! A raw time range is turned into a bucket width picked from a fixed
//! ladder, a start snapped down to that width, and the full list of bucket
//! boundaries. Elaboration is a pure function of its inputs.

use logscope_types::{BucketSpec, ElaboratedTimeRange, TimeRange};

use crate::error::{QueryError, QueryResult};

const SECOND: i64 = 1000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Minimum number of bars a chart should show before we go finer
pub const MIN_BUCKET_COUNT: i64 = 100;

/// Most boundaries one elaboration may produce
pub const MAX_BUCKET_COUNT: i64 = 100_000;

const SUBSECOND_FORMAT: &str = "%H:%M:%S%.3f";
const SECOND_FORMAT: &str = "%H:%M:%S";
const MINUTE_FORMAT: &str = "%H:%M";
const HOUR_FORMAT: &str = "%b %d %H:%M";
const DAY_FORMAT: &str = "%b %d";

/// Ascending bucket ladder; each width is an integer multiple of the previous one
pub static BUCKET_CATALOG: [BucketSpec; 19] = [
    BucketSpec::new("1ms", 1, SUBSECOND_FORMAT),
    BucketSpec::new("5ms", 5, SUBSECOND_FORMAT),
    BucketSpec::new("10ms", 10, SUBSECOND_FORMAT),
    BucketSpec::new("50ms", 50, SUBSECOND_FORMAT),
    BucketSpec::new("100ms", 100, SUBSECOND_FORMAT),
    BucketSpec::new("500ms", 500, SUBSECOND_FORMAT),
    BucketSpec::new("1s", SECOND, SECOND_FORMAT),
    BucketSpec::new("5s", 5 * SECOND, SECOND_FORMAT),
    BucketSpec::new("10s", 10 * SECOND, SECOND_FORMAT),
    BucketSpec::new("30s", 30 * SECOND, SECOND_FORMAT),
    BucketSpec::new("1m", MINUTE, MINUTE_FORMAT),
    BucketSpec::new("5m", 5 * MINUTE, MINUTE_FORMAT),
    BucketSpec::new("10m", 10 * MINUTE, MINUTE_FORMAT),
    BucketSpec::new("30m", 30 * MINUTE, MINUTE_FORMAT),
    BucketSpec::new("1h", HOUR, HOUR_FORMAT),
    BucketSpec::new("3h", 3 * HOUR, HOUR_FORMAT),
    BucketSpec::new("6h", 6 * HOUR, HOUR_FORMAT),
    BucketSpec::new("12h", 12 * HOUR, HOUR_FORMAT),
    BucketSpec::new("1d", DAY, DAY_FORMAT),
];

/// The built-in bucket ladder
pub fn catalog() -> &'static [BucketSpec] {
    &BUCKET_CATALOG
}

/// Validate a bucket ladder: strictly ascending, each width dividing the
/// next, topping out at exactly one day
pub fn check_catalog(catalog: &[BucketSpec]) -> QueryResult<()> {
    let (first, last) = match (catalog.first(), catalog.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(QueryError::BucketSize("bucket catalog is empty".to_string())),
    };

    if first.duration_ms <= 0 {
        return Err(QueryError::BucketSize(format!(
            "bucket {} has non-positive width",
            first.name
        )));
    }

    for pair in catalog.windows(2) {
        let (smaller, larger) = (&pair[0], &pair[1]);
        if larger.duration_ms <= smaller.duration_ms || larger.duration_ms % smaller.duration_ms != 0
        {
            return Err(QueryError::BucketSize(format!(
                "bucket {} is not a larger multiple of {}",
                larger.name, smaller.name
            )));
        }
    }

    if last.duration_ms != DAY {
        return Err(QueryError::BucketSize(format!(
            "largest bucket {} is not one day",
            last.name
        )));
    }

    Ok(())
}

/// Elaborate a range against the built-in catalog
pub fn elaborate(range: TimeRange, min_bucket_ms: Option<i64>) -> QueryResult<ElaboratedTimeRange> {
    elaborate_with(catalog(), range, min_bucket_ms)
}

/// Pick a bucket width for `range`, snap the range to it and list every boundary
pub fn elaborate_with(
    catalog: &[BucketSpec],
    range: TimeRange,
    min_bucket_ms: Option<i64>,
) -> QueryResult<ElaboratedTimeRange> {
    // Boundaries must be non-negative multiples of the width
    if !range.is_valid() || range.start < 0 {
        return Err(QueryError::InvalidTimeRange {
            start: range.start,
            end: range.end,
        });
    }

    let smallest = catalog
        .first()
        .ok_or_else(|| QueryError::BucketSize("bucket catalog is empty".to_string()))?;

    let span = range.span_ms();

    // Coarsest width that still yields enough bars
    let mut spec = catalog
        .iter()
        .rev()
        .find(|spec| span / spec.duration_ms >= MIN_BUCKET_COUNT)
        .unwrap_or(smallest);

    if let Some(min_ms) = min_bucket_ms {
        if spec.duration_ms < min_ms {
            spec = catalog
                .iter()
                .find(|spec| spec.duration_ms >= min_ms)
                .ok_or_else(|| {
                    QueryError::BucketSize(format!("no bucket is at least {min_ms}ms wide"))
                })?;

            if spec.duration_ms > span {
                return Err(QueryError::BucketSize(format!(
                    "bucket {} is wider than the {span}ms range",
                    spec.name
                )));
            }
        }
    }

    let step = spec.duration_ms;
    let start = range.start.div_euclid(step) * step;

    let count = span / step + 2;
    if count > MAX_BUCKET_COUNT {
        return Err(QueryError::BucketSize(format!(
            "{span}ms range needs {count} buckets of {}, limit is {MAX_BUCKET_COUNT}",
            spec.name
        )));
    }

    let mut timestamps = Vec::with_capacity(count as usize);
    let mut boundary = start;
    loop {
        timestamps.push(boundary);
        if boundary >= range.end {
            break;
        }
        boundary = boundary.checked_add(step).ok_or_else(|| {
            QueryError::BucketSize(format!("boundary after {boundary} overflows"))
        })?;
    }

    Ok(ElaboratedTimeRange {
        time_range: TimeRange::new(start, boundary),
        bucket_spec: *spec,
        timestamps,
    })
}
