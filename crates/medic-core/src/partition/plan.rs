use chrono::{DateTime, Duration, TimeZone, Utc};

use super::PartitionDescriptor;

/// Start of the width-aligned slot containing `now`, counted from the Unix
/// epoch.
pub(crate) fn align(now: DateTime<Utc>, width: Duration) -> DateTime<Utc> {
    let w = width.num_seconds().max(1);
    let start = now.timestamp().div_euclid(w) * w;
    Utc.timestamp_opt(start, 0).single().unwrap_or(now)
}

/// Ranges that must be created so coverage extends past
/// `now + max(lookahead, width)`.
///
/// Coverage is measured by range: the new ranges continue contiguously from
/// the latest existing `range_end`, or start at `align(now)` for an empty
/// table. Re-running with the result applied yields nothing.
pub(crate) fn missing_ranges(
    existing: &[PartitionDescriptor],
    width: Duration,
    lookahead: Duration,
    now: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    if width <= Duration::zero() {
        return Vec::new();
    }
    let horizon = now + lookahead.max(width);
    let mut cursor = existing
        .iter()
        .map(|p| p.range_end)
        .max()
        .unwrap_or_else(|| align(now, width));

    let mut out = Vec::new();
    while cursor <= horizon {
        out.push((cursor, cursor + width));
        cursor += width;
    }
    out
}
