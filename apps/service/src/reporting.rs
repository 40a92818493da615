//! Read-only availability reporting over the interval ledger.
//!
//! Uptime over an arbitrary range is reconstructed purely from closed
//! and open AvailabilityRecord intervals; raw probe history is never
//! needed.

use chrono::{DateTime, Utc};

use crate::database::models::AvailabilityRecord;

/// Uptime percentage over [from, to), computed as the summed online
/// interval duration divided by the range duration.
///
/// Intervals are clamped to the range; an open interval extends to the
/// end of the range. Records must not overlap each other (guaranteed
/// by the reconciler's ledger discipline).
pub fn uptime_percentage(
    records: &[AvailabilityRecord],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> f64 {
    let range_seconds = (to - from).num_seconds();
    if range_seconds <= 0 {
        return 0.0;
    }

    let mut online_seconds = 0i64;
    for record in records {
        if !record.online {
            continue;
        }
        let start = record.started_at.max(from);
        let end = record.ended_at.unwrap_or(to).min(to);
        if end > start {
            online_seconds += (end - start).num_seconds();
        }
    }

    (online_seconds as f64 / range_seconds as f64) * 100.0
}
