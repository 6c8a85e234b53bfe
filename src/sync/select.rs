use chrono::{DateTime, Duration, Utc};

/// Timestamps of a layer that still need fetching, oldest first.
///
/// Anything at or before `last_synced` is done already; anything older than
/// `now - max_age` is out of the retention window. A window reaching past the
/// earliest representable instant means no cutoff.
pub fn select_pending(
    available: &[DateTime<Utc>],
    last_synced: Option<DateTime<Utc>>,
    max_age: Option<Duration>,
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let cutoff = max_age.and_then(|age| now.checked_sub_signed(age));
    let mut pending: Vec<_> = available
        .iter()
        .copied()
        .filter(|t| last_synced.map_or(true, |w| *t > w))
        .filter(|t| cutoff.map_or(true, |c| *t >= c))
        .collect();
    pending.sort();
    pending.dedup();
    pending
}
