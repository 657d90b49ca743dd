//! Schedule arithmetic for destination queues.
//!
//! Pure functions over in-memory slot lists. The distribution service loads
//! a destination's active items, runs these, and writes the times back in
//! one transaction.

use chrono::{DateTime, Duration, Utc};
use fanout_common::config::DistributionConfig;
use fanout_common::{AppError, AppResult};

/// Spacing rules for one deployment.
#[derive(Debug, Clone, Copy)]
pub struct SpacingPolicy {
    /// Interval for rules without a rate limit.
    pub default_interval: Duration,
    /// Gap kept before a manually pinned item.
    pub manual_gap: Duration,
}

impl SpacingPolicy {
    /// Build from configuration.
    #[must_use]
    pub fn from_config(config: &DistributionConfig) -> Self {
        Self {
            default_interval: seconds_saturating(config.default_min_interval_secs),
            manual_gap: seconds_saturating(config.manual_min_gap_secs),
        }
    }

    /// Minimum spacing between two deliveries of a rule to one destination.
    ///
    /// `time_window / rate_limit` when both are set, the default floor
    /// otherwise. Non-positive values are a malformed rule.
    pub fn rule_interval(
        &self,
        rate_limit: Option<i32>,
        time_window: Option<i32>,
    ) -> AppResult<Duration> {
        match (rate_limit, time_window) {
            (Some(limit), Some(window)) => {
                if limit <= 0 || window <= 0 {
                    return Err(AppError::Validation(format!(
                        "invalid rate limit {limit} per {window}s"
                    )));
                }
                Ok(Duration::milliseconds(i64::from(window) * 1000 / i64::from(limit)))
            }
            _ => Ok(self.default_interval),
        }
    }
}

/// Longest configurable spacing. Keeps timestamp arithmetic in range.
const MAX_SPACING_SECS: i64 = 100 * 365 * 24 * 3600;

/// Whole seconds as a [`Duration`], capped at [`MAX_SPACING_SECS`].
fn seconds_saturating(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).map_or(MAX_SPACING_SECS, |s| s.min(MAX_SPACING_SECS)))
}

/// One item of a destination queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    pub id: String,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Spacing required before this item.
    pub gap: Duration,
    pub is_manual: bool,
}

/// First free time for a new item needing `gap` on each side.
///
/// Starts at `max(now, anchor + gap)` and takes the first hole in
/// `occupied` wide enough, so late arrivals can land ahead of later items.
#[must_use]
pub fn first_fit_slot(
    occupied: &[DateTime<Utc>],
    anchor: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    gap: Duration,
) -> DateTime<Utc> {
    let mut times = occupied.to_vec();
    times.sort();

    let mut candidate = anchor.map_or(now, |a| (a + gap).max(now));
    for time in times {
        if candidate + gap <= time {
            return candidate;
        }
        candidate = candidate.max(time + gap);
    }
    candidate
}

/// Sort a queue by current time, then creation time, then id.
pub fn order_entries(entries: &mut [SlotEntry]) {
    entries.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

/// Re-lay an ordered queue. Returns one time per entry, same order.
///
/// Non-manual items move to `max(previous + gap, now)`. Manual items keep
/// their own time unless it is earlier than `previous + manual_gap`. The
/// first item's "previous" is `anchor`, the last delivery to the
/// destination. Times are strictly increasing.
#[must_use]
pub fn compact(
    ordered: &[SlotEntry],
    anchor: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    manual_gap: Duration,
) -> Vec<DateTime<Utc>> {
    let mut previous = anchor;
    let mut times = Vec::with_capacity(ordered.len());

    for entry in ordered {
        let mut time = if entry.is_manual {
            previous.map_or(entry.scheduled_at, |p| entry.scheduled_at.max(p + manual_gap))
        } else {
            previous.map_or(now, |p| (p + entry.gap).max(now))
        };
        if let Some(p) = previous {
            if time <= p {
                time = p + Duration::seconds(1);
            }
        }
        times.push(time);
        previous = Some(time);
    }

    times
}

/// Move an entry to `index` (clamped) and pin it.
///
/// Moved earlier, the entry takes over the time of the entry now following
/// it. Moved later, it takes the time of the entry now before it, so a
/// following [`compact`] puts it one manual gap behind that entry and keeps
/// the new order.
#[must_use]
pub fn move_to_index(mut ordered: Vec<SlotEntry>, id: &str, index: usize) -> Vec<SlotEntry> {
    let Some(from) = ordered.iter().position(|e| e.id == id) else {
        return ordered;
    };
    let mut moved = ordered.remove(from);
    let index = index.min(ordered.len());

    if index < from {
        moved.scheduled_at = ordered[index].scheduled_at;
    } else if let Some(prev) = index.checked_sub(1).and_then(|i| ordered.get(i)) {
        moved.scheduled_at = moved.scheduled_at.max(prev.scheduled_at);
    }
    moved.is_manual = true;
    ordered.insert(index, moved);
    ordered
}
