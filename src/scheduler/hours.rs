//! Working-hours windows in the aimpoint's own time zone

use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::ops::Range;
use std::time::Duration;

use crate::model::{HourRange, WorkingHours};

/// Sub-ranges of `[now, now + window)` that fall inside the working hours,
/// as offsets from `now`, sorted and merged. An empty range list means the
/// aimpoint is always open.
pub fn open_windows(
    hours: &WorkingHours,
    now: DateTime<Utc>,
    window: Duration,
) -> Vec<Range<Duration>> {
    if hours.ranges.is_empty() {
        return vec![Duration::ZERO..window];
    }

    let Ok(span) = chrono::Duration::from_std(window) else {
        return Vec::new();
    };
    let horizon = now + span;
    let today = now.with_timezone(&hours.tz).date_naive();

    let mut windows: Vec<Range<Duration>> = Vec::new();
    for range in &hours.ranges {
        // Yesterday's range may still be open after midnight; tomorrow's may
        // open before the window closes.
        for day in [today.pred_opt(), Some(today), today.succ_opt()]
            .into_iter()
            .flatten()
        {
            let Some((start, end)) = local_span(hours.tz, day, range) else {
                continue;
            };
            let from = start.max(now);
            let to = end.min(horizon);
            if from < to {
                let offset = |t: DateTime<Utc>| (t - now).to_std().unwrap_or_default();
                windows.push(offset(from)..offset(to));
            }
        }
    }

    merge(windows)
}

/// UTC bounds of `range` opening on local `day`
fn local_span(tz: Tz, day: NaiveDate, range: &HourRange) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let midnight = day.and_hms_opt(0, 0, 0)?;
    let start = midnight + chrono::Duration::minutes(range.start_min as i64);
    let mut end = midnight + chrono::Duration::minutes(range.end_min as i64);
    if range.wraps_midnight() {
        end = end.checked_add_days(Days::new(1))?;
    }
    Some((to_utc(tz, start)?, to_utc(tz, end)?))
}

/// Resolve a local wall-clock time; times skipped by a DST jump move forward an hour
fn to_utc(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    let resolved = match tz.from_local_datetime(&local) {
        LocalResult::None => tz
            .from_local_datetime(&(local + chrono::Duration::hours(1)))
            .earliest(),
        other => other.earliest(),
    };
    resolved.map(|t| t.with_timezone(&Utc))
}

fn merge(mut windows: Vec<Range<Duration>>) -> Vec<Range<Duration>> {
    windows.sort_by_key(|w| w.start);
    let mut merged: Vec<Range<Duration>> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            Some(last) if window.start <= last.end => last.end = last.end.max(window.end),
            _ => merged.push(window),
        }
    }
    merged
}
