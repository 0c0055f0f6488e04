use crate::domain::models::{Break, Day};
use chrono::{DateTime, Datelike, Days, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;

/// Eight days so that "today, but already past" still reaches the same
/// weekday next week.
const SCAN_DAYS: u64 = 8;

/// Earliest instant strictly after `now` that falls on one of `days` at the
/// local `time`. `None` only when `days` is empty.
pub fn next_occurrence<Z: TimeZone>(
    days: &BTreeSet<Day>,
    time: NaiveTime,
    now: &DateTime<Z>,
) -> Option<DateTime<Z>> {
    if days.is_empty() {
        return None;
    }

    let timezone = now.timezone();
    let today = now.date_naive();
    for offset in 0..SCAN_DAYS {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        if !days.contains(&Day::from_weekday(date.weekday())) {
            continue;
        }
        let Some(candidate) = resolve_local(&timezone, date.and_time(time)) else {
            continue;
        };
        if candidate > *now {
            return Some(candidate);
        }
    }

    None
}

/// Next fire instant for a break, evaluated in the configured timezone.
pub fn next_fire_time(break_item: &Break, timezone: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let time = break_item.time_of_day()?;
    let local_now = now.with_timezone(&timezone);
    next_occurrence(&break_item.days, time, &local_now).map(|fire_at| fire_at.with_timezone(&Utc))
}

fn resolve_local<Z: TimeZone>(timezone: &Z, naive: NaiveDateTime) -> Option<DateTime<Z>> {
    match timezone.from_local_datetime(&naive) {
        LocalResult::Single(value) => Some(value),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        // Skipped by a DST jump: take the wall-clock time one hour later.
        LocalResult::None => timezone
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest(),
    }
}
