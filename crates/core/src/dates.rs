use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// Hour of day used when a sleep interval has to be rebuilt from a duration.
pub const BEDTIME_HOUR: i64 = 22;

pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::default())
}

pub fn midday(date: NaiveDate) -> NaiveDateTime {
    start_of_day(date) + Duration::hours(12)
}

pub fn bedtime(date: NaiveDate) -> NaiveDateTime {
    start_of_day(date) + Duration::hours(BEDTIME_HOUR)
}

/// Timestamp for a fine-grained remote entry belonging to `date`. Entries for
/// today carry the real time; entries written for another day are pinned to
/// midday so they can never drift across a date boundary.
pub fn entry_timestamp(date: NaiveDate, now: NaiveDateTime) -> NaiveDateTime {
    if now.date() == date { now } else { midday(date) }
}

pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub fn today() -> NaiveDate {
    local_now().date()
}

pub fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
