use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::CoreError;

/// One calendar-day snapshot of a metric.
pub trait DayRecord {
    fn date(&self) -> NaiveDate;

    /// Check values that may have bypassed the constructors, e.g. records read
    /// back from the device cache.
    fn validate(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

pub fn find_day<R: DayRecord>(series: &[R], date: NaiveDate) -> Option<&R> {
    series.iter().find(|r| r.date() == date)
}

/// Replace the entry for `record`'s date, or prepend it when the day is new.
/// Returns the replaced entry.
pub fn upsert_day<R: DayRecord>(series: &mut Vec<R>, record: R) -> Option<R> {
    match series.iter().position(|r| r.date() == record.date()) {
        Some(index) => Some(std::mem::replace(&mut series[index], record)),
        None => {
            series.insert(0, record);
            None
        }
    }
}

/// Order newest-first, collapse duplicate days (first occurrence wins) and keep
/// at most `window` days.
pub fn retain_window<R: DayRecord>(mut series: Vec<R>, window: usize) -> Vec<R> {
    series.sort_by(|a, b| b.date().cmp(&a.date()));
    series.dedup_by(|later, earlier| later.date() == earlier.date());
    series.truncate(window);
    series
}

/// Merge the device copy of a series with the remote-derived one.
///
/// Without a remote series the local one is returned untouched. Otherwise the
/// remote record wins for every day it knows, local days missing remotely are
/// kept, and days in `keep_local` (written locally after the remote snapshot
/// was taken) keep their local value.
pub fn merge_daily<R: DayRecord + Clone>(
    local: &[R],
    remote: Option<&[R]>,
    keep_local: &BTreeSet<NaiveDate>,
    window: usize,
) -> Vec<R> {
    let Some(remote) = remote else {
        return local.to_vec();
    };

    let mut by_date: BTreeMap<NaiveDate, R> = BTreeMap::new();
    for record in remote {
        by_date.entry(record.date()).or_insert_with(|| record.clone());
    }
    for record in local {
        let date = record.date();
        if keep_local.contains(&date) {
            by_date.insert(date, record.clone());
        } else {
            by_date.entry(date).or_insert_with(|| record.clone());
        }
    }

    by_date.into_values().rev().take(window).collect()
}

/// Local days the remote series has no record for.
pub fn local_only<'a, R: DayRecord>(local: &'a [R], remote: &[R]) -> Vec<&'a R> {
    let remote_days: BTreeSet<NaiveDate> = remote.iter().map(|r| r.date()).collect();
    local
        .iter()
        .filter(|r| !remote_days.contains(&r.date()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Day(NaiveDate, u32);

    impl DayRecord for Day {
        fn date(&self) -> NaiveDate {
            self.0
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    #[test]
    fn upsert_replaces_existing_day() {
        let mut series = vec![Day(d(2), 1), Day(d(1), 2)];
        let previous = upsert_day(&mut series, Day(d(1), 9));
        assert_eq!(previous, Some(Day(d(1), 2)));
        assert_eq!(series, vec![Day(d(2), 1), Day(d(1), 9)]);
    }

    #[test]
    fn upsert_prepends_new_day() {
        let mut series = vec![Day(d(2), 1)];
        assert!(upsert_day(&mut series, Day(d(1), 5)).is_none());
        // Prepend, not sorted insert
        assert_eq!(series, vec![Day(d(1), 5), Day(d(2), 1)]);
    }

    #[test]
    fn merge_without_remote_is_identity() {
        let local = vec![Day(d(1), 5), Day(d(3), 7), Day(d(2), 1)];
        let merged = merge_daily(&local, None, &BTreeSet::new(), 30);
        assert_eq!(merged, local);
    }

    #[test]
    fn remote_wins_and_local_only_days_survive() {
        let local = vec![Day(d(3), 30), Day(d(2), 20)];
        let remote = vec![Day(d(2), 99), Day(d(1), 10)];
        let merged = merge_daily(&local, Some(remote.as_slice()), &BTreeSet::new(), 30);
        assert_eq!(merged, vec![Day(d(3), 30), Day(d(2), 99), Day(d(1), 10)]);
    }

    #[test]
    fn keep_local_overrides_remote() {
        let local = vec![Day(d(2), 20)];
        let remote = vec![Day(d(2), 99)];
        let keep: BTreeSet<_> = [d(2)].into_iter().collect();
        let merged = merge_daily(&local, Some(remote.as_slice()), &keep, 30);
        assert_eq!(merged, vec![Day(d(2), 20)]);
    }

    #[test]
    fn merge_is_repeatable() {
        let local = vec![Day(d(5), 1), Day(d(1), 2)];
        let remote = vec![Day(d(4), 3), Day(d(1), 4)];
        let first = merge_daily(&local, Some(remote.as_slice()), &BTreeSet::new(), 30);
        let second = merge_daily(&local, Some(remote.as_slice()), &BTreeSet::new(), 30);
        assert_eq!(first, second);
    }

    #[test]
    fn merge_caps_to_newest_days() {
        let remote: Vec<Day> = (1..=20).map(|i| Day(d(i), i)).collect();
        let merged = merge_daily(&[], Some(remote.as_slice()), &BTreeSet::new(), 5);
        assert_eq!(merged.len(), 5);
        assert_eq!(merged[0], Day(d(20), 20));
        assert_eq!(merged[4], Day(d(16), 16));
    }

    #[test]
    fn retain_window_sorts_and_dedups() {
        let series = vec![Day(d(1), 1), Day(d(3), 3), Day(d(1), 9), Day(d(2), 2)];
        let kept = retain_window(series, 2);
        assert_eq!(kept, vec![Day(d(3), 3), Day(d(2), 2)]);
    }

    #[test]
    fn local_only_lists_days_missing_remotely() {
        let local = vec![Day(d(3), 3), Day(d(2), 2)];
        let remote = vec![Day(d(2), 5)];
        assert_eq!(local_only(&local, &remote), vec![&Day(d(3), 3)]);
    }
}
