use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::{
    CoreError, DayRecord, Projection, RemoteTable, SeriesKind, UserId,
    dates::{bedtime, round_tenths, start_of_day},
};

pub const DEFAULT_QUALITY: u8 = 3;
pub const MAX_SLEEP_HOURS: f64 = 24.0;

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepRecord {
    pub date: NaiveDate,
    pub hours: f64,
    #[serde(default = "default_quality")]
    pub quality_rating: u8,
}

impl SleepRecord {
    pub fn new(date: NaiveDate, hours: f64, quality_rating: u8) -> Result<Self, CoreError> {
        check_values(hours, quality_rating)?;
        Ok(Self {
            date,
            hours: round_tenths(hours),
            quality_rating,
        })
    }

    /// Rebuild the remote interval: bedtime on `date`, lasting `hours`.
    pub fn to_row(&self, user: &UserId) -> Result<SleepRow, CoreError> {
        check_values(self.hours, self.quality_rating)?;
        let start_time = bedtime(self.date);
        let seconds = (self.hours * 3600.0).round() as i64;
        let end_time = TimeDelta::try_seconds(seconds)
            .and_then(|length| start_time.checked_add_signed(length))
            .ok_or_else(|| {
                CoreError::InvalidValue(format!("sleep interval overflows: {} hours", self.hours))
            })?;
        Ok(SleepRow {
            user_id: user.clone(),
            day_start: start_of_day(self.date),
            start_time,
            end_time,
            quality: self.quality_rating,
        })
    }
}

fn check_values(hours: f64, quality_rating: u8) -> Result<(), CoreError> {
    if !hours.is_finite() || !(0.0..=MAX_SLEEP_HOURS).contains(&hours) {
        return Err(CoreError::InvalidValue(format!("sleep hours out of range: {hours}")));
    }
    if !(1..=5).contains(&quality_rating) {
        return Err(CoreError::InvalidValue(format!(
            "sleep quality must be 1-5, got {quality_rating}"
        )));
    }
    Ok(())
}

impl DayRecord for SleepRecord {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn validate(&self) -> Result<(), CoreError> {
        check_values(self.hours, self.quality_rating)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepRow {
    pub user_id: UserId,
    pub day_start: NaiveDateTime,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    #[serde(default = "default_quality")]
    pub quality: u8,
}

impl SleepRow {
    pub fn to_record(&self) -> SleepRecord {
        let seconds = (self.end_time - self.start_time).num_seconds().max(0);
        SleepRecord {
            date: self.start_time.date(),
            hours: round_tenths(seconds as f64 / 3600.0).min(MAX_SLEEP_HOURS),
            quality_rating: self.quality.clamp(1, 5),
        }
    }
}

pub struct SleepProjection;

impl Projection for SleepProjection {
    type Record = SleepRecord;
    type Row = SleepRow;

    const KIND: SeriesKind = SeriesKind::Sleep;
    const TABLE: RemoteTable = RemoteTable::SleepLogs;
    const LOCAL_KEY: &'static str = "wellsync.sleep";
    const ORDER_COLUMN: &'static str = "start_time";
    const CONFLICT_TARGET: &'static [&'static str] = &["user_id", "day_start"];

    /// A day should carry one interval; when several exist the latest start
    /// wins, then the latest end.
    fn from_remote_rows(mut rows: Vec<SleepRow>) -> Vec<SleepRecord> {
        rows.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| b.end_time.cmp(&a.end_time))
        });
        let mut by_date: BTreeMap<NaiveDate, SleepRecord> = BTreeMap::new();
        for row in &rows {
            by_date
                .entry(row.start_time.date())
                .or_insert_with(|| row.to_record());
        }
        by_date.into_values().rev().collect()
    }

    fn record_rows(
        user: &UserId,
        _previous: Option<&SleepRecord>,
        next: &SleepRecord,
        _now: NaiveDateTime,
    ) -> Vec<SleepRow> {
        next.to_row(user).into_iter().collect()
    }

    fn backfill_rows(user: &UserId, record: &SleepRecord) -> Vec<SleepRow> {
        record.to_row(user).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").unwrap()
    }

    fn row(start: &str, end: &str, quality: u8) -> SleepRow {
        SleepRow {
            user_id: UserId::new("u1"),
            day_start: start_of_day(at(start).date()),
            start_time: at(start),
            end_time: at(end),
            quality,
        }
    }

    #[test]
    fn interval_derives_hours_on_start_date() {
        let records =
            SleepProjection::from_remote_rows(vec![row("2024-06-01T22:00", "2024-06-02T06:30", 4)]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, date("2024-06-01"));
        assert_eq!(records[0].hours, 8.5);
        assert_eq!(records[0].quality_rating, 4);
    }

    #[test]
    fn duplicate_intervals_keep_latest_start() {
        let records = SleepProjection::from_remote_rows(vec![
            row("2024-06-01T21:00", "2024-06-02T05:00", 2),
            row("2024-06-01T23:00", "2024-06-02T06:00", 5),
            row("2024-06-01T22:00", "2024-06-02T07:00", 3),
        ]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hours, 7.0);
        assert_eq!(records[0].quality_rating, 5);
    }

    #[test]
    fn equal_starts_prefer_latest_end() {
        let a = vec![
            row("2024-06-01T22:00", "2024-06-02T05:00", 2),
            row("2024-06-01T22:00", "2024-06-02T06:00", 4),
        ];
        let mut b = a.clone();
        b.reverse();
        let from_a = SleepProjection::from_remote_rows(a);
        let from_b = SleepProjection::from_remote_rows(b);
        assert_eq!(from_a, from_b);
        assert_eq!(from_a[0].hours, 8.0);
    }

    #[test]
    fn record_projects_back_to_same_day() {
        let record = SleepRecord::new(date("2024-06-01"), 7.25, 4).unwrap();
        assert_eq!(record.hours, 7.3);
        let row = record.to_row(&UserId::new("u1")).unwrap();
        assert_eq!(row.start_time, at("2024-06-01T22:00"));
        assert_eq!(row.end_time, at("2024-06-02T05:18"));
        assert_eq!(row.to_record(), record);
    }

    #[test]
    fn missing_quality_defaults_to_three() {
        let json = r#"{"date":"2024-06-01","hours":6.0}"#;
        let record: SleepRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.quality_rating, DEFAULT_QUALITY);
    }

    #[test]
    fn unchecked_record_produces_no_rows() {
        let record = SleepRecord {
            date: date("2024-06-01"),
            hours: 1e300,
            quality_rating: 3,
        };
        assert!(record.validate().is_err());
        assert!(record.to_row(&UserId::new("u1")).is_err());
        assert!(SleepProjection::backfill_rows(&UserId::new("u1"), &record).is_empty());
    }

    #[test]
    fn overlong_remote_interval_is_capped() {
        let records =
            SleepProjection::from_remote_rows(vec![row("2024-06-01T22:00", "2024-06-03T06:00", 3)]);
        assert_eq!(records[0].hours, MAX_SLEEP_HOURS);
        assert!(records[0].validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(SleepRecord::new(date("2024-06-01"), -1.0, 3).is_err());
        assert!(SleepRecord::new(date("2024-06-01"), 25.0, 3).is_err());
        assert!(SleepRecord::new(date("2024-06-01"), 7.0, 0).is_err());
        assert!(SleepRecord::new(date("2024-06-01"), 7.0, 6).is_err());
    }
}
