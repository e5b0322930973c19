use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
    DayRecord, EntryId, Projection, RemoteTable, SeriesKind, UserId,
    dates::{entry_timestamp, midday},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationRecord {
    pub date: NaiveDate,
    pub milliliters: u32,
}

impl HydrationRecord {
    pub fn new(date: NaiveDate, milliliters: u32) -> Self {
        Self { date, milliliters }
    }
}

impl DayRecord for HydrationRecord {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

/// One remote intake entry. Entries are signed deltas; a day's total is their sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydrationRow {
    pub id: EntryId,
    pub user_id: UserId,
    pub amount_ml: i64,
    pub logged_at: NaiveDateTime,
}

pub struct HydrationProjection;

impl Projection for HydrationProjection {
    type Record = HydrationRecord;
    type Row = HydrationRow;

    const KIND: SeriesKind = SeriesKind::Hydration;
    const TABLE: RemoteTable = RemoteTable::HydrationLogs;
    const LOCAL_KEY: &'static str = "wellsync.hydration";
    const ORDER_COLUMN: &'static str = "logged_at";
    const CONFLICT_TARGET: &'static [&'static str] = &["id"];

    fn from_remote_rows(rows: Vec<HydrationRow>) -> Vec<HydrationRecord> {
        let mut totals: BTreeMap<NaiveDate, i64> = BTreeMap::new();
        for row in rows {
            *totals.entry(row.logged_at.date()).or_default() += row.amount_ml;
        }
        totals
            .into_iter()
            .rev()
            .map(|(date, total)| {
                let ml = u32::try_from(total.max(0)).unwrap_or(u32::MAX);
                HydrationRecord::new(date, ml)
            })
            .collect()
    }

    fn record_rows(
        user: &UserId,
        previous: Option<&HydrationRecord>,
        next: &HydrationRecord,
        now: NaiveDateTime,
    ) -> Vec<HydrationRow> {
        let before = previous.map_or(0, |p| i64::from(p.milliliters));
        let delta = i64::from(next.milliliters) - before;
        if delta == 0 {
            return Vec::new();
        }
        vec![HydrationRow {
            id: EntryId::new(),
            user_id: user.clone(),
            amount_ml: delta,
            logged_at: entry_timestamp(next.date, now),
        }]
    }

    fn backfill_rows(user: &UserId, record: &HydrationRecord) -> Vec<HydrationRow> {
        if record.milliliters == 0 {
            return Vec::new();
        }
        let date = record.date.to_string();
        vec![HydrationRow {
            id: EntryId::derived(&["hydration", user.as_str(), &date]),
            user_id: user.clone(),
            amount_ml: i64::from(record.milliliters),
            logged_at: midday(record.date),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn row(user: &UserId, at: &str, amount_ml: i64) -> HydrationRow {
        HydrationRow {
            id: EntryId::new(),
            user_id: user.clone(),
            amount_ml,
            logged_at: NaiveDateTime::parse_from_str(at, "%Y-%m-%dT%H:%M:%S").unwrap(),
        }
    }

    #[test]
    fn remote_entries_sum_per_day() {
        let user = UserId::new("u1");
        let rows = vec![
            row(&user, "2024-06-01T08:00:00", 300),
            row(&user, "2024-06-01T15:00:00", 500),
            row(&user, "2024-06-02T09:00:00", 200),
        ];
        let records = HydrationProjection::from_remote_rows(rows);
        assert_eq!(
            records,
            vec![
                HydrationRecord::new(date("2024-06-02"), 200),
                HydrationRecord::new(date("2024-06-01"), 800),
            ]
        );
    }

    #[test]
    fn negative_totals_floor_at_zero() {
        let user = UserId::new("u1");
        let rows = vec![
            row(&user, "2024-06-01T08:00:00", 250),
            row(&user, "2024-06-01T09:00:00", -400),
        ];
        let records = HydrationProjection::from_remote_rows(rows);
        assert_eq!(records, vec![HydrationRecord::new(date("2024-06-01"), 0)]);
    }

    #[test]
    fn record_pushes_the_delta() {
        let user = UserId::new("u1");
        let now = date("2024-06-01").and_hms_opt(10, 0, 0).unwrap();
        let previous = HydrationRecord::new(date("2024-06-01"), 800);
        let next = HydrationRecord::new(date("2024-06-01"), 500);

        let rows = HydrationProjection::record_rows(&user, Some(&previous), &next, now);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount_ml, -300);
        assert_eq!(rows[0].logged_at, now);

        let unchanged = HydrationProjection::record_rows(&user, Some(&next), &next, now);
        assert!(unchanged.is_empty());
    }

    #[test]
    fn backfill_is_deterministic() {
        let user = UserId::new("u1");
        let record = HydrationRecord::new(date("2024-06-01"), 1000);
        let a = HydrationProjection::backfill_rows(&user, &record);
        let b = HydrationProjection::backfill_rows(&user, &record);
        assert_eq!(a, b);
        assert_eq!(a[0].amount_ml, 1000);
        assert_eq!(a[0].logged_at.date(), record.date);
    }
}
