use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
    CoreError, DayRecord, EntryId, Projection, RemoteTable, SeriesKind, UserId,
    dates::{entry_timestamp, midday},
};

pub const MAX_DAILY_SESSIONS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreathingRecord {
    pub date: NaiveDate,
    pub session_count: u32,
}

impl BreathingRecord {
    pub fn new(date: NaiveDate, session_count: u32) -> Self {
        Self { date, session_count }
    }
}

impl DayRecord for BreathingRecord {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.session_count > MAX_DAILY_SESSIONS {
            return Err(CoreError::InvalidValue(format!(
                "{} breathing sessions on {}, at most {MAX_DAILY_SESSIONS} allowed",
                self.session_count, self.date
            )));
        }
        Ok(())
    }
}

/// One completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreathingRow {
    pub id: EntryId,
    pub user_id: UserId,
    pub completed_at: NaiveDateTime,
}

pub struct BreathingProjection;

impl Projection for BreathingProjection {
    type Record = BreathingRecord;
    type Row = BreathingRow;

    const KIND: SeriesKind = SeriesKind::Breathing;
    const TABLE: RemoteTable = RemoteTable::BreathingSessions;
    const LOCAL_KEY: &'static str = "wellsync.breathing";
    const ORDER_COLUMN: &'static str = "completed_at";
    const CONFLICT_TARGET: &'static [&'static str] = &["id"];

    fn from_remote_rows(rows: Vec<BreathingRow>) -> Vec<BreathingRecord> {
        let mut counts: BTreeMap<NaiveDate, u32> = BTreeMap::new();
        for row in rows {
            *counts.entry(row.completed_at.date()).or_default() += 1;
        }
        counts
            .into_iter()
            .rev()
            .map(|(date, count)| BreathingRecord::new(date, count.min(MAX_DAILY_SESSIONS)))
            .collect()
    }

    /// Sessions only accumulate remotely; a lowered count produces no rows.
    fn record_rows(
        user: &UserId,
        previous: Option<&BreathingRecord>,
        next: &BreathingRecord,
        now: NaiveDateTime,
    ) -> Vec<BreathingRow> {
        let before = previous.map_or(0, |p| p.session_count);
        let added = next.session_count.min(MAX_DAILY_SESSIONS).saturating_sub(before);
        let completed_at = entry_timestamp(next.date, now);
        (0..added)
            .map(|_| BreathingRow {
                id: EntryId::new(),
                user_id: user.clone(),
                completed_at,
            })
            .collect()
    }

    fn backfill_rows(user: &UserId, record: &BreathingRecord) -> Vec<BreathingRow> {
        if record.validate().is_err() {
            return Vec::new();
        }
        let date = record.date.to_string();
        (0..record.session_count)
            .map(|i| BreathingRow {
                id: EntryId::derived(&["breathing", user.as_str(), &date, &i.to_string()]),
                user_id: user.clone(),
                completed_at: midday(record.date),
            })
            .collect()
    }
}
