use chrono::NaiveDateTime;
use serde::{Serialize, de::DeserializeOwned};

use crate::{RemoteTable, SeriesKind, UserId, series::DayRecord};

/// Mapping between a daily series kept on the device and its remote rows.
///
/// The device keeps one aggregate record per day while the remote store may
/// keep several fine-grained rows for the same day, so every direction of the
/// mapping is an explicit pure function.
pub trait Projection: Send + Sync + 'static {
    type Record: DayRecord
        + Clone
        + PartialEq
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;
    type Row: Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    const KIND: SeriesKind;
    const TABLE: RemoteTable;
    const LOCAL_KEY: &'static str;
    const ORDER_COLUMN: &'static str;
    const CONFLICT_TARGET: &'static [&'static str];

    /// Group remote rows into one record per day.
    fn from_remote_rows(rows: Vec<Self::Row>) -> Vec<Self::Record>;

    /// Rows to push after `next` replaced `previous` locally.
    fn record_rows(
        user: &UserId,
        previous: Option<&Self::Record>,
        next: &Self::Record,
        now: NaiveDateTime,
    ) -> Vec<Self::Row>;

    /// Rows re-creating a day the remote has never seen. Ids are derived from
    /// the day so repeating the push is harmless.
    fn backfill_rows(user: &UserId, record: &Self::Record) -> Vec<Self::Row>;
}
