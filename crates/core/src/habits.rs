use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{DayRecord, HabitId, HabitTemplate, Projection, RemoteTable, SeriesKind, UserId};

pub const HABITS_KEY: &str = "wellsync.habits";
pub const HABITS_PENDING_KEY: &str = "wellsync.habits.pending_sync";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: HabitId,
    pub title: String,
    pub icon: String,
    pub color_token: String,
    pub created_at: NaiveDateTime,
}

impl Habit {
    pub fn new(title: &str, icon: &str, color_token: &str, created_at: NaiveDateTime) -> Self {
        Self {
            id: HabitId::new(),
            title: title.to_string(),
            icon: icon.to_string(),
            color_token: color_token.to_string(),
            created_at,
        }
    }

    pub fn from_template(template: &HabitTemplate, created_at: NaiveDateTime) -> Self {
        Self::new(&template.title, &template.icon, &template.color_token, created_at)
    }

    pub fn to_row(&self, user: &UserId) -> HabitRow {
        HabitRow {
            id: self.id,
            user_id: user.clone(),
            title: self.title.clone(),
            icon: self.icon.clone(),
            color_token: self.color_token.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitRow {
    pub id: HabitId,
    pub user_id: UserId,
    pub title: String,
    pub icon: String,
    pub color_token: String,
    pub created_at: NaiveDateTime,
}

impl HabitRow {
    pub fn into_habit(self) -> Habit {
        Habit {
            id: self.id,
            title: self.title,
            icon: self.icon,
            color_token: self.color_token,
            created_at: self.created_at,
        }
    }
}

/// Marker for local definition changes the remote has not accepted yet,
/// tagged with the user that was signed in when they were made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSync {
    pub user: Option<UserId>,
}

impl PendingSync {
    /// Whether the local definitions are authoritative for `user`.
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        self.user.as_ref() == Some(user)
    }
}

/// Remote definitions in remote order, followed by local definitions the
/// remote does not know yet.
pub fn merge_habits(local: &[Habit], remote: Option<&[Habit]>) -> Vec<Habit> {
    let Some(remote) = remote else {
        return local.to_vec();
    };
    let mut seen: HashSet<HabitId> = HashSet::new();
    let mut merged = Vec::with_capacity(remote.len() + local.len());
    for habit in remote.iter().chain(local) {
        if seen.insert(habit.id) {
            merged.push(habit.clone());
        }
    }
    merged
}

/// Remote ids that are no longer defined locally.
pub fn stale_remote_ids(local: &[Habit], remote_ids: &[HabitId]) -> Vec<HabitId> {
    let known: HashSet<HabitId> = local.iter().map(|h| h.id).collect();
    remote_ids
        .iter()
        .filter(|id| !known.contains(id))
        .copied()
        .collect()
}

pub fn seed_habits(templates: &[HabitTemplate], now: NaiveDateTime) -> Vec<Habit> {
    templates
        .iter()
        .map(|t| Habit::from_template(t, now))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitCompletionLog {
    pub date: NaiveDate,
    pub completed_habit_ids: BTreeSet<HabitId>,
}

impl HabitCompletionLog {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            completed_habit_ids: BTreeSet::new(),
        }
    }

    pub fn with_completed(mut self, id: HabitId, completed: bool) -> Self {
        if completed {
            self.completed_habit_ids.insert(id);
        } else {
            self.completed_habit_ids.remove(&id);
        }
        self
    }

    pub fn is_completed(&self, id: HabitId) -> bool {
        self.completed_habit_ids.contains(&id)
    }
}

impl DayRecord for HabitCompletionLog {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitProgress {
    pub completed: usize,
    pub total: usize,
}

/// Completion ids of deleted habits stay in the log but never count.
pub fn progress(habits: &[Habit], log: Option<&HabitCompletionLog>) -> HabitProgress {
    let completed = log.map_or(0, |log| {
        habits.iter().filter(|h| log.is_completed(h.id)).count()
    });
    HabitProgress {
        completed,
        total: habits.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRow {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub completed_habit_ids: Vec<HabitId>,
}

pub struct CompletionProjection;

impl Projection for CompletionProjection {
    type Record = HabitCompletionLog;
    type Row = CompletionRow;

    const KIND: SeriesKind = SeriesKind::HabitCompletions;
    const TABLE: RemoteTable = RemoteTable::HabitCompletions;
    const LOCAL_KEY: &'static str = "wellsync.habit_completions";
    const ORDER_COLUMN: &'static str = "date";
    const CONFLICT_TARGET: &'static [&'static str] = &["user_id", "date"];

    fn from_remote_rows(rows: Vec<CompletionRow>) -> Vec<HabitCompletionLog> {
        let mut by_date: BTreeMap<NaiveDate, HabitCompletionLog> = BTreeMap::new();
        for row in rows {
            by_date.entry(row.date).or_insert_with(|| HabitCompletionLog {
                date: row.date,
                completed_habit_ids: row.completed_habit_ids.into_iter().collect(),
            });
        }
        by_date.into_values().rev().collect()
    }

    fn record_rows(
        user: &UserId,
        _previous: Option<&HabitCompletionLog>,
        next: &HabitCompletionLog,
        _now: NaiveDateTime,
    ) -> Vec<CompletionRow> {
        Self::backfill_rows(user, next)
    }

    fn backfill_rows(user: &UserId, record: &HabitCompletionLog) -> Vec<CompletionRow> {
        vec![CompletionRow {
            user_id: user.clone(),
            date: record.date,
            completed_habit_ids: record.completed_habit_ids.iter().copied().collect(),
        }]
    }
}
