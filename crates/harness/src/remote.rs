use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use wellsync_core::{RemoteTable, UserId};
use wellsync_storage::{RemoteError, RemoteStore, Row};

/// Counts of calls that reached the store (failed calls included).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    pub selects: usize,
    pub upserts: usize,
    pub deletes: usize,
    pub deleted_ids: Vec<String>,
}

#[derive(Default)]
struct Faults {
    offline: bool,
    session_expired: bool,
    fail_next: BTreeMap<RemoteTable, usize>,
    /// (table, column, value): batches containing a matching row are rejected.
    reject: Vec<(RemoteTable, String, Value)>,
    select_delay: Option<Duration>,
}

/// Remote row store kept in memory, shared by every device in a test.
#[derive(Default)]
pub struct MemoryRemote {
    tables: Mutex<BTreeMap<RemoteTable, Vec<Row>>>,
    faults: Mutex<Faults>,
    calls: Mutex<CallLog>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a transient error while offline.
    pub fn set_offline(&self, offline: bool) {
        self.faults.lock().offline = offline;
    }

    /// Every call is refused as unauthorized while the session is expired.
    pub fn expire_session(&self, expired: bool) {
        self.faults.lock().session_expired = expired;
    }

    /// Fail the next `count` calls touching `table`.
    pub fn fail_next(&self, table: RemoteTable, count: usize) {
        *self.faults.lock().fail_next.entry(table).or_default() += count;
    }

    /// Reject any upsert batch carrying a row whose `column` equals `value`.
    pub fn reject_rows_where(&self, table: RemoteTable, column: &str, value: Value) {
        self.faults
            .lock()
            .reject
            .push((table, column.to_string(), value));
    }

    /// Hold every select for `delay` before answering.
    pub fn set_select_delay(&self, delay: Option<Duration>) {
        self.faults.lock().select_delay = delay;
    }

    pub fn insert<T: Serialize>(&self, table: RemoteTable, rows: &[T]) -> Result<(), RemoteError> {
        let mut encoded = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::to_value(row) {
                Ok(Value::Object(map)) => encoded.push(map),
                Ok(_) => {
                    return Err(RemoteError::Decode {
                        table,
                        reason: "row is not an object".into(),
                    });
                }
                Err(e) => {
                    return Err(RemoteError::Decode {
                        table,
                        reason: e.to_string(),
                    });
                }
            }
        }
        self.tables.lock().entry(table).or_default().extend(encoded);
        Ok(())
    }

    pub fn rows(&self, table: RemoteTable) -> Vec<Row> {
        self.tables.lock().get(&table).cloned().unwrap_or_default()
    }

    pub fn rows_as<T: DeserializeOwned>(
        &self,
        table: RemoteTable,
    ) -> Result<Vec<T>, serde_json::Error> {
        self.rows(table)
            .into_iter()
            .map(|row| serde_json::from_value(Value::Object(row)))
            .collect()
    }

    pub fn calls(&self) -> CallLog {
        self.calls.lock().clone()
    }

    fn check_faults(&self, table: RemoteTable) -> Result<(), RemoteError> {
        let mut faults = self.faults.lock();
        if faults.session_expired {
            return Err(RemoteError::AuthRequired);
        }
        if faults.offline {
            return Err(RemoteError::Transient("network unreachable".into()));
        }
        if let Some(remaining) = faults.fail_next.get_mut(&table) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Transient(format!("{table}: 503 service unavailable")));
            }
        }
        Ok(())
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn same_key(a: &Row, b: &Row, conflict_target: &[&str]) -> bool {
    conflict_target.iter().all(|column| a.get(*column) == b.get(*column))
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn select(
        &self,
        table: RemoteTable,
        user_id: &UserId,
        order_by: &str,
        descending: bool,
    ) -> Result<Vec<Row>, RemoteError> {
        self.calls.lock().selects += 1;
        let delay = self.faults.lock().select_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_faults(table)?;

        let mut rows: Vec<Row> = self
            .rows(table)
            .into_iter()
            .filter(|row| row.get("user_id").and_then(Value::as_str) == Some(user_id.as_str()))
            .collect();
        rows.sort_by(|a, b| compare_values(a.get(order_by), b.get(order_by)));
        if descending {
            rows.reverse();
        }
        Ok(rows)
    }

    async fn upsert(
        &self,
        table: RemoteTable,
        rows: Vec<Row>,
        conflict_target: &[&str],
    ) -> Result<(), RemoteError> {
        self.calls.lock().upserts += 1;
        self.check_faults(table)?;

        {
            let faults = self.faults.lock();
            for (rejected_table, column, value) in &faults.reject {
                if *rejected_table != table {
                    continue;
                }
                if rows.iter().any(|row| row.get(column) == Some(value)) {
                    return Err(RemoteError::Conflict {
                        table,
                        reason: format!("constraint violation on {column}"),
                    });
                }
            }
        }

        let mut tables = self.tables.lock();
        let stored = tables.entry(table).or_default();
        for row in rows {
            let existing = stored
                .iter_mut()
                .find(|existing| same_key(existing, &row, conflict_target));
            match existing {
                Some(existing) => *existing = row,
                None => stored.push(row),
            }
        }
        Ok(())
    }

    async fn delete(
        &self,
        table: RemoteTable,
        column: &str,
        ids: &[String],
    ) -> Result<(), RemoteError> {
        self.calls.lock().deletes += 1;
        self.check_faults(table)?;

        let doomed: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
        let mut tables = self.tables.lock();
        if let Some(stored) = tables.get_mut(&table) {
            stored.retain(|row| {
                row.get(column)
                    .and_then(Value::as_str)
                    .is_none_or(|id| !doomed.contains(id))
            });
        }
        self.calls.lock().deleted_ids.extend(ids.iter().cloned());
        Ok(())
    }
}
