use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wellsync_core::{RemoteTable, SeriesKind, SyncConfig, UserId};
use wellsync_storage::{LocalStore, RemoteError, RemoteStore, Row, StorageError};

use crate::error::EngineError;
use crate::identity::IdentityProvider;

/// Collaborators shared by every stream of one session.
pub(crate) struct SyncContext {
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: SyncConfig,
    pub runtime: Handle,
}

/// Read a list document from the device cache. Missing, unreadable and
/// malformed documents all come back as `None`.
pub(crate) fn read_local<T: DeserializeOwned>(
    local: &dyn LocalStore,
    kind: SeriesKind,
    key: &str,
) -> Option<Vec<T>> {
    let value = match local.get(key) {
        Ok(Some(value)) => value,
        Ok(None) => return None,
        Err(StorageError::Malformed { reason, .. }) => {
            warn!(series = kind.as_str(), key, %reason, "malformed local cache, treating as empty");
            return None;
        }
        Err(e) => {
            error!(series = kind.as_str(), key, error = %e, "local cache read failed");
            return None;
        }
    };
    match serde_json::from_value(value) {
        Ok(records) => Some(records),
        Err(e) => {
            warn!(
                series = kind.as_str(),
                key,
                error = %e,
                "local cache has unexpected shape, treating as empty"
            );
            None
        }
    }
}

pub(crate) fn write_local<T: Serialize>(
    local: &dyn LocalStore,
    key: &str,
    value: &T,
) -> Result<(), EngineError> {
    let value = serde_json::to_value(value).map_err(|e| EngineError::Serialization(e.to_string()))?;
    local.set(key, &value)?;
    Ok(())
}

pub(crate) fn encode_rows<T: Serialize>(
    table: RemoteTable,
    rows: &[T],
) -> Result<Vec<Row>, EngineError> {
    rows.iter()
        .map(|row| match serde_json::to_value(row) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(EngineError::Serialization(format!(
                "{table} row encoded as {other}, expected an object"
            ))),
            Err(e) => Err(EngineError::Serialization(e.to_string())),
        })
        .collect()
}

/// Decode remote rows, skipping (and logging) any row that does not fit.
pub(crate) fn decode_rows<T: DeserializeOwned>(table: RemoteTable, rows: Vec<Row>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(Value::Object(row)) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                let err = RemoteError::Decode {
                    table,
                    reason: e.to_string(),
                };
                warn!(error = %err, "skipping remote row");
                None
            }
        })
        .collect()
}

/// Select the user's rows. Failures are logged and come back as `None`; the
/// caller keeps its local copy for this cycle.
pub(crate) async fn fetch_rows(
    remote: &dyn RemoteStore,
    kind: SeriesKind,
    table: RemoteTable,
    user: &UserId,
    order_by: &str,
    descending: bool,
) -> Option<Vec<Row>> {
    match remote.select(table, user, order_by, descending).await {
        Ok(rows) => Some(rows),
        Err(RemoteError::AuthRequired) => {
            info!(
                series = kind.as_str(),
                %user,
                "remote session not authorized, keeping local data"
            );
            None
        }
        Err(e) if e.is_transient() => {
            warn!(
                series = kind.as_str(),
                %user,
                error = %e,
                "remote fetch failed, keeping local data"
            );
            None
        }
        Err(e) => {
            error!(series = kind.as_str(), %user, error = %e, "remote fetch rejected");
            None
        }
    }
}

/// One upsert attempt. Failures are logged and returned; callers decide
/// whether anything else depends on them.
pub(crate) async fn push_rows(
    remote: &dyn RemoteStore,
    kind: SeriesKind,
    table: RemoteTable,
    rows: Vec<Row>,
    conflict_target: &[&str],
) -> Result<(), RemoteError> {
    let count = rows.len();
    match remote.upsert(table, rows, conflict_target).await {
        Ok(()) => {
            debug!(series = kind.as_str(), rows = count, "pushed rows");
            Ok(())
        }
        Err(e @ RemoteError::Conflict { .. }) => {
            warn!(
                series = kind.as_str(),
                rows = count,
                error = %e,
                "remote rejected rows, dropping them"
            );
            Err(e)
        }
        Err(RemoteError::AuthRequired) => {
            info!(
                series = kind.as_str(),
                rows = count,
                "remote session not authorized, push skipped"
            );
            Err(RemoteError::AuthRequired)
        }
        Err(e) if e.is_transient() => {
            warn!(series = kind.as_str(), rows = count, error = %e, "remote push failed");
            Err(e)
        }
        Err(e) => {
            error!(series = kind.as_str(), rows = count, error = %e, "remote push rejected");
            Err(e)
        }
    }
}

/// Background pushes still running for one stream.
#[derive(Default)]
pub(crate) struct PendingPushes {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PendingPushes {
    pub fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait for every push started so far.
    pub async fn settle(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "background push task failed");
            }
        }
    }
}
