use async_trait::async_trait;
use serde_json::{Map, Value};
use wellsync_core::{RemoteTable, UserId};

use crate::error::{RemoteError, StorageError};

/// A remote row: column name to JSON value.
pub type Row = Map<String, Value>;

/// Durable device cache. Each key holds one complete JSON document and a
/// `set` replaces it atomically.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError>;
}

/// Row-oriented remote store shared by every device of a user.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows owned by `user_id`, ordered by `order_by`.
    async fn select(
        &self,
        table: RemoteTable,
        user_id: &UserId,
        order_by: &str,
        descending: bool,
    ) -> Result<Vec<Row>, RemoteError>;

    /// Insert rows, replacing any existing row that matches on every
    /// `conflict_target` column.
    async fn upsert(
        &self,
        table: RemoteTable,
        rows: Vec<Row>,
        conflict_target: &[&str],
    ) -> Result<(), RemoteError>;

    /// Delete rows whose `column` value is one of `ids`.
    async fn delete(
        &self,
        table: RemoteTable,
        column: &str,
        ids: &[String],
    ) -> Result<(), RemoteError>;
}
