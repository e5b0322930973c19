use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use crate::error::StorageError;
use crate::traits::LocalStore;

/// Device cache backed by a single SQLite key-value table.
pub struct SqliteLocalStore {
    conn: Mutex<Connection>,
}

impl SqliteLocalStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Raw text stored under `key`, without JSON decoding.
    pub fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Store `text` verbatim. Used when importing caches written by older
    /// clients; readers still validate it on `get`.
    pub fn set_raw(&self, key: &str, text: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                 updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)",
            rusqlite::params![key, text],
        )?;
        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

impl LocalStore for SqliteLocalStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let Some(text) = self.get_raw(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StorageError::Malformed {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let text =
            serde_json::to_string(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.set_raw(key, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_key_reads_as_none() -> Result<(), StorageError> {
        let store = SqliteLocalStore::open_in_memory()?;
        assert!(store.get("wellsync.hydration")?.is_none());
        Ok(())
    }

    #[test]
    fn set_replaces_previous_value() -> Result<(), StorageError> {
        let store = SqliteLocalStore::open_in_memory()?;
        store.set("k", &json!([{"date": "2024-06-01", "milliliters": 800}]))?;
        store.set("k", &json!([]))?;
        assert_eq!(store.get("k")?, Some(json!([])));
        assert_eq!(store.keys()?, vec!["k".to_string()]);
        Ok(())
    }

    #[test]
    fn corrupt_text_is_reported_as_malformed() -> Result<(), StorageError> {
        let store = SqliteLocalStore::open_in_memory()?;
        store.set_raw("wellsync.sleep", "{not json")?;
        match store.get("wellsync.sleep") {
            Err(StorageError::Malformed { key, .. }) => assert_eq!(key, "wellsync.sleep"),
            other => panic!("expected malformed error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn values_survive_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cache.db");
        let path = path.to_str().ok_or("non-utf8 temp path")?;

        {
            let store = SqliteLocalStore::open(path)?;
            store.set("wellsync.breathing", &json!([{"date": "2024-06-01", "sessionCount": 2}]))?;
        }

        let reopened = SqliteLocalStore::open(path)?;
        assert_eq!(
            reopened.get("wellsync.breathing")?,
            Some(json!([{"date": "2024-06-01", "sessionCount": 2}]))
        );
        Ok(())
    }
}
