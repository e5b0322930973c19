use std::sync::Arc;

use chrono::{NaiveDate, TimeDelta};
use wellsync_core::{SyncConfig, UserId, dates::today};
use wellsync_engine::{EngineError, SessionIdentity, SyncEngine};
use wellsync_storage::SqliteLocalStore;

use crate::remote::MemoryRemote;

/// One app install: its own device cache and identity, talking to a remote
/// shared with every other device in the test.
pub struct TestDevice {
    pub engine: SyncEngine,
    pub local: Arc<SqliteLocalStore>,
    pub identity: Arc<SessionIdentity>,
    pub remote: Arc<MemoryRemote>,
}

impl TestDevice {
    /// Anonymous device with an empty in-memory cache.
    pub fn new(remote: &Arc<MemoryRemote>) -> Result<Self, EngineError> {
        Self::with_store(
            remote,
            Arc::new(SqliteLocalStore::open_in_memory()?),
            Arc::new(SessionIdentity::anonymous()),
            SyncConfig::default(),
        )
    }

    pub fn signed_in(remote: &Arc<MemoryRemote>, user: &str) -> Result<Self, EngineError> {
        Self::with_store(
            remote,
            Arc::new(SqliteLocalStore::open_in_memory()?),
            Arc::new(SessionIdentity::signed_in(UserId::new(user))),
            SyncConfig::default(),
        )
    }

    /// Device over an existing cache, e.g. a file reopened after a restart.
    pub fn with_store(
        remote: &Arc<MemoryRemote>,
        local: Arc<SqliteLocalStore>,
        identity: Arc<SessionIdentity>,
        config: SyncConfig,
    ) -> Result<Self, EngineError> {
        let engine = SyncEngine::new(local.clone(), remote.clone(), identity.clone(), config)?;
        Ok(Self {
            engine,
            local,
            identity,
            remote: Arc::clone(remote),
        })
    }

    pub fn sign_in(&self, user: &str) {
        self.identity.sign_in(UserId::new(user));
    }

    pub fn sign_out(&self) {
        self.identity.sign_out();
    }
}

pub fn days_ago(days: i64) -> NaiveDate {
    today() - TimeDelta::days(days)
}
