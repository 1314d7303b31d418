//! Durable record of which candidates each user has already seen
//!
//! The store may receive the same id more than once (at-least-once appends);
//! both implementations collapse duplicates so the "already shown" check is
//! unaffected.

use crate::error::StoreError;
use crate::types::{CandidateId, UserId};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Previously shown candidate ids; empty for an unknown user
    async fn load(&self, user_id: UserId) -> Result<HashSet<CandidateId>, StoreError>;

    /// Durably record shown ids before the reply goes out
    async fn append(&self, user_id: UserId, candidate_ids: &[CandidateId]) -> Result<(), StoreError>;
}

/// Process-local gateway, used by tests and as a stand-in for the database.
/// Keeps raw appends (duplicates included) and de-duplicates on read.
#[derive(Default)]
pub struct MemoryGateway {
    records: Mutex<HashMap<UserId, Vec<CandidateId>>>,
    fail_loads: AtomicBool,
    fail_appends: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed history for a user
    pub fn with_history(self, user_id: UserId, candidate_ids: &[CandidateId]) -> Self {
        if let Ok(mut records) = self.records.lock() {
            records.entry(user_id).or_default().extend_from_slice(candidate_ids);
        }
        self
    }

    pub fn set_load_failure(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_append_failure(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Raw append log for a user, in write order
    pub fn appended(&self, user_id: UserId) -> Vec<CandidateId> {
        self.records
            .lock()
            .map(|records| records.get(&user_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory gateway lock poisoned".to_string())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, user_id: UserId) -> Result<HashSet<CandidateId>, StoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory gateway loads disabled".to_string()));
        }
        let records = self.records.lock().map_err(|_| Self::poisoned())?;
        Ok(records
            .get(&user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn append(&self, user_id: UserId, candidate_ids: &[CandidateId]) -> Result<(), StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory gateway appends disabled".to_string()));
        }
        let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
        records.entry(user_id).or_default().extend_from_slice(candidate_ids);
        Ok(())
    }
}

/// SQLite-backed gateway. One row per (user, candidate); re-appends are ignored.
#[derive(Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    /// Connect and make sure the schema exists.
    ///
    /// Failing here is fatal to startup: without the store the bot cannot
    /// guarantee that candidates are never shown twice.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let gateway = Self { pool };
        gateway.ensure_schema().await?;
        info!("Connected to shown-candidates store at {}", database_url);

        Ok(gateway)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS shown_candidates (
                user_id INTEGER NOT NULL,
                candidate_id INTEGER NOT NULL,
                shown_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, candidate_id)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self, user_id: UserId) -> Result<HashSet<CandidateId>, StoreError> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT candidate_id FROM shown_candidates WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        debug!("Loaded {} shown candidates for user {}", ids.len(), user_id);
        Ok(ids.into_iter().collect())
    }

    async fn append(&self, user_id: UserId, candidate_ids: &[CandidateId]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for candidate_id in candidate_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO shown_candidates (user_id, candidate_id) VALUES (?, ?)",
            )
            .bind(user_id)
            .bind(*candidate_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Recorded {} shown candidates for user {}", candidate_ids.len(), user_id);
        Ok(())
    }
}
