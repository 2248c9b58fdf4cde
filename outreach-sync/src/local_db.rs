//! Local SQLite cache for offline-first operation
//!
//! Provides:
//! - Durable storage of the companies, logs, and users collections
//! - The "initialized" marker distinguishing a first run from an empty cache
//! - The signed-in session user
//!
//! Every record lives in a single key-value table, one JSON document per key.
//! A key holding unreadable JSON resets only that collection to empty.

use crate::error::{SyncError, SyncResult};
use crate::models::{AppUser, Company, EmailLog};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::sync::atomic::{AtomicU64, Ordering};

pub const KEY_COMPANIES: &str = "outreach_companies_v3";
pub const KEY_LOGS: &str = "outreach_logs_v3";
pub const KEY_USERS: &str = "outreach_users_v1";
pub const KEY_INITIALIZED: &str = "outreach_initialized";
pub const KEY_CURRENT_USER: &str = "outreach_current_user";

const UPSERT_SQL: &str = r#"
    INSERT INTO kv_store (key, value, updated_at)
    VALUES (?, ?, ?)
    ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at
"#;

/// Configuration for the local cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDbConfig {
    /// Path to the database file
    pub db_path: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
}

impl Default for LocalDbConfig {
    fn default() -> Self {
        Self {
            db_path: "outreach_local.db".to_string(),
            max_connections: 5,
            enable_wal: true,
        }
    }
}

/// Everything read back by [`LocalCache::load`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedState {
    pub companies: Vec<Company>,
    pub logs: Vec<EmailLog>,
    pub users: Vec<AppUser>,
    pub initialized: bool,
    /// Keys whose contents could not be decoded and were reset
    pub corrupted: Vec<String>,
}

/// Local cache handle
pub struct LocalCache {
    pool: SqlitePool,
    persist_count: AtomicU64,
}

impl LocalCache {
    /// Open (creating if needed) the cache database
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` if the file cannot be opened or the
    /// schema cannot be created.
    pub async fn open(config: &LocalDbConfig) -> SyncResult<Self> {
        let journal_mode = if config.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        let options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true)
            .journal_mode(journal_mode);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        let cache = Self {
            pool,
            persist_count: AtomicU64::new(0),
        };
        cache.initialize_schema().await?;

        tracing::debug!(db_path = %config.db_path, "Opened local cache");

        Ok(cache)
    }

    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    /// Whether the initialized marker is present
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` on read failure.
    pub async fn is_initialized(&self) -> SyncResult<bool> {
        Ok(self.get(KEY_INITIALIZED).await?.as_deref() == Some("true"))
    }

    /// Read all persisted collections.
    ///
    /// Returns empty collections when the initialized marker is absent.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` on read failure. Undecodable JSON is not
    /// an error; the key is listed in `corrupted` instead.
    pub async fn load(&self) -> SyncResult<CachedState> {
        if !self.is_initialized().await? {
            return Ok(CachedState::default());
        }

        let mut state = CachedState {
            initialized: true,
            ..CachedState::default()
        };
        state.companies = self.read_collection(KEY_COMPANIES, &mut state.corrupted).await?;
        state.logs = self.read_collection(KEY_LOGS, &mut state.corrupted).await?;
        state.users = self.read_collection(KEY_USERS, &mut state.corrupted).await?;

        Ok(state)
    }

    async fn read_collection<T: DeserializeOwned>(
        &self,
        key: &str,
        corrupted: &mut Vec<String>,
    ) -> SyncResult<Vec<T>> {
        let Some(raw) = self.get(key).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(items) => Ok(items),
            Err(e) => {
                tracing::warn!(key = key, error = %e, "Discarding unreadable cache entry");
                corrupted.push(key.to_string());
                Ok(Vec::new())
            }
        }
    }

    /// Write all three collections, then the initialized marker, in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` if a collection cannot be encoded
    /// (nothing is written in that case) or `SyncError::Database` if the
    /// transaction fails.
    pub async fn persist(
        &self,
        companies: &[Company],
        logs: &[EmailLog],
        users: &[AppUser],
    ) -> SyncResult<()> {
        // Encode everything up front so a failure cannot leave a partial write
        let entries = [
            (KEY_COMPANIES, serde_json::to_string(companies)?),
            (KEY_LOGS, serde_json::to_string(logs)?),
            (KEY_USERS, serde_json::to_string(users)?),
            (KEY_INITIALIZED, "true".to_string()),
        ];
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        for (key, value) in &entries {
            sqlx::query(UPSERT_SQL)
                .bind(*key)
                .bind(value.as_str())
                .bind(now.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.persist_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            companies = companies.len(),
            logs = logs.len(),
            users = users.len(),
            "Persisted local cache"
        );

        Ok(())
    }

    /// Number of successful [`LocalCache::persist`] calls on this handle
    pub fn persist_count(&self) -> u64 {
        self.persist_count.load(Ordering::Relaxed)
    }

    /// Read the signed-in user, if any
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` on read failure.
    pub async fn load_session(&self) -> SyncResult<Option<AppUser>> {
        let Some(raw) = self.get(KEY_CURRENT_USER).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable session user");
                Ok(None)
            }
        }
    }

    /// Store or clear the signed-in user
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` on write failure.
    pub async fn save_session(&self, user: Option<&AppUser>) -> SyncResult<()> {
        match user {
            Some(user) => {
                let value = serde_json::to_string(&user.without_password())?;
                sqlx::query(UPSERT_SQL)
                    .bind(KEY_CURRENT_USER)
                    .bind(value)
                    .bind(Utc::now().to_rfc3339())
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM kv_store WHERE key = ?")
                    .bind(KEY_CURRENT_USER)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Remove every key, returning the cache to its first-run state
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` on write failure.
    pub async fn clear(&self) -> SyncResult<()> {
        sqlx::query("DELETE FROM kv_store")
            .execute(&self.pool)
            .await?;
        tracing::info!("Cleared local cache");
        Ok(())
    }

    /// Overwrite a raw key. Intended for repair tooling and tests.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidInput` for unknown keys, or
    /// `SyncError::Database` on write failure.
    pub async fn put_raw(&self, key: &str, value: &str) -> SyncResult<()> {
        if ![
            KEY_COMPANIES,
            KEY_LOGS,
            KEY_USERS,
            KEY_INITIALIZED,
            KEY_CURRENT_USER,
        ]
        .contains(&key)
        {
            return Err(SyncError::InvalidInput(format!("unknown cache key: {key}")));
        }

        sqlx::query(UPSERT_SQL)
            .bind(key)
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Close database connection
    pub async fn close(self) {
        self.pool.close().await;
    }
}
