//! Engine configuration
//!
//! Layered: built-in defaults, then an optional TOML/YAML/JSON file, then
//! `OUTREACH_*` environment variables (a `.env` file is honored).

use crate::error::{SyncError, SyncResult};
use crate::local_db::LocalDbConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default remote reached when the primary base does not answer
pub const DEFAULT_FALLBACK_BASE: &str = "http://localhost:4000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base address tried first by every probe
    pub primary_base: String,
    /// Base address tried when the primary does not answer
    pub fallback_base: String,
    /// Interval between connectivity probes (seconds when serialized)
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,
    /// Interval between reconciliation pulls (seconds when serialized)
    #[serde(with = "duration_secs")]
    pub reconcile_interval: Duration,
    /// Upper bound on any single remote request (seconds when serialized)
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Path to the local cache database
    pub db_path: String,
    pub max_connections: u32,
    pub enable_wal: bool,
    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

// Serialize Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        let local_db = LocalDbConfig::default();
        Self {
            primary_base: "http://localhost:8080".to_string(),
            fallback_base: DEFAULT_FALLBACK_BASE.to_string(),
            heartbeat_interval: Duration::from_secs(8),
            reconcile_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(8),
            db_path: local_db.db_path,
            max_connections: local_db.max_connections,
            enable_wal: local_db.enable_wal,
            json_logs: false,
        }
    }
}

impl SyncConfig {
    /// Load configuration from defaults, `file` (or `outreach-sync.*` in the
    /// working directory if present), and the environment.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` if a source cannot be parsed or the
    /// resulting values fail validation.
    pub fn load(file: Option<&Path>) -> SyncResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::trace!(error = %e, "No .env file loaded");
        }

        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&SyncConfig::default())?);

        builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("outreach-sync").required(false)),
        };

        let loaded: SyncConfig = builder
            .add_source(config::Environment::with_prefix("OUTREACH").try_parsing(true))
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// # Errors
    ///
    /// Returns `SyncError::Config` naming the first invalid field.
    pub fn validate(&self) -> SyncResult<()> {
        if self.fallback_base.trim().is_empty() {
            return Err(SyncError::Config("fallback_base must not be empty".to_string()));
        }
        for (name, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("reconcile_interval", self.reconcile_interval),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(SyncError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.db_path.trim().is_empty() {
            return Err(SyncError::Config("db_path must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn local_db(&self) -> LocalDbConfig {
        LocalDbConfig {
            db_path: self.db_path.clone(),
            max_connections: self.max_connections,
            enable_wal: self.enable_wal,
        }
    }
}
