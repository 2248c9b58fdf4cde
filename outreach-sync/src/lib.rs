//! Offline-first synchronization engine for outreach CRM data
//!
//! Provides:
//! - Local SQLite cache that is the single source of truth for reads
//! - Connectivity probing with a fallback remote base
//! - Polling reconciliation against the remote store
//! - Local-first mutations with fire-and-forget propagation
//! - Change notification for "data replaced" and connectivity status

pub mod bus;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod local_db;
pub mod metrics;
pub mod models;
mod mutations;
pub mod remote;

pub use bus::{Bus, Subscription, SyncEvent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use connectivity::{ApiBase, ConnectivityProber, ConnectivityState};
pub use engine::{NetworkEvent, ReconcileOutcome, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use local_db::{CachedState, LocalCache, LocalDbConfig};
pub use metrics::DashboardMetrics;
pub use models::{
    AppUser, BulkAddReport, BulkRejection, Company, CompanyPatch, EmailLog, EmailType, LogPatch,
    NewCompany, NewLog, NewUser, Role, Snapshot, UserPatch,
};
pub use remote::{HttpRemote, Propagation, RemoteStore};
