//! Remote store protocol
//!
//! The remote store is a black box reached over HTTP:
//! - `GET  {base}/api/ping`: reachability
//! - `GET  {base}/api/sync/all`: full snapshot pull
//! - `POST {base}/api/sync`: upsert-by-id push of contacts and logs
//! - `POST {base}/api/auth/login`: credential check
//! - `GET  {base}/api/users`: user list, passwords stripped
//! - `POST/PATCH/DELETE` on `/api/contacts`, `/api/logs`, `/api/users` for
//!   single-entity propagation
//!
//! Every call takes the base address explicitly because the connectivity
//! prober decides per probe whether the primary or fallback base answers.

use crate::error::{SyncError, SyncResult};
use crate::models::{AppUser, Company, Credentials, EmailLog, Snapshot, UserPatch};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single-entity change sent to the remote store without waiting on it.
///
/// Company and log writes are full upserts so an entity the remote never
/// received is created rather than dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propagation {
    UpsertCompany(Company),
    DeleteCompany(String),
    UpsertLog(EmailLog),
    DeleteLog(String),
    /// Carries the password so the remote store can hash it
    CreateUser(AppUser),
    PatchUser { id: String, patch: UserPatch },
    DeleteUser(String),
    /// Several entities at once through the bulk sync endpoint
    Batch(Snapshot),
}

impl Propagation {
    /// Entity collection the change targets
    pub fn entity(&self) -> &'static str {
        match self {
            Propagation::UpsertCompany(_) | Propagation::DeleteCompany(_) => "contact",
            Propagation::UpsertLog(_) | Propagation::DeleteLog(_) => "log",
            Propagation::CreateUser(_)
            | Propagation::PatchUser { .. }
            | Propagation::DeleteUser(_) => "user",
            Propagation::Batch(_) => "batch",
        }
    }

    /// Identifier of the affected entity, or a count for batches
    pub fn target(&self) -> String {
        match self {
            Propagation::UpsertCompany(c) => c.id.clone(),
            Propagation::UpsertLog(l) => l.id.clone(),
            Propagation::CreateUser(u) => u.id.clone(),
            Propagation::DeleteCompany(id)
            | Propagation::DeleteLog(id)
            | Propagation::DeleteUser(id)
            | Propagation::PatchUser { id, .. } => id.clone(),
            Propagation::Batch(s) => format!("{}+{}", s.contacts.len(), s.logs.len()),
        }
    }
}

/// Request/response access to the remote store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Succeeds iff `base` answered the ping with a success status
    async fn ping(&self, base: &str) -> SyncResult<()>;

    /// Fetch the full snapshot of both collections
    async fn fetch_snapshot(&self, base: &str) -> SyncResult<Snapshot>;

    /// Upsert every entity in `snapshot` by id
    async fn push_snapshot(&self, base: &str, snapshot: &Snapshot) -> SyncResult<()>;

    /// Returns the user on success, `SyncError::InvalidCredentials` on a
    /// non-success status
    async fn login(&self, base: &str, credentials: &Credentials) -> SyncResult<AppUser>;

    async fn list_users(&self, base: &str) -> SyncResult<Vec<AppUser>>;

    async fn propagate(&self, base: &str, change: &Propagation) -> SyncResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginResponse {
    user: AppUser,
}

/// reqwest-backed [`RemoteStore`]
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
}

impl HttpRemote {
    /// Create a client whose every request is bounded by `timeout`
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Internal` if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> SyncResult<reqwest::Response> {
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(SyncError::Network(format!(
                "{what} failed with status: {}",
                response.status()
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn ping(&self, base: &str) -> SyncResult<()> {
        let url = Self::url(base, "/api/ping");
        self.send(self.client.get(&url), "Ping").await?;
        Ok(())
    }

    async fn fetch_snapshot(&self, base: &str) -> SyncResult<Snapshot> {
        let url = Self::url(base, "/api/sync/all");
        let response = self.send(self.client.get(&url), "Pull").await?;

        Ok(response.json::<Snapshot>().await?)
    }

    async fn push_snapshot(&self, base: &str, snapshot: &Snapshot) -> SyncResult<()> {
        let url = Self::url(base, "/api/sync");
        self.send(self.client.post(&url).json(snapshot), "Push").await?;
        Ok(())
    }

    async fn login(&self, base: &str, credentials: &Credentials) -> SyncResult<AppUser> {
        let url = Self::url(base, "/api/auth/login");
        let response = self.client.post(&url).json(credentials).send().await?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "Login rejected by remote");
            return Err(SyncError::InvalidCredentials);
        }

        let body: LoginResponse = response.json().await?;
        Ok(body.user.without_password())
    }

    async fn list_users(&self, base: &str) -> SyncResult<Vec<AppUser>> {
        let url = Self::url(base, "/api/users");
        let response = self.send(self.client.get(&url), "User list").await?;

        let users: Vec<AppUser> = response.json().await?;
        Ok(users.iter().map(AppUser::without_password).collect())
    }

    async fn propagate(&self, base: &str, change: &Propagation) -> SyncResult<()> {
        let request = match change {
            Propagation::UpsertCompany(company) => {
                self.client.post(Self::url(base, "/api/contacts")).json(company)
            }
            Propagation::DeleteCompany(id) => {
                self.client.delete(Self::url(base, &format!("/api/contacts/{id}")))
            }
            Propagation::UpsertLog(log) => self.client.post(Self::url(base, "/api/logs")).json(log),
            Propagation::DeleteLog(id) => {
                self.client.delete(Self::url(base, &format!("/api/logs/{id}")))
            }
            Propagation::CreateUser(user) => {
                self.client.post(Self::url(base, "/api/users")).json(user)
            }
            Propagation::PatchUser { id, patch } => self
                .client
                .patch(Self::url(base, &format!("/api/users/{id}")))
                .json(patch),
            Propagation::DeleteUser(id) => {
                self.client.delete(Self::url(base, &format!("/api/users/{id}")))
            }
            Propagation::Batch(snapshot) => {
                self.client.post(Self::url(base, "/api/sync")).json(snapshot)
            }
        };

        self.send(request, "Propagation").await?;
        Ok(())
    }
}
