//! Sync engine
//!
//! Keeps the local cache converged with the remote store by polling:
//!
//! 1. Bootstrap: probe, load the cache (seeding an empty initialized cache on
//!    first run), push local state if the remote answered.
//! 2. Heartbeat: re-probe every `heartbeat_interval`.
//! 3. Reconciliation: every `reconcile_interval`, while the remote and the OS
//!    network are both up, pull the full snapshot and replace local state if
//!    it differs. The replacement is persisted without pushing back.
//! 4. Login: pull unconditionally and overwrite local state.
//! 5. Writes (see `mutations`): apply and persist locally, then propagate
//!    without waiting.
//! 6. Network events: "online" re-probes and pushes everything; "offline"
//!    flips to unavailable immediately.
//!
//! Remote failures never abort local work. They are logged and published as
//! [`SyncEvent`]s; the next scheduled tick is the only retry.

use crate::bus::{Bus, Subscription, SyncEvent};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityProber, ConnectivityState};
use crate::error::{SyncError, SyncResult};
use crate::local_db::LocalCache;
use crate::metrics::DashboardMetrics;
use crate::models::{AppUser, Company, Credentials, EmailLog, Snapshot};
use crate::remote::{HttpRemote, Propagation, RemoteStore};
use chrono::{DateTime, Local, TimeZone};
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// OS-level network transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Online,
    Offline,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Remote or OS network unavailable; nothing fetched
    Skipped,
    /// Remote snapshot equals local state
    Unchanged,
    /// Local state replaced by the remote snapshot
    Replaced,
    /// The pull or the local write failed
    Failed,
}

/// The collections guarded together so a local write completes before any
/// interleaved pull can replace them
#[derive(Debug, Clone, Default)]
pub(crate) struct Collections {
    pub(crate) companies: Vec<Company>,
    pub(crate) logs: Vec<EmailLog>,
    pub(crate) users: Vec<AppUser>,
}

impl Collections {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            contacts: self.companies.clone(),
            logs: self.logs.clone(),
        }
    }

    fn matches(&self, snapshot: &Snapshot) -> bool {
        self.companies == snapshot.contacts && self.logs == snapshot.logs
    }
}

pub(crate) struct EngineInner {
    pub(crate) config: SyncConfig,
    pub(crate) cache: LocalCache,
    pub(crate) remote: Arc<dyn RemoteStore>,
    pub(crate) prober: ConnectivityProber,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) data: Mutex<Collections>,
    pub(crate) data_changed: Bus<()>,
    pub(crate) events: Bus<SyncEvent>,
    os_online: AtomicBool,
    tasks: SyncMutex<Vec<JoinHandle<()>>>,
}

/// Long-lived sync context. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Open the local cache and HTTP client described by `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the cache cannot be
    /// opened, or the HTTP client cannot be built.
    pub async fn open(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let cache = LocalCache::open(&config.local_db()).await?;
        let remote = Arc::new(HttpRemote::new(config.request_timeout)?);
        Ok(Self::with_parts(config, cache, remote, Arc::new(SystemClock)))
    }

    /// Assemble an engine from explicit collaborators
    pub fn with_parts(
        config: SyncConfig,
        cache: LocalCache,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let events = Bus::new();
        let prober = ConnectivityProber::new(
            Arc::clone(&remote),
            config.primary_base.clone(),
            config.fallback_base.clone(),
            events.clone(),
        );

        Self {
            inner: Arc::new(EngineInner {
                config,
                cache,
                remote,
                prober,
                clock,
                data: Mutex::new(Collections::default()),
                data_changed: Bus::new(),
                events,
                os_online: AtomicBool::new(true),
                tasks: SyncMutex::new(Vec::new()),
            }),
        }
    }

    /// Probe, load the local cache, and push local state if the remote is up
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` if the cache cannot be read or seeded.
    /// Remote failures are not errors.
    pub async fn bootstrap(&self) -> SyncResult<()> {
        self.inner.prober.probe().await;

        let cached = self.inner.cache.load().await?;
        for key in &cached.corrupted {
            self.emit(SyncEvent::CacheCorrupted { key: key.clone() });
        }

        {
            let mut data = self.inner.data.lock().await;
            data.companies = cached.companies;
            data.logs = cached.logs;
            data.users = cached.users;

            if !cached.initialized || !cached.corrupted.is_empty() {
                self.inner
                    .cache
                    .persist(&data.companies, &data.logs, &data.users)
                    .await?;
            }

            tracing::info!(
                companies = data.companies.len(),
                logs = data.logs.len(),
                users = data.users.len(),
                first_run = !cached.initialized,
                "Local cache loaded"
            );
        }

        if self.is_remote_available() {
            // Assert writes made while offline in a previous session
            let _ = self.push_all().await;
        }

        Ok(())
    }

    /// Start the heartbeat and reconciliation timers. Calling again restarts
    /// them.
    ///
    /// Each heartbeat runs [`SyncEngine::heartbeat`], so a remote that comes
    /// back receives the writes made while it was away.
    pub fn start(&self) {
        self.dispose();

        let config = &self.inner.config;
        let heartbeat = self.spawn_ticker(config.heartbeat_interval, |engine| async move {
            engine.heartbeat().await;
        });
        let reconcile = self.spawn_ticker(config.reconcile_interval, |engine| async move {
            engine.reconcile().await;
        });

        let mut tasks = self.inner.tasks.lock();
        tasks.push(heartbeat);
        tasks.push(reconcile);

        tracing::info!(
            heartbeat_secs = self.inner.config.heartbeat_interval.as_secs(),
            reconcile_secs = self.inner.config.reconcile_interval.as_secs(),
            "Background sync started"
        );
    }

    /// Stop all timers. In-flight propagations are left to finish.
    pub fn dispose(&self) {
        let mut tasks = self.inner.tasks.lock();
        if tasks.is_empty() {
            return;
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Background sync stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.tasks.lock().iter().any(|t| !t.is_finished())
    }

    fn spawn_ticker<F, Fut>(&self, period: Duration, tick: F) -> JoinHandle<()>
    where
        F: Fn(SyncEngine) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        // Hold only a weak reference so a dropped engine ends its timers
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let first_tick = Instant::now() + period;

        tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                tick(SyncEngine { inner }).await;
            }
        })
    }

    /// Re-probe connectivity now
    pub async fn probe(&self) -> bool {
        self.inner.prober.probe().await
    }

    /// Re-probe, and push local state when the remote answers after being
    /// unreachable. Returns the new availability.
    pub async fn heartbeat(&self) -> bool {
        let was_available = self.is_remote_available();
        let available = self.inner.prober.probe().await;
        if available && !was_available {
            tracing::info!(
                base = %self.inner.prober.api_base(),
                "Remote reachable again; pushing local state"
            );
            let _ = self.push_all().await;
        }
        available
    }

    /// Pull the remote snapshot and replace local state if it differs.
    ///
    /// Skipped unless both the remote and the OS network are available.
    pub async fn reconcile(&self) -> ReconcileOutcome {
        if !self.is_remote_available() || !self.is_os_online() {
            return ReconcileOutcome::Skipped;
        }

        let base = self.inner.prober.api_base().to_string();
        let snapshot = match self.inner.remote.fetch_snapshot(&base).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(base = %base, error = %e, "Background sync check failed");
                self.emit(SyncEvent::PullFailed { error: e.to_string() });
                return ReconcileOutcome::Failed;
            }
        };

        let mut data = self.inner.data.lock().await;
        if data.matches(&snapshot) {
            tracing::trace!("Remote snapshot unchanged");
            return ReconcileOutcome::Unchanged;
        }

        let replaced = self.replace_from(&mut data, snapshot).await;
        drop(data);

        if replaced.is_ok() {
            self.inner.data_changed.publish(&());
            ReconcileOutcome::Replaced
        } else {
            ReconcileOutcome::Failed
        }
    }

    /// Pull the remote snapshot and overwrite local state unconditionally.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::RemoteUnavailable` when offline, or the pull or
    /// persist error.
    pub async fn pull_full(&self) -> SyncResult<()> {
        if !self.is_remote_available() {
            return Err(SyncError::RemoteUnavailable);
        }

        let base = self.inner.prober.api_base().to_string();
        tracing::info!(base = %base, "Pulling full snapshot");
        let snapshot = self.inner.remote.fetch_snapshot(&base).await.map_err(|e| {
            tracing::warn!(error = %e, "Full sync pull failed");
            self.emit(SyncEvent::PullFailed { error: e.to_string() });
            e
        })?;

        {
            let mut data = self.inner.data.lock().await;
            self.replace_from(&mut data, snapshot).await?;
        }
        self.inner.data_changed.publish(&());
        Ok(())
    }

    async fn replace_from(
        &self,
        data: &mut MutexGuard<'_, Collections>,
        snapshot: Snapshot,
    ) -> SyncResult<()> {
        self.inner
            .cache
            .persist(&snapshot.contacts, &snapshot.logs, &data.users)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to persist remote snapshot");
                self.emit(SyncEvent::PersistFailed { error: e.to_string() });
                e
            })?;

        tracing::info!(
            companies = snapshot.contacts.len(),
            logs = snapshot.logs.len(),
            "Local state replaced from remote"
        );
        self.emit(SyncEvent::Reconciled {
            companies: snapshot.contacts.len(),
            logs: snapshot.logs.len(),
        });

        data.companies = snapshot.contacts;
        data.logs = snapshot.logs;
        Ok(())
    }

    /// Push every local company and log to the remote store
    ///
    /// # Errors
    ///
    /// Returns `SyncError::RemoteUnavailable` when offline, or the push error.
    pub async fn push_all(&self) -> SyncResult<()> {
        if !self.is_remote_available() {
            return Err(SyncError::RemoteUnavailable);
        }

        let snapshot = self.inner.data.lock().await.snapshot();
        let base = self.inner.prober.api_base().to_string();

        self.inner
            .remote
            .push_snapshot(&base, &snapshot)
            .await
            .map_err(|e| {
                tracing::warn!(base = %base, error = %e, "Remote sync failed");
                self.emit(SyncEvent::PushFailed { error: e.to_string() });
                e
            })?;

        tracing::debug!(
            companies = snapshot.contacts.len(),
            logs = snapshot.logs.len(),
            "Pushed local state"
        );
        Ok(())
    }

    /// React to an OS connectivity transition reported by the host.
    ///
    /// Hosts without OS network notifications rely on the heartbeat, which
    /// pushes on its own when the remote comes back.
    pub async fn handle_network_event(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::Online => {
                self.inner.os_online.store(true, Ordering::SeqCst);
                tracing::info!("Network online; verifying connection and syncing");
                if self.inner.prober.probe().await {
                    let _ = self.push_all().await;
                }
            }
            NetworkEvent::Offline => {
                self.inner.os_online.store(false, Ordering::SeqCst);
                self.inner.prober.mark_offline();
            }
        }
    }

    /// Log in against the remote store, then make local state match it.
    ///
    /// Requires the remote: without a server-verified identity no session is
    /// established. After a successful login the full snapshot is pulled;
    /// admins then pull the full user list, other users collapse the local
    /// list to themselves.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::RemoteUnavailable` if no base answers,
    /// `SyncError::InvalidCredentials` if the remote rejects the login, or a
    /// network/database error.
    pub async fn authenticate(&self, username: &str, password: &str) -> SyncResult<AppUser> {
        if !self.inner.prober.probe().await {
            return Err(SyncError::RemoteUnavailable);
        }

        let base = self.inner.prober.api_base().to_string();
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        let user = self.inner.remote.login(&base, &credentials).await?;
        tracing::info!(user_id = %user.id, role = ?user.role, "Authenticated");

        // Login still succeeds if the pull fails; the next reconcile retries
        let _ = self.pull_full().await;

        if user.is_admin() {
            let _ = self.sync_users().await;
        } else {
            let mut data = self.inner.data.lock().await;
            data.users = vec![user.clone()];
            self.inner
                .cache
                .persist(&data.companies, &data.logs, &data.users)
                .await?;
        }

        self.inner.cache.save_session(Some(&user)).await?;
        Ok(user)
    }

    /// Replace the local user list with the remote one
    ///
    /// # Errors
    ///
    /// Returns `SyncError::RemoteUnavailable` when offline, or the fetch or
    /// persist error.
    pub async fn sync_users(&self) -> SyncResult<()> {
        if !self.is_remote_available() {
            return Err(SyncError::RemoteUnavailable);
        }

        let base = self.inner.prober.api_base().to_string();
        let users = self.inner.remote.list_users(&base).await.map_err(|e| {
            tracing::warn!(error = %e, "User sync failed");
            self.emit(SyncEvent::PullFailed { error: e.to_string() });
            e
        })?;

        let mut data = self.inner.data.lock().await;
        self.inner
            .cache
            .persist(&data.companies, &data.logs, &users)
            .await?;
        data.users = users;
        Ok(())
    }

    /// The signed-in user restored from the local cache
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` on read failure.
    pub async fn current_user(&self) -> SyncResult<Option<AppUser>> {
        self.inner.cache.load_session().await
    }

    /// Forget the signed-in user; cached collections are kept
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` on write failure.
    pub async fn logout(&self) -> SyncResult<()> {
        self.inner.cache.save_session(None).await
    }

    /// Wipe local state and re-seed an empty initialized cache
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` on write failure.
    pub async fn reset_local(&self) -> SyncResult<()> {
        let mut data = self.inner.data.lock().await;
        self.inner.cache.clear().await?;
        *data = Collections::default();
        self.inner.cache.persist(&[], &[], &[]).await?;
        drop(data);

        self.inner.data_changed.publish(&());
        Ok(())
    }

    /// Send `change` to the remote without waiting. Skipped while offline.
    pub(crate) fn propagate(&self, change: Propagation) -> Option<JoinHandle<()>> {
        if !self.is_remote_available() {
            tracing::debug!(
                entity = change.entity(),
                id = %change.target(),
                "Offline; propagation deferred to next sync"
            );
            return None;
        }

        let base = self.inner.prober.api_base().to_string();
        let remote = Arc::clone(&self.inner.remote);
        let events = self.inner.events.clone();

        Some(tokio::spawn(async move {
            if let Err(e) = remote.propagate(&base, &change).await {
                tracing::warn!(
                    entity = change.entity(),
                    id = %change.target(),
                    remote = e.is_remote(),
                    error = %e,
                    "Propagation failed"
                );
                events.publish(&SyncEvent::PropagationFailed {
                    entity: change.entity(),
                    id: change.target(),
                    error: e.to_string(),
                });
            }
        }))
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        self.inner.events.publish(&event);
    }

    /// Last known remote reachability
    pub fn is_remote_available(&self) -> bool {
        self.inner.prober.is_available()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.inner.prober.state()
    }

    /// Whether the OS last reported network connectivity
    pub fn is_os_online(&self) -> bool {
        self.inner.os_online.load(Ordering::SeqCst)
    }

    /// Base address currently used for remote calls
    pub fn api_base(&self) -> String {
        self.inner.prober.api_base().to_string()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &LocalCache {
        &self.inner.cache
    }

    /// Subscribe to connectivity results
    pub fn on_status_change<F>(&self, callback: F) -> Subscription<bool>
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.inner.prober.subscribe(callback)
    }

    /// Subscribe to "local data replaced" notifications
    pub fn on_data_change<F>(&self, callback: F) -> Subscription<()>
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.inner.data_changed.subscribe(callback)
    }

    /// Subscribe to structured sync events, failures included
    pub fn on_sync_event<F>(&self, callback: F) -> Subscription<SyncEvent>
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    /// Engagement metrics for local state as of `now`
    pub async fn metrics_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DashboardMetrics {
        let data = self.inner.data.lock().await;
        DashboardMetrics::compute(&data.companies, &data.logs, now)
    }

    /// Engagement metrics in the local time zone as of the engine clock
    pub async fn metrics(&self) -> DashboardMetrics {
        let now = self.local_now();
        self.metrics_at(&now).await
    }

    /// Open follow-ups whose date falls on the same day as `now`
    pub async fn follow_ups_due_on<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Vec<EmailLog> {
        let data = self.inner.data.lock().await;
        crate::metrics::follow_ups_due_on(&data.logs, now)
    }

    /// Open follow-ups due today in the local time zone
    pub async fn follow_ups_due_today(&self) -> Vec<EmailLog> {
        let now = self.local_now();
        self.follow_ups_due_on(&now).await
    }

    fn local_now(&self) -> DateTime<Local> {
        Local
            .timestamp_millis_opt(self.inner.clock.now_millis())
            .single()
            .unwrap_or_else(Local::now)
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
