#![allow(dead_code)]

use async_trait::async_trait;
use outreach_sync::{
    AppUser, CachedState, Company, EmailLog, LocalCache, LocalDbConfig, ManualClock, Propagation,
    RemoteStore, Role, Snapshot, SyncConfig, SyncEngine, SyncError, SyncResult,
};
use outreach_sync::models::Credentials;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tempfile::TempDir;

pub const PRIMARY: &str = "http://primary.test";
pub const FALLBACK: &str = "http://fallback.test";
pub const START_MILLIS: i64 = 1_710_504_000_000;

#[derive(Default)]
struct FakeState {
    up: HashSet<String>,
    snapshot: Snapshot,
    users: Vec<AppUser>,
    passwords: HashMap<String, String>,
    fetches: usize,
    pushes: Vec<Snapshot>,
    propagations: Vec<Propagation>,
    fail_fetch: bool,
    apply_writes: bool,
    fail_propagations: usize,
}

fn upsert<T: Clone>(items: &mut Vec<T>, item: &T, same: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = item.clone(),
        None => items.push(item.clone()),
    }
}

impl FakeState {
    /// Apply a write the way the server does: posts upsert by id, deletes
    /// remove, a contact delete cascades to its logs.
    fn apply(&mut self, change: &Propagation) {
        let snapshot = &mut self.snapshot;
        match change {
            Propagation::UpsertCompany(company) => {
                upsert(&mut snapshot.contacts, company, |c| c.id == company.id);
            }
            Propagation::DeleteCompany(id) => {
                snapshot.contacts.retain(|c| &c.id != id);
                snapshot.logs.retain(|l| &l.company_id != id);
            }
            Propagation::UpsertLog(log) => upsert(&mut snapshot.logs, log, |l| l.id == log.id),
            Propagation::DeleteLog(id) => snapshot.logs.retain(|l| &l.id != id),
            Propagation::Batch(batch) => {
                for company in &batch.contacts {
                    upsert(&mut snapshot.contacts, company, |c| c.id == company.id);
                }
                for log in &batch.logs {
                    upsert(&mut snapshot.logs, log, |l| l.id == log.id);
                }
            }
            Propagation::CreateUser(_)
            | Propagation::PatchUser { .. }
            | Propagation::DeleteUser(_) => {}
        }
    }
}

/// In-memory remote store that records every call
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_up(&self, base: &str, up: bool) {
        let mut state = self.state.lock();
        if up {
            state.up.insert(base.to_string());
        } else {
            state.up.remove(base);
        }
    }

    pub fn set_snapshot(&self, snapshot: Snapshot) {
        self.state.lock().snapshot = snapshot;
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.state.lock().fail_fetch = fail;
    }

    /// Make pushes and propagations change the served snapshot
    pub fn set_apply_writes(&self, apply: bool) {
        self.state.lock().apply_writes = apply;
    }

    /// Reject the next `count` propagations with a server error
    pub fn fail_next_propagations(&self, count: usize) {
        self.state.lock().fail_propagations = count;
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn add_account(&self, user: AppUser, password: &str) {
        let mut state = self.state.lock();
        state.passwords.insert(user.username.clone(), password.to_string());
        state.users.push(user);
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().fetches
    }

    pub fn pushes(&self) -> Vec<Snapshot> {
        self.state.lock().pushes.clone()
    }

    pub fn propagations(&self) -> Vec<Propagation> {
        self.state.lock().propagations.clone()
    }

    fn check(&self, base: &str) -> SyncResult<()> {
        if self.state.lock().up.contains(base) {
            Ok(())
        } else {
            Err(SyncError::Network(format!("{base} unreachable")))
        }
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn ping(&self, base: &str) -> SyncResult<()> {
        self.check(base)
    }

    async fn fetch_snapshot(&self, base: &str) -> SyncResult<Snapshot> {
        self.check(base)?;
        let mut state = self.state.lock();
        state.fetches += 1;
        if state.fail_fetch {
            return Err(SyncError::Network("pull failed with status: 500".into()));
        }
        Ok(state.snapshot.clone())
    }

    async fn push_snapshot(&self, base: &str, snapshot: &Snapshot) -> SyncResult<()> {
        self.check(base)?;
        let mut state = self.state.lock();
        state.pushes.push(snapshot.clone());
        if state.apply_writes {
            state.apply(&Propagation::Batch(snapshot.clone()));
        }
        Ok(())
    }

    async fn login(&self, base: &str, credentials: &Credentials) -> SyncResult<AppUser> {
        self.check(base)?;
        let state = self.state.lock();
        if state.passwords.get(&credentials.username) != Some(&credentials.password) {
            return Err(SyncError::InvalidCredentials);
        }
        state
            .users
            .iter()
            .find(|u| u.username == credentials.username)
            .cloned()
            .ok_or(SyncError::InvalidCredentials)
    }

    async fn list_users(&self, base: &str) -> SyncResult<Vec<AppUser>> {
        self.check(base)?;
        Ok(self.state.lock().users.clone())
    }

    async fn propagate(&self, base: &str, change: &Propagation) -> SyncResult<()> {
        self.check(base)?;
        let mut state = self.state.lock();
        if state.fail_propagations > 0 {
            state.fail_propagations -= 1;
            return Err(SyncError::Network("write failed with status: 500".into()));
        }
        state.propagations.push(change.clone());
        if state.apply_writes {
            state.apply(change);
        }
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub engine: SyncEngine,
    pub remote: Arc<FakeRemote>,
    pub clock: Arc<ManualClock>,
}

pub fn config_for(dir: &TempDir) -> SyncConfig {
    SyncConfig {
        primary_base: PRIMARY.to_string(),
        fallback_base: FALLBACK.to_string(),
        db_path: dir.path().join("outreach.db").to_string_lossy().to_string(),
        ..SyncConfig::default()
    }
}

pub async fn open_cache(config: &SyncConfig) -> LocalCache {
    LocalCache::open(&LocalDbConfig {
        db_path: config.db_path.clone(),
        ..LocalDbConfig::default()
    })
    .await
    .unwrap()
}

/// What a fresh process would load from the cache file in `dir`
pub async fn reload(dir: &TempDir) -> CachedState {
    open_cache(&config_for(dir)).await.load().await.unwrap()
}

/// Engine over a fresh cache, not yet bootstrapped
pub async fn harness(remote: Arc<FakeRemote>) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    let cache = open_cache(&config).await;
    let clock = Arc::new(ManualClock::new(START_MILLIS));

    let engine = SyncEngine::with_parts(config, cache, remote.clone(), clock.clone());
    Harness {
        dir,
        engine,
        remote,
        clock,
    }
}

/// Let spawned propagation tasks run to completion
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

pub fn company(id: &str, email: &str, created_at: i64) -> Company {
    Company {
        id: id.to_string(),
        company_name: format!("Company {id}"),
        emails: vec![email.to_string()],
        phone_number: None,
        tags: vec![],
        location: None,
        notes: None,
        is_interested: false,
        created_at,
    }
}

pub fn log(id: &str, company_id: &str, address: &str, date_sent: i64) -> EmailLog {
    EmailLog {
        id: id.to_string(),
        company_id: company_id.to_string(),
        email_address: address.to_string(),
        email_type: outreach_sync::EmailType::FirstTime,
        date_sent,
        note: None,
        follow_up_date: None,
        completed: false,
    }
}

pub fn user(id: &str, username: &str, role: Role) -> AppUser {
    AppUser {
        id: id.to_string(),
        username: username.to_string(),
        password: None,
        role,
        created_at: START_MILLIS,
    }
}
