//! Remote reachability tracking
//!
//! A probe pings the primary base, then the fallback base, and records which
//! one answered. Status subscribers are notified after every probe, even if
//! the outcome did not change. Probing never returns an error: transport
//! failures fold into "unavailable".

use crate::bus::{Bus, Subscription, SyncEvent};
use crate::remote::RemoteStore;
use parking_lot::Mutex;
use std::sync::Arc;

/// Connectivity lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// No probe has completed yet
    Unknown,
    /// A probe is in flight
    Probing,
    Available,
    Unavailable,
}

/// Which configured base last answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiBase {
    Primary,
    Fallback,
}

#[derive(Debug)]
struct ProbeState {
    phase: ConnectivityState,
    available: bool,
    base: ApiBase,
}

pub struct ConnectivityProber {
    remote: Arc<dyn RemoteStore>,
    primary_base: String,
    fallback_base: String,
    state: Mutex<ProbeState>,
    status: Bus<bool>,
    events: Bus<SyncEvent>,
}

impl ConnectivityProber {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        primary_base: impl Into<String>,
        fallback_base: impl Into<String>,
        events: Bus<SyncEvent>,
    ) -> Self {
        Self {
            remote,
            primary_base: primary_base.into(),
            fallback_base: fallback_base.into(),
            state: Mutex::new(ProbeState {
                phase: ConnectivityState::Unknown,
                available: false,
                base: ApiBase::Primary,
            }),
            status: Bus::new(),
            events,
        }
    }

    /// Check reachability and notify status subscribers with the result
    pub async fn probe(&self) -> bool {
        self.state.lock().phase = ConnectivityState::Probing;

        let outcome = match self.remote.ping(&self.primary_base).await {
            Ok(()) => Some(ApiBase::Primary),
            Err(primary_err) => {
                self.report_failure(&self.primary_base, &primary_err.to_string());
                match self.remote.ping(&self.fallback_base).await {
                    Ok(()) => Some(ApiBase::Fallback),
                    Err(fallback_err) => {
                        self.report_failure(&self.fallback_base, &fallback_err.to_string());
                        None
                    }
                }
            }
        };

        let available = {
            let mut state = self.state.lock();
            let was_available = state.available;
            match outcome {
                Some(base) => {
                    state.phase = ConnectivityState::Available;
                    state.available = true;
                    state.base = base;
                }
                None => {
                    state.phase = ConnectivityState::Unavailable;
                    state.available = false;
                }
            }
            if was_available != state.available {
                tracing::info!(
                    available = state.available,
                    base = ?state.base,
                    "Remote connectivity changed"
                );
            }
            state.available
        };

        self.status.publish(&available);
        available
    }

    /// Flip to unavailable immediately, as on an OS "offline" event
    pub fn mark_offline(&self) {
        {
            let mut state = self.state.lock();
            state.phase = ConnectivityState::Unavailable;
            state.available = false;
        }
        tracing::info!("Network offline; switching to local mode");
        self.status.publish(&false);
    }

    fn report_failure(&self, base: &str, error: &str) {
        tracing::debug!(base = base, error = error, "Ping failed");
        self.events.publish(&SyncEvent::ProbeFailed {
            base: base.to_string(),
            error: error.to_string(),
        });
    }

    /// Last known reachability outcome
    pub fn is_available(&self) -> bool {
        self.state.lock().available
    }

    pub fn state(&self) -> ConnectivityState {
        self.state.lock().phase
    }

    pub fn active_base(&self) -> ApiBase {
        self.state.lock().base
    }

    /// Base address of the endpoint that last answered
    pub fn api_base(&self) -> &str {
        match self.active_base() {
            ApiBase::Primary => &self.primary_base,
            ApiBase::Fallback => &self.fallback_base,
        }
    }

    /// Register for the boolean result of every probe
    pub fn subscribe<F>(&self, callback: F) -> Subscription<bool>
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.status.subscribe(callback)
    }
}
