//! RoboVac core struct and construction
//!
//! Defines the [`RoboVac`] handle and the state it shares with its background
//! tasks. Behaviour is split by concern: `session.rs` (connect/disconnect),
//! `refresh.rs` (coalesced full-state fetches), `push.rs` (unsolicited
//! updates), `accessors.rs` (typed get/set).

use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::cache::StateCache;
use super::state::{DeviceState, PartialState};
use crate::config::AppConfig;
use crate::error::Result;
use crate::transport::{Credentials, Session, Transport};

/// Outcome shared by every caller waiting on the same operation
pub(super) type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Callback invoked with every push update after it has been merged
pub type PushCallback = Arc<dyn Fn(&PartialState) + Send + Sync>;

/// Callback invoked on session state transitions
pub type StatusCallback = Arc<dyn Fn(SessionState) + Send + Sync>;

/// Session lifecycle as seen from outside the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Connection and cache settings for one device
#[derive(Debug, Clone)]
pub struct RoboVacOptions {
    pub name: String,
    pub device_id: String,
    pub local_key: String,
    /// Fixed address; discovery is skipped when set
    pub device_ip: Option<String>,
    /// How old cached state may be before accessors refetch
    pub cache_duration: Duration,
    /// Deadline the host enforces on every get/set
    pub response_deadline: Duration,
}

impl RoboVacOptions {
    pub fn new(device_id: impl Into<String>, local_key: impl Into<String>) -> Self {
        Self {
            name: "RoboVac".to_string(),
            device_id: device_id.into(),
            local_key: local_key.into(),
            device_ip: None,
            cache_duration: Duration::from_millis(15_000),
            response_deadline: Duration::from_millis(3_000),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            name: config.name.clone(),
            device_id: config.device_id.clone(),
            local_key: config.local_key.clone(),
            device_ip: config.fixed_address(),
            cache_duration: config.cache_duration(),
            response_deadline: config.callback_timeout(),
        }
    }
}

/// Timing knobs that may change on config reload
#[derive(Debug, Clone, Copy)]
pub(super) struct LiveSettings {
    pub cache_duration: Duration,
    pub response_deadline: Duration,
}

/// The session the controller currently owns
#[derive(Clone)]
pub(super) struct ActiveSession {
    pub session: Arc<dyn Session>,
    /// Incremented on every successful open; stale events carry an old epoch
    pub epoch: u64,
}

pub(super) struct InFlightConnect {
    pub id: u64,
    pub outcome: SharedOutcome<()>,
}

pub(super) struct InFlightRefresh {
    pub id: u64,
    pub started: Instant,
    pub outcome: SharedOutcome<DeviceState>,
    /// Fired by `disconnect()` to reject waiters immediately
    pub abort: Option<oneshot::Sender<()>>,
}

/// Everything guarded by the per-device lock
pub(super) struct Core {
    pub session_state: SessionState,
    pub session: Option<ActiveSession>,
    pub connecting: Option<InFlightConnect>,
    pub refresh: Option<InFlightRefresh>,
    pub next_epoch: u64,
    pub next_op_id: u64,
}

impl Core {
    fn new() -> Self {
        Self {
            session_state: SessionState::Disconnected,
            session: None,
            connecting: None,
            refresh: None,
            next_epoch: 1,
            next_op_id: 1,
        }
    }

    pub fn next_op_id(&mut self) -> u64 {
        let id = self.next_op_id;
        self.next_op_id += 1;
        id
    }
}

/// Cached, self-healing handle to one RoboVac
///
/// Cloning is cheap: every field is shared, so clones handed to background
/// tasks observe and mutate the same device.
#[derive(Clone)]
pub struct RoboVac {
    pub(super) name: Arc<str>,
    pub(super) credentials: Credentials,
    pub(super) fixed_address: Option<String>,
    pub(super) transport: Arc<dyn Transport>,

    pub(super) settings: Arc<RwLock<LiveSettings>>,

    /// Session, in-flight connect and in-flight refresh; one lock per device
    pub(super) core: Arc<Mutex<Core>>,
    pub(super) cache: Arc<StateCache>,

    pub(super) push_callbacks: Arc<RwLock<Vec<PushCallback>>>,
    pub(super) status_callbacks: Arc<RwLock<Vec<StatusCallback>>>,
}

impl RoboVac {
    /// Create a disconnected device handle; nothing touches the network yet
    pub fn new(options: RoboVacOptions, transport: Arc<dyn Transport>) -> Self {
        let fixed_address = options.device_ip.filter(|ip| !ip.trim().is_empty());
        Self {
            name: Arc::from(options.name.as_str()),
            credentials: Credentials {
                device_id: options.device_id,
                local_key: options.local_key,
            },
            fixed_address,
            transport,
            settings: Arc::new(RwLock::new(LiveSettings {
                cache_duration: options.cache_duration,
                response_deadline: options.response_deadline,
            })),
            core: Arc::new(Mutex::new(Core::new())),
            cache: Arc::new(StateCache::new()),
            push_callbacks: Arc::new(RwLock::new(Vec::new())),
            status_callbacks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> &str {
        &self.credentials.device_id
    }

    pub fn cache_duration(&self) -> Duration {
        self.settings.read().cache_duration
    }

    pub fn response_deadline(&self) -> Duration {
        self.settings.read().response_deadline
    }

    /// Apply reloaded timing settings; the session is left alone
    pub fn update_timing(&self, cache_duration: Duration, response_deadline: Duration) {
        *self.settings.write() = LiveSettings {
            cache_duration,
            response_deadline,
        };
    }

    /// Register a callback for merged push updates
    pub fn subscribe_push(&self, callback: PushCallback) {
        self.push_callbacks.write().push(callback);
    }

    /// Register a callback for session state transitions
    pub fn subscribe_status(&self, callback: StatusCallback) {
        self.status_callbacks.write().push(callback);
    }

    pub(super) fn emit_status(&self, state: SessionState) {
        for callback in self.status_callbacks.read().iter() {
            callback(state);
        }
    }
}
