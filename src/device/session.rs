//! Session controller
//!
//! Owns the transport session: opening it on demand, sharing a single connect
//! attempt between concurrent callers, and tearing it down (with cache
//! invalidation) when anything goes wrong.

use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::robovac::{ActiveSession, Core, InFlightConnect, RoboVac, SessionState, SharedOutcome};
use crate::error::{DeviceError, Result};
use crate::transport::{OpenedSession, Session, TransportEvent};

impl RoboVac {
    pub fn session_state(&self) -> SessionState {
        self.core.lock().session_state
    }

    /// Return once a session is open, opening one if needed
    ///
    /// Concurrent callers while a connect is running attach to that attempt
    /// and share its outcome.
    pub async fn ensure_connected(&self) -> Result<()> {
        let (pending, started) = {
            let mut core = self.core.lock();
            if core.session_state == SessionState::Connected {
                return Ok(());
            }

            match core.connecting.as_ref().map(|attempt| attempt.outcome.clone()) {
                Some(outcome) => {
                    debug!(device = %self.name, "Joining connect attempt already in progress");
                    (outcome, false)
                },
                None => {
                    let id = core.next_op_id();
                    core.session_state = SessionState::Connecting;
                    let outcome = self.spawn_connect(id);
                    core.connecting = Some(InFlightConnect {
                        id,
                        outcome: outcome.clone(),
                    });
                    (outcome, true)
                },
            }
        };

        if started {
            self.emit_status(SessionState::Connecting);
        }
        pending.await
    }

    /// Spawn the connect attempt so it finishes even if every caller gives up
    fn spawn_connect(&self, id: u64) -> SharedOutcome<()> {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_connect(id).await });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(DeviceError::Connection(format!("connect task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    async fn run_connect(&self, id: u64) -> Result<()> {
        let result = self.open_session().await;

        enum Outcome {
            Connected(u64, mpsc::UnboundedReceiver<TransportEvent>),
            Superseded(Arc<dyn Session>),
            Failed(DeviceError),
        }

        let outcome = {
            let mut core = self.core.lock();
            let still_current = core.connecting.as_ref().is_some_and(|c| c.id == id);
            if still_current {
                core.connecting = None;
            }

            match result {
                Ok(opened) if still_current => {
                    let epoch = core.next_epoch;
                    core.next_epoch += 1;
                    core.session = Some(ActiveSession {
                        session: opened.session,
                        epoch,
                    });
                    core.session_state = SessionState::Connected;
                    Outcome::Connected(epoch, opened.events)
                },
                // disconnect() ran while we were connecting; do not resurrect
                Ok(opened) => Outcome::Superseded(opened.session),
                Err(e) => {
                    if still_current {
                        core.session_state = SessionState::Disconnected;
                    }
                    Outcome::Failed(e)
                },
            }
        };

        match outcome {
            Outcome::Connected(epoch, events) => {
                self.spawn_event_listener(events, epoch);
                self.emit_status(SessionState::Connected);
                info!(device = %self.name, "Connected to device");
                Ok(())
            },
            Outcome::Superseded(session) => {
                debug!(device = %self.name, "Discarding session opened after disconnect");
                if let Err(e) = session.close().await {
                    warn!(device = %self.name, error = %e, "Failed to close discarded session");
                }
                Err(DeviceError::Connection(
                    "disconnected while connecting".to_string(),
                ))
            },
            Outcome::Failed(e) => {
                warn!(device = %self.name, error = %e, "Connection attempt failed");
                self.emit_status(SessionState::Disconnected);
                Err(e)
            },
        }
    }

    /// Discovery (unless an address is configured) followed by the handshake
    async fn open_session(&self) -> Result<OpenedSession> {
        let address = match &self.fixed_address {
            Some(address) => address.clone(),
            None => {
                info!(device = %self.name, "Searching for device on the network...");
                self.transport
                    .discover(&self.credentials.device_id)
                    .await
                    .map_err(|e| DeviceError::Connection(format!("discovery failed: {:#}", e)))?
            },
        };

        info!(device = %self.name, address = %address, transport = self.transport.name(), "Connecting");
        self.transport
            .open(&address, &self.credentials)
            .await
            .map_err(|e| DeviceError::Connection(format!("handshake with {} failed: {:#}", address, e)))
    }

    /// The open session and its epoch, if connected
    pub(super) fn current_session(&self) -> Option<(Arc<dyn Session>, u64)> {
        let core = self.core.lock();
        match (&core.session_state, &core.session) {
            (SessionState::Connected, Some(active)) => {
                Some((Arc::clone(&active.session), active.epoch))
            },
            _ => None,
        }
    }

    /// Close the session, invalidate the cache, and reject any in-flight refresh
    ///
    /// Idempotent. The next accessor call reconnects.
    pub async fn disconnect(&self) {
        self.disconnect_session(None).await;
    }

    /// Disconnect only if `epoch` is still the live session (or always, for `None`)
    pub(super) async fn disconnect_session(&self, epoch: Option<u64>) {
        let detached = {
            let mut core = self.core.lock();
            self.detach_session(&mut core, epoch)
        };
        if let Some(detached) = detached {
            self.finish_detach(detached).await;
        }
    }

    /// Tear down the session state under the caller's lock
    ///
    /// After this returns the device is Disconnected, the cache invalid and
    /// any in-flight refresh detached, so the next caller opens a fresh
    /// session. Closing the old one is left to [`Self::finish_detach`].
    pub(super) fn detach_session(&self, core: &mut Core, epoch: Option<u64>) -> Option<Detached> {
        if let Some(epoch) = epoch {
            if core.session.as_ref().map(|s| s.epoch) != Some(epoch) {
                debug!(device = %self.name, epoch, "Ignoring disconnect for stale session");
                return None;
            }
        }

        let previous = core.session_state;
        core.session_state = SessionState::Disconnected;
        core.connecting = None;
        if self.cache.invalidate() {
            debug!(device = %self.name, "Cached state invalidated");
        }
        Some(Detached {
            session: core.session.take(),
            abort: core.refresh.take().and_then(|r| r.abort),
            previous,
        })
    }

    pub(super) async fn finish_detach(&self, detached: Detached) {
        if let Some(abort) = detached.abort {
            let _ = abort.send(());
        }

        if let Some(active) = detached.session {
            if let Err(e) = active.session.close().await {
                warn!(device = %self.name, error = %e, "Error while closing session");
            }
        }

        if detached.previous != SessionState::Disconnected {
            info!(device = %self.name, "Disconnected from device");
            self.emit_status(SessionState::Disconnected);
        }
    }
}

/// What a teardown took out of [`Core`], to be released outside the lock
pub(super) struct Detached {
    session: Option<ActiveSession>,
    abort: Option<oneshot::Sender<()>>,
    previous: SessionState,
}
