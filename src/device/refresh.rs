//! Refresh coordinator
//!
//! At most one full-state fetch runs per device. Callers that find the cache
//! too old either start one or join the one already running; all of them get
//! the same outcome.

use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::cache::CacheSnapshot;
use super::robovac::{Core, InFlightRefresh, RoboVac, SharedOutcome};
use super::state::DeviceState;
use crate::error::{DeviceError, Result};

impl RoboVac {
    /// Last known state without touching the network
    pub fn read_cached(&self) -> Arc<CacheSnapshot> {
        self.cache.snapshot()
    }

    /// State no older than `max_age`, fetching it if necessary
    pub async fn read_fresh(&self, max_age: Duration) -> Result<DeviceState> {
        let pending = {
            let mut core = self.core.lock();
            let snapshot = self.cache.snapshot();
            if snapshot.is_fresh(max_age, Instant::now()) {
                debug!(device = %self.name, "Status request within max status update age");
                return Ok(snapshot.state().clone());
            }

            let joined = core
                .refresh
                .as_ref()
                .map(|inflight| (inflight.outcome.clone(), inflight.started));
            match joined {
                Some((outcome, started)) => {
                    debug!(
                        device = %self.name,
                        in_flight_ms = started.elapsed().as_millis() as u64,
                        "Duplicate status update request detected"
                    );
                    outcome
                },
                None => self.start_refresh(&mut core),
            }
        };

        pending.await
    }

    /// Force a refresh using the configured cache duration as the bound
    pub async fn refresh(&self) -> Result<DeviceState> {
        self.read_fresh(self.cache_duration()).await
    }

    fn start_refresh(&self, core: &mut Core) -> SharedOutcome<DeviceState> {
        let id = core.next_op_id();
        let started = Instant::now();
        let (abort_tx, abort_rx) = oneshot::channel();

        debug!(device = %self.name, "Requesting full status from device");
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_refresh(id, started, abort_rx).await });

        let outcome = async move {
            handle.await.unwrap_or_else(|e| {
                Err(DeviceError::Fetch(format!("refresh task failed: {}", e)))
            })
        }
        .boxed()
        .shared();

        core.refresh = Some(InFlightRefresh {
            id,
            started,
            outcome: outcome.clone(),
            abort: Some(abort_tx),
        });
        outcome
    }

    /// Body of the spawned refresh; the in-flight slot is cleared before it returns
    async fn run_refresh(
        &self,
        id: u64,
        started: Instant,
        abort: oneshot::Receiver<()>,
    ) -> Result<DeviceState> {
        // The epoch pins the failure to the session that produced it
        let fetch = async {
            if let Err(e) = self.ensure_connected().await {
                return (None, Err(e));
            }
            let Some((session, epoch)) = self.current_session() else {
                return (
                    None,
                    Err(DeviceError::Connection(
                        "session closed before status request".to_string(),
                    )),
                );
            };
            let result = session
                .fetch_full_state()
                .await
                .map_err(|e| DeviceError::Fetch(format!("{:#}", e)));
            (Some(epoch), result)
        };

        let (epoch, result) = tokio::select! {
            outcome = fetch => outcome,
            _ = abort => (None, Err(DeviceError::Connection(
                "session closed while waiting for status".to_string(),
            ))),
        };

        let (outcome, detached) = {
            let mut core = self.core.lock();
            let still_current = core.refresh.as_ref().is_some_and(|r| r.id == id);
            if still_current {
                core.refresh = None;
            }

            match result {
                Ok(_) if !still_current => (
                    Err(DeviceError::Connection(
                        "session closed while waiting for status".to_string(),
                    )),
                    None,
                ),
                Ok(fetched) => {
                    let snapshot = self.cache.replace(fetched, started, Instant::now());
                    debug!(
                        device = %self.name,
                        "Received full status from device:\n{}",
                        snapshot.state().format_status()
                    );
                    (Ok(snapshot.state().clone()), None)
                },
                Err(e) => {
                    // Released together with the refresh slot: nobody sees the
                    // broken session as Connected after this point
                    let detached =
                        epoch.and_then(|epoch| self.detach_session(&mut core, Some(epoch)));
                    if still_current && detached.is_none() {
                        self.cache.invalidate();
                    }
                    (Err(e), detached)
                },
            }
        };

        if let Err(e) = &outcome {
            warn!(device = %self.name, error = %e, "Status refresh failed");
        }
        if let Some(detached) = detached {
            self.finish_detach(detached).await;
        }
        outcome
    }
}
