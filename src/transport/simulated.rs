//! In-process simulated RoboVac
//!
//! Behaves like the real vacuum from the core's point of view: it has to be
//! discovered and opened, answers full-state requests after a configurable
//! latency, echoes writes back as push events, and can be told to fail the
//! next N operations of each kind. The binary uses it as its device; tests use
//! its call counters to check coalescing.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Credentials, OpenedSession, Session, Transport, TransportEvent};
use crate::device::{DeviceState, PartialState, PropertyKey, PropertyValue, WorkStatus};

#[derive(Default)]
struct FailPlan {
    discover: AtomicUsize,
    open: AtomicUsize,
    fetch: AtomicUsize,
    write: AtomicUsize,
}

impl FailPlan {
    /// Consume one scheduled failure, if any
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Default)]
struct CallCounters {
    discover: AtomicUsize,
    open: AtomicUsize,
    fetch: AtomicUsize,
    write: AtomicUsize,
    close: AtomicUsize,
}

struct SimInner {
    device_id: String,
    address: String,
    latency: RwLock<Duration>,
    device: Mutex<DeviceState>,
    echo_writes: AtomicBool,
    fail: FailPlan,
    calls: CallCounters,
    /// Event sender of the currently open session
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

/// Simulated device transport
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<SimInner>,
}

impl SimulatedTransport {
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        let device = DeviceState::from_report(
            Some(device_id.clone()),
            &PartialState::new()
                .with(PropertyKey::BatteryLevel, 100)
                .with(PropertyKey::ErrorCode, "no_error"),
        );
        Self {
            inner: Arc::new(SimInner {
                device_id,
                address: "192.168.1.50".to_string(),
                latency: RwLock::new(Duration::from_millis(50)),
                device: Mutex::new(device),
                echo_writes: AtomicBool::new(true),
                fail: FailPlan::default(),
                calls: CallCounters::default(),
                events: Mutex::new(None),
            }),
        }
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.write() = latency;
    }

    /// Whether writes are reported back as push events (the real device does)
    pub fn set_echo_writes(&self, echo: bool) {
        self.inner.echo_writes.store(echo, Ordering::SeqCst);
    }

    pub fn fail_next_discover(&self, n: usize) {
        self.inner.fail.discover.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_open(&self, n: usize) {
        self.inner.fail.open.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_fetch(&self, n: usize) {
        self.inner.fail.fetch.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_write(&self, n: usize) {
        self.inner.fail.write.store(n, Ordering::SeqCst);
    }

    pub fn discover_calls(&self) -> usize {
        self.inner.calls.discover.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.inner.calls.open.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.inner.calls.fetch.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.inner.calls.write.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.inner.calls.close.load(Ordering::SeqCst)
    }

    /// What the simulated device currently holds
    pub fn device_state(&self) -> DeviceState {
        self.inner.device.lock().clone()
    }

    /// Change the device silently; only a later fetch will see it
    pub fn set_device_state(&self, partial: &PartialState) {
        self.inner.device.lock().merge(partial);
    }

    /// Change the device and report it on the open session
    pub fn push(&self, partial: PartialState) -> bool {
        self.set_device_state(&partial);
        self.emit(TransportEvent::PushUpdate(partial))
    }

    /// Emit an arbitrary event on the open session; false if none is open
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.inner.events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate the device dropping the link
    pub fn drop_connection(&self) {
        if let Some(tx) = self.inner.events.lock().take() {
            let _ = tx.send(TransportEvent::Disconnected);
        }
    }

    async fn simulate_latency(&self) {
        let latency = *self.inner.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Consequences the real firmware applies when a command is written
fn apply_command(device: &mut DeviceState, key: PropertyKey, value: &PropertyValue) -> PartialState {
    let mut report = PartialState::new().with(key, value.clone());
    match (key, value.as_bool()) {
        (PropertyKey::Running, Some(true)) => {
            report.insert(PropertyKey::WorkStatus, WorkStatus::Running.into());
            report.insert(PropertyKey::GoHome, PropertyValue::Bool(false));
        },
        (PropertyKey::Running, Some(false)) => {
            report.insert(PropertyKey::WorkStatus, WorkStatus::StandBy.into());
        },
        (PropertyKey::GoHome, Some(true)) => {
            report.insert(PropertyKey::Running, PropertyValue::Bool(false));
            report.insert(PropertyKey::WorkStatus, WorkStatus::RechargeNeeded.into());
        },
        _ => {},
    }
    device.merge(&report);
    report
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn discover(&self, device_id: &str) -> Result<String> {
        self.inner.calls.discover.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if FailPlan::take(&self.inner.fail.discover) {
            bail!("no device answered the discovery broadcast");
        }
        if device_id != self.inner.device_id {
            bail!("device {} not found on the network", device_id);
        }
        Ok(self.inner.address.clone())
    }

    async fn open(&self, address: &str, credentials: &Credentials) -> Result<OpenedSession> {
        self.inner.calls.open.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if FailPlan::take(&self.inner.fail.open) {
            bail!("handshake with {} timed out", address);
        }
        if credentials.device_id != self.inner.device_id {
            bail!("device at {} rejected id {}", address, credentials.device_id);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(TransportEvent::Connected);
        *self.inner.events.lock() = Some(tx.clone());
        debug!(address, "Simulated session opened");

        Ok(OpenedSession {
            session: Arc::new(SimSession {
                transport: self.clone(),
                events: tx,
                closed: AtomicBool::new(false),
            }),
            events: rx,
        })
    }
}

struct SimSession {
    transport: SimulatedTransport,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: AtomicBool,
}

impl SimSession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("session is closed");
        }
        Ok(())
    }
}

#[async_trait]
impl Session for SimSession {
    async fn fetch_full_state(&self) -> Result<DeviceState> {
        let inner = &self.transport.inner;
        inner.calls.fetch.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;
        self.transport.simulate_latency().await;

        if FailPlan::take(&inner.fail.fetch) {
            bail!("connection reset by peer");
        }
        // Round-trip through the wire shape the real device answers with
        let status = inner.device.lock().to_status_json();
        DeviceState::from_status_json(&status).ok_or_else(|| anyhow!("malformed status response"))
    }

    async fn write_property(&self, key: PropertyKey, value: PropertyValue) -> Result<()> {
        let inner = &self.transport.inner;
        inner.calls.write.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;
        self.transport.simulate_latency().await;

        if FailPlan::take(&inner.fail.write) {
            bail!("write of dps {} was not acknowledged", key.dps());
        }

        let report = apply_command(&mut inner.device.lock(), key, &value);
        if inner.echo_writes.load(Ordering::SeqCst) {
            let _ = self
                .events
                .send(TransportEvent::PushUpdate(PartialState::from_dps(&report.to_dps())));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let inner = &self.transport.inner;
        inner.calls.close.fetch_add(1, Ordering::SeqCst);

        let mut current = inner.events.lock();
        if current.as_ref().is_some_and(|tx| tx.same_channel(&self.events)) {
            *current = None;
        }
        let _ = self.events.send(TransportEvent::Disconnected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            device_id: "vac-1".to_string(),
            local_key: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_discover_and_open() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::ZERO);
        let address = transport.discover("vac-1").await.unwrap();
        let mut opened = transport.open(&address, &credentials()).await.unwrap();

        assert_eq!(opened.events.recv().await, Some(TransportEvent::Connected));
        assert_eq!(transport.open_calls(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_failures_are_consumed() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::ZERO);
        let opened = transport.open("addr", &credentials()).await.unwrap();

        transport.fail_next_fetch(1);
        assert!(opened.session.fetch_full_state().await.is_err());
        assert!(opened.session.fetch_full_state().await.is_ok());
        assert_eq!(transport.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_write_echoes_push_update() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::ZERO);
        let mut opened = transport.open("addr", &credentials()).await.unwrap();
        let _ = opened.events.recv().await;

        opened
            .session
            .write_property(PropertyKey::GoHome, PropertyValue::Bool(true))
            .await
            .unwrap();

        match opened.events.recv().await {
            Some(TransportEvent::PushUpdate(report)) => {
                assert_eq!(report.get(PropertyKey::GoHome), Some(&PropertyValue::Bool(true)));
                assert_eq!(report.get(PropertyKey::Running), Some(&PropertyValue::Bool(false)));
            },
            other => panic!("expected push update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_session_rejects_requests() {
        let transport = SimulatedTransport::new("vac-1").with_latency(Duration::ZERO);
        let opened = transport.open("addr", &credentials()).await.unwrap();

        opened.session.close().await.unwrap();
        opened.session.close().await.unwrap();

        assert!(opened.session.fetch_full_state().await.is_err());
        assert_eq!(transport.close_calls(), 1);
        assert!(!transport.emit(TransportEvent::Connected));
    }
}
