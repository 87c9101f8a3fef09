//! Transport abstraction consumed by the device core
//!
//! A transport knows how to find the vacuum and open an authenticated session
//! to it. The wire protocol lives entirely behind these traits; the core only
//! sees typed state, typed writes, and a per-session event channel.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::device::{DeviceState, PartialState, PropertyKey, PropertyValue};

pub mod simulated;

pub use simulated::SimulatedTransport;

/// Identity and shared secret used for the session handshake
#[derive(Debug, Clone)]
pub struct Credentials {
    pub device_id: String,
    pub local_key: String,
}

/// Unsolicited notifications from an open session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Error(String),
    /// Device reported one or more property values on its own
    PushUpdate(PartialState),
}

/// An open session to the device
///
/// Note: All methods take &self so the session can be shared as `Arc<dyn Session>`.
#[async_trait]
pub trait Session: Send + Sync {
    /// Request every data point from the device
    async fn fetch_full_state(&self) -> Result<DeviceState>;

    /// Write a single data point
    async fn write_property(&self, key: PropertyKey, value: PropertyValue) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Result of a successful handshake
pub struct OpenedSession {
    pub session: Arc<dyn Session>,
    /// Events for this session only; closed when the session ends
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Factory for sessions to one device
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Locate the device on the local network, returning its address
    async fn discover(&self, device_id: &str) -> Result<String>;

    async fn open(&self, address: &str, credentials: &Credentials) -> Result<OpenedSession>;
}
