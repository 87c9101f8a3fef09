//! Error types for the device core
//!
//! Every failure that reaches an accessor caller is one of the variants below.
//! Errors are `Clone` because a single refresh or connect outcome is handed to
//! every caller waiting on it.

use std::time::Duration;

use thiserror::Error;

use crate::device::PropertyKey;

/// Result alias used throughout the device core
pub type Result<T> = std::result::Result<T, DeviceError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Discovery or session handshake failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Full-state request failed after a session existed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Property write failed
    #[error("Write error for {key}: {detail}")]
    Write { key: PropertyKey, detail: String },

    /// Caller-side deadline elapsed; the underlying operation may still be running
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Property {0} is read-only")]
    ReadOnlyProperty(PropertyKey),

    #[error("Invalid value for {key}: {detail}")]
    InvalidValue { key: PropertyKey, detail: String },
}

/// Coarse error classification, kept for logging and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Fetch,
    Write,
    Timeout,
    Rejected,
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Connection(_) => ErrorKind::Connection,
            DeviceError::Fetch(_) => ErrorKind::Fetch,
            DeviceError::Write { .. } => ErrorKind::Write,
            DeviceError::Timeout(_) => ErrorKind::Timeout,
            DeviceError::UnknownProperty(_)
            | DeviceError::ReadOnlyProperty(_)
            | DeviceError::InvalidValue { .. } => ErrorKind::Rejected,
        }
    }

    /// True for failures caused by the device or the link to it
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connection | ErrorKind::Fetch | ErrorKind::Write
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            DeviceError::Connection("refused".into()).kind(),
            ErrorKind::Connection
        );
        assert_eq!(DeviceError::Fetch("reset".into()).kind(), ErrorKind::Fetch);
        assert_eq!(
            DeviceError::Timeout(Duration::from_secs(3)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            DeviceError::ReadOnlyProperty(PropertyKey::BatteryLevel).kind(),
            ErrorKind::Rejected
        );
    }

    #[test]
    fn test_transport_failure_excludes_timeout() {
        assert!(DeviceError::Fetch("x".into()).is_transport_failure());
        assert!(!DeviceError::Timeout(Duration::from_millis(1)).is_transport_failure());
        assert!(!DeviceError::UnknownProperty("7".into()).is_transport_failure());
    }

    #[test]
    fn test_write_error_display() {
        let err = DeviceError::Write {
            key: PropertyKey::FindRobot,
            detail: "socket closed".into(),
        };
        assert_eq!(err.to_string(), "Write error for Find Robot: socket closed");
    }
}
