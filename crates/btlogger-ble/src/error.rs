//! Error types for the Bluetooth link

use btlogger_core::LoggerError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Failures of the platform Bluetooth stack outside a single connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Failed to create BLE manager: {0}")]
    ManagerInit(String),

    #[error("Scan failed: {0}")]
    Scan(String),

    #[error("Failed to get BLE events: {0}")]
    EventStream(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

impl LinkError {
    /// Failing to acquire an adapter, either because the Bluetooth stack
    /// cannot be reached or because it has none, prevents the receiver from
    /// starting. Everything else is retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::AdapterNotAvailable | LinkError::ManagerInit(_))
    }
}

impl From<LinkError> for LoggerError {
    fn from(err: LinkError) -> Self {
        LoggerError::Bluetooth {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_keeps_message() {
        let err: LoggerError = LinkError::AdapterNotAvailable.into();
        assert_eq!(err.to_string(), "Bluetooth error: BLE adapter not available");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(LinkError::AdapterNotAvailable.is_fatal());
        assert!(LinkError::ManagerInit("no dbus".into()).is_fatal());
        assert!(!LinkError::Platform("gatt".into()).is_fatal());
        assert!(!LinkError::Scan("busy".into()).is_fatal());
    }
}
