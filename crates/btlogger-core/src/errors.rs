//! Error types for the BTLogger receiver
//!
//! Every failure class the receiver can hit has its own enum so that callers
//! can decide locally how to recover (drop a frame, retry a connection, stop
//! persisting, drop a message). `LoggerError` unifies them for code that only
//! needs to report.

use std::time::Duration;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// A frame received from a producer could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Empty frame")]
    Empty,
    #[error("Declared message length {declared} exceeds capacity {capacity}")]
    Truncated { declared: usize, capacity: usize },
}

/// Link acquisition or log channel resolution failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Device {address} has not been discovered")]
    UnknownDevice { address: String },
    #[error("Connection attempt to {address} already in progress")]
    AttemptInProgress { address: String },
    #[error("Failed to connect to {address}: {reason}")]
    LinkFailed { address: String, reason: String },
    #[error("Connection to {address} timed out after {timeout_ms}ms")]
    Timeout { address: String, timeout_ms: u64 },
    #[error("Connection attempt to {address} abandoned for shutdown")]
    Cancelled { address: String },
    #[error("Service {service} not found on {address}")]
    ServiceNotFound { address: String, service: String },
    #[error("Characteristic {characteristic} not found on {address}")]
    CharacteristicNotFound {
        address: String,
        characteristic: String,
    },
    #[error("Failed to subscribe to notifications on {address}: {reason}")]
    SubscriptionFailed { address: String, reason: String },
}

/// Session storage failures
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Log storage unavailable at {root}")]
    Unavailable { root: String },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Path {path} is outside the log directory")]
    OutsideRoot { path: String },
    #[error("File {path} belongs to an open session")]
    FileInUse { path: String },
    #[error("File not found: {path}")]
    NotFound { path: String },
    #[error("Session for {device} reached its limit of {max_files} files")]
    RotationLimit { device: String, max_files: u32 },
}

impl StorageError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Mailbox backpressure and lifecycle errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox full")]
    Full,
    #[error("Mailbox closed")]
    Closed,
}

/// Scheduler lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Contexts did not stop within {timeout:?}: {contexts:?}")]
    ShutdownTimeout {
        timeout: Duration,
        contexts: Vec<String>,
    },
    #[error("Scheduler already started")]
    AlreadyStarted,
}

/// Invalid or unloadable configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to load configuration: {0}")]
    Loading(String),
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Bluetooth error: {message}")]
    Bluetooth { message: String },
}

pub type LoggerResult<T> = Result<T, LoggerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: LoggerError = MailboxError::Full.into();
        assert!(matches!(err, LoggerError::Mailbox(MailboxError::Full)));

        let err: LoggerError = DecodeError::Truncated {
            declared: 300,
            capacity: 255,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Decode error: Declared message length 300 exceeds capacity 255"
        );
    }

    #[test]
    fn test_storage_io_helper_keeps_path() {
        let err = StorageError::io(
            "/tmp/logs/a.log",
            std::io::Error::new(std::io::ErrorKind::Other, "disk gone"),
        );
        let text = err.to_string();
        assert!(text.contains("/tmp/logs/a.log"));
        assert!(text.contains("disk gone"));
    }
}
