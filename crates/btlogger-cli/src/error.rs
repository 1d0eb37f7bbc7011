//! Error handling for the BTLogger CLI

use btlogger_ble::LinkError;
use btlogger_core::{ConfigError, DecodeError, LoggerError, SchedulerError, StorageError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Logger(#[from] LoggerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bluetooth error: {0}")]
    Link(#[from] LinkError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Frame could not be decoded: {0}")]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("Hex decoding error: {0}")]
    HexDecoding(#[from] hex::FromHexError),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
