//! BTLogger Core
//!
//! Foundational types shared by every part of the receiver: decoded log
//! records and their binary wire format, the messages passed between the
//! two execution contexts, device identity, configuration and the error
//! taxonomy.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod device;
pub mod errors;
pub mod message;
pub mod record;
pub mod wire;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{LinkConfig, SchedulerConfig, StorageConfig};
pub use device::{DeviceAddress, DeviceIdentity};
pub use errors::{
    ConfigError, ConnectError, DecodeError, LoggerError, LoggerResult, MailboxError,
    SchedulerError, StorageError,
};
pub use message::{Command, CoreMessage, FileOp, MessageKind, UiEvent};
pub use record::{LogLevel, LogRecord, MAX_MESSAGE_LEN, MAX_TAG_LEN};
pub use wire::{WireCodec, WIRE_RECORD_SIZE};
