//! BTLogger Runtime
//!
//! This crate runs the receiver:
//! - `DualContextScheduler`: the Communications and Presentation contexts
//!   and their lifecycle
//! - `Mailbox`: bounded queues between the two contexts
//! - `SessionLog`: append-only per-device session files with rotation
//! - `PresentationLayer`: the boundary to whatever displays the records

pub mod builder;
mod communications;
pub mod mailbox;
pub mod presentation;
pub mod scheduler;
pub mod session_log;

pub use builder::SchedulerBuilder;
pub use mailbox::{mailbox, Mailbox, MailboxSender, Received};
pub use presentation::PresentationLayer;
pub use scheduler::{DualContextScheduler, ShutdownReport};
pub use session_log::{Session, SessionFileInfo, SessionLog};

// Re-export core types for convenience
pub use btlogger_core::{CoreMessage, FileOp, MessageKind, UiEvent};
