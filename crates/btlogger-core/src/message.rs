//! Messages exchanged between the Communications and Presentation contexts
//!
//! A `CoreMessage` is a flat, owned, cloneable value: a kind, two string
//! payloads and two numeric payloads. Typed constructors and views below are
//! the only place that knows how each kind lays out its payloads.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::device::{DeviceAddress, DeviceIdentity};
use crate::record::{LogLevel, LogRecord};

// ----------------------------------------------------------------------------
// Message Kinds
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// A decoded record (Communications → Presentation)
    LogReceived,
    /// A device connected or disconnected (Communications → Presentation)
    DeviceConnection,
    /// Answer to a command (Communications → Presentation)
    UiEvent,
    /// Load, delete or list session files (Presentation → Communications)
    FileOperation,
    Connect,
    Disconnect,
    StartScan,
    StopScan,
    Shutdown,
}

/// File operations the presentation layer may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileOp {
    Load,
    Delete,
    List,
}

impl FileOp {
    pub fn as_str(self) -> &'static str {
        match self {
            FileOp::Load => "load",
            FileOp::Delete => "delete",
            FileOp::List => "list",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "load" => Some(FileOp::Load),
            "delete" => Some(FileOp::Delete),
            "list" => Some(FileOp::List),
            _ => None,
        }
    }
}

/// Typed view of a command addressed to the Communications context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(DeviceAddress),
    Disconnect(DeviceAddress),
    File { op: FileOp, path: String },
    StartScan,
    StopScan,
    Shutdown,
}

/// Typed view of a command result addressed to the Presentation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// Lines are non-empty and never contain a newline
    FileLoaded { path: String, lines: Vec<String> },
    FileDeleted { path: String, success: bool },
    SessionList { paths: Vec<String> },
    CommandFailed { reason: String },
}

impl UiEvent {
    fn name(&self) -> &'static str {
        match self {
            UiEvent::FileLoaded { .. } => "file_loaded",
            UiEvent::FileDeleted { .. } => "file_deleted",
            UiEvent::SessionList { .. } => "session_list",
            UiEvent::CommandFailed { .. } => "command_failed",
        }
    }
}

// ----------------------------------------------------------------------------
// Core Message
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreMessage {
    kind: MessageKind,
    payload_a: String,
    payload_b: String,
    value_a: u32,
    value_b: u32,
}

impl CoreMessage {
    pub fn new(
        kind: MessageKind,
        payload_a: impl Into<String>,
        payload_b: impl Into<String>,
        value_a: u32,
        value_b: u32,
    ) -> Self {
        Self {
            kind,
            payload_a: payload_a.into(),
            payload_b: payload_b.into(),
            value_a,
            value_b,
        }
    }

    fn bare(kind: MessageKind) -> Self {
        Self::new(kind, "", "", 0, 0)
    }

    pub fn shutdown() -> Self {
        Self::bare(MessageKind::Shutdown)
    }

    pub fn start_scan() -> Self {
        Self::bare(MessageKind::StartScan)
    }

    pub fn stop_scan() -> Self {
        Self::bare(MessageKind::StopScan)
    }

    pub fn connect(address: &DeviceAddress) -> Self {
        Self::new(MessageKind::Connect, address.as_str(), "", 0, 0)
    }

    pub fn disconnect(address: &DeviceAddress) -> Self {
        Self::new(MessageKind::Disconnect, address.as_str(), "", 0, 0)
    }

    pub fn file_operation(op: FileOp, path: impl Into<String>) -> Self {
        Self::new(MessageKind::FileOperation, op.as_str(), path, 0, 0)
    }

    /// Record notification. `payload_b` holds tag and message back to back;
    /// the low byte of `value_a` is the level and the next byte the tag length.
    pub fn log_received(record: &LogRecord, device: &DeviceIdentity) -> Self {
        let mut body = String::with_capacity(record.tag().len() + record.message().len());
        body.push_str(record.tag());
        body.push_str(record.message());
        let packed = u32::from(record.level().as_wire()) | ((record.tag().len() as u32) << 8);
        Self::new(
            MessageKind::LogReceived,
            device.display_name(),
            body,
            packed,
            record.timestamp(),
        )
    }

    pub fn device_connection(device: &DeviceIdentity, connected: bool, connected_count: usize) -> Self {
        Self::new(
            MessageKind::DeviceConnection,
            device.display_name(),
            device.address.as_str(),
            u32::from(connected),
            connected_count as u32,
        )
    }

    pub fn ui_event(event: UiEvent) -> Self {
        let name = event.name();
        match event {
            UiEvent::FileLoaded { path, lines } => {
                // First line is the path, the rest the file content
                let count = lines.len() as u32;
                let mut body = path;
                for line in &lines {
                    body.push('\n');
                    body.push_str(line);
                }
                Self::new(MessageKind::UiEvent, name, body, count, 0)
            }
            UiEvent::FileDeleted { path, success } => {
                Self::new(MessageKind::UiEvent, name, path, u32::from(success), 0)
            }
            UiEvent::SessionList { paths } => {
                let count = paths.len() as u32;
                Self::new(MessageKind::UiEvent, name, paths.join("\n"), count, 0)
            }
            UiEvent::CommandFailed { reason } => Self::new(MessageKind::UiEvent, name, reason, 0, 0),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_shutdown(&self) -> bool {
        self.kind == MessageKind::Shutdown
    }

    pub fn payload_a(&self) -> &str {
        &self.payload_a
    }

    pub fn payload_b(&self) -> &str {
        &self.payload_b
    }

    pub fn value_a(&self) -> u32 {
        self.value_a
    }

    pub fn value_b(&self) -> u32 {
        self.value_b
    }

    // ------------------------------------------------------------------------
    // Typed views
    // ------------------------------------------------------------------------

    /// Interpret the message as a command for the Communications context
    pub fn command(&self) -> Option<Command> {
        match self.kind {
            MessageKind::Connect => Some(Command::Connect(DeviceAddress::new(&self.payload_a))),
            MessageKind::Disconnect => Some(Command::Disconnect(DeviceAddress::new(&self.payload_a))),
            MessageKind::FileOperation => FileOp::parse(&self.payload_a).map(|op| Command::File {
                op,
                path: self.payload_b.clone(),
            }),
            MessageKind::StartScan => Some(Command::StartScan),
            MessageKind::StopScan => Some(Command::StopScan),
            MessageKind::Shutdown => Some(Command::Shutdown),
            _ => None,
        }
    }

    /// Rebuild the record carried by a `LogReceived` message
    pub fn log_record(&self) -> Option<LogRecord> {
        if self.kind != MessageKind::LogReceived {
            return None;
        }
        let level = LogLevel::from_wire((self.value_a & 0xff) as u8);
        let tag_len = ((self.value_a >> 8) & 0xff) as usize;
        if !self.payload_b.is_char_boundary(tag_len) {
            return None;
        }
        let (tag, message) = self.payload_b.split_at(tag_len);
        Some(LogRecord::new(self.value_b, level, tag, message))
    }

    /// `(device name, connected)` for a `DeviceConnection` message
    pub fn connection(&self) -> Option<(&str, bool)> {
        (self.kind == MessageKind::DeviceConnection).then(|| (self.payload_a.as_str(), self.value_a != 0))
    }

    /// Interpret a `UiEvent` message
    pub fn ui_event_view(&self) -> Option<UiEvent> {
        if self.kind != MessageKind::UiEvent {
            return None;
        }
        let path = self.payload_b.clone();
        match self.payload_a.as_str() {
            "file_loaded" => {
                let mut parts = self.payload_b.split('\n');
                let path = parts.next().unwrap_or_default().to_string();
                Some(UiEvent::FileLoaded {
                    path,
                    lines: parts.map(str::to_string).collect(),
                })
            }
            "file_deleted" => Some(UiEvent::FileDeleted {
                path,
                success: self.value_a != 0,
            }),
            "session_list" => Some(UiEvent::SessionList {
                paths: self
                    .payload_b
                    .lines()
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect(),
            }),
            "command_failed" => Some(UiEvent::CommandFailed { reason: path }),
            _ => None,
        }
    }
}

impl fmt::Display for CoreMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}({:?}, {:?}, {}, {})",
            self.kind, self.payload_a, self.payload_b, self.value_a, self.value_b
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_received_preserves_record() {
        let device = DeviceIdentity::new("AA:BB:CC:DD:EE:01", "Sensor_v1");
        let record = LogRecord::new(42, LogLevel::Error, "TEMP", "sensor fail");

        let message = CoreMessage::log_received(&record, &device);
        assert_eq!(message.kind(), MessageKind::LogReceived);
        assert_eq!(message.payload_a(), "Sensor_v1");
        assert_eq!(message.log_record(), Some(record));
    }

    #[test]
    fn test_log_received_with_empty_tag() {
        let device = DeviceIdentity::new("AA:BB:CC:DD:EE:01", "");
        let record = LogRecord::new(1, LogLevel::Info, "", "no tag");
        let message = CoreMessage::log_received(&record, &device);
        assert_eq!(message.payload_a(), "AA:BB:CC:DD:EE:01");
        assert_eq!(message.log_record(), Some(record));
    }

    #[test]
    fn test_command_views() {
        let address = DeviceAddress::new("aa:bb:cc:dd:ee:01");
        assert_eq!(
            CoreMessage::connect(&address).command(),
            Some(Command::Connect(address.clone()))
        );
        assert_eq!(
            CoreMessage::file_operation(FileOp::Delete, "Sensor_v1/a.log").command(),
            Some(Command::File {
                op: FileOp::Delete,
                path: "Sensor_v1/a.log".to_string()
            })
        );
        assert_eq!(CoreMessage::shutdown().command(), Some(Command::Shutdown));
        assert!(CoreMessage::new(MessageKind::FileOperation, "rename", "x", 0, 0)
            .command()
            .is_none());
    }

    #[test]
    fn test_ui_event_round_trip() {
        let events = [
            UiEvent::FileLoaded {
                path: "a/b.log".to_string(),
                lines: vec!["# BTLogger session".to_string(), "1,INFO,T,m".to_string()],
            },
            UiEvent::FileLoaded {
                path: "a/empty.log".to_string(),
                lines: Vec::new(),
            },
            UiEvent::FileDeleted {
                path: "a/b.log".to_string(),
                success: false,
            },
            UiEvent::SessionList {
                paths: vec!["a/1.log".to_string(), "b/2.log".to_string()],
            },
            UiEvent::CommandFailed {
                reason: "unknown device".to_string(),
            },
        ];
        for event in events {
            let message = CoreMessage::ui_event(event.clone());
            assert_eq!(message.ui_event_view(), Some(event));
        }
    }

    #[test]
    fn test_connection_view() {
        let device = DeviceIdentity::new("AA:BB:CC:DD:EE:01", "Sensor_v1");
        let message = CoreMessage::device_connection(&device, true, 1);
        assert_eq!(message.connection(), Some(("Sensor_v1", true)));
        assert_eq!(message.payload_b(), "AA:BB:CC:DD:EE:01");
        assert!(CoreMessage::shutdown().connection().is_none());
    }

    #[test]
    fn test_serde_round_trip() {
        let message = CoreMessage::file_operation(FileOp::Load, "Sensor_v1/x.log");
        let json = serde_json::to_string(&message).unwrap();
        let back: CoreMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }
}
