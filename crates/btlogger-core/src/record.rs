//! Log records received from producer devices

use core::fmt;

use serde::{Deserialize, Serialize};

/// Usable tag bytes (the wire field reserves one more for the terminator)
pub const MAX_TAG_LEN: usize = 31;
/// Usable message bytes (the wire field reserves one more for the terminator)
pub const MAX_MESSAGE_LEN: usize = 255;

// ----------------------------------------------------------------------------
// Log Level
// ----------------------------------------------------------------------------

/// Severity as numbered by the producer library
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogLevel {
    Verbose = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl LogLevel {
    /// Map a wire byte to a level. Producers that send an unknown value are
    /// treated as informational.
    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => LogLevel::Verbose,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    pub fn as_wire(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Verbose => "VERBOSE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Warnings and errors are surfaced prominently by presentation layers
    pub fn is_alert(self) -> bool {
        self >= LogLevel::Warn
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Log Record
// ----------------------------------------------------------------------------

/// A single decoded log line from a producer.
///
/// Tag and message are bounded by the wire capacities and never contain a
/// NUL byte, so every record can be re-encoded without loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RecordFields")]
pub struct LogRecord {
    timestamp: u32,
    level: LogLevel,
    tag: String,
    message: String,
}

impl LogRecord {
    /// Build a record, cutting `tag` and `message` at the first NUL and
    /// truncating them to capacity on a character boundary.
    pub fn new(timestamp: u32, level: LogLevel, tag: &str, message: &str) -> Self {
        Self {
            timestamp,
            level,
            tag: bounded(tag, MAX_TAG_LEN).to_string(),
            message: bounded(message, MAX_MESSAGE_LEN).to_string(),
        }
    }

    /// Producer-relative monotonic timestamp in milliseconds
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Unchecked wire form of a record; deserialised records go through `new`
#[derive(Deserialize)]
struct RecordFields {
    timestamp: u32,
    level: LogLevel,
    tag: String,
    message: String,
}

impl From<RecordFields> for LogRecord {
    fn from(fields: RecordFields) -> Self {
        LogRecord::new(fields.timestamp, fields.level, &fields.tag, &fields.message)
    }
}

/// Cut at the first NUL, then truncate to `max` bytes on a char boundary
pub(crate) fn bounded(text: &str, max: usize) -> &str {
    let text = match text.find('\0') {
        Some(nul) => &text[..nul],
        None => text,
    };
    truncate_to_boundary(text, max)
}

pub(crate) fn truncate_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_wire_mapping() {
        for level in [
            LogLevel::Verbose,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            assert_eq!(LogLevel::from_wire(level.as_wire()), level);
        }
        assert_eq!(LogLevel::from_wire(200), LogLevel::Info);
    }

    #[test]
    fn test_alert_levels() {
        assert!(!LogLevel::Info.is_alert());
        assert!(LogLevel::Warn.is_alert());
        assert!(LogLevel::Error.is_alert());
    }

    #[test]
    fn test_record_truncates_fields() {
        let long_tag = "T".repeat(40);
        let long_message = "m".repeat(300);
        let record = LogRecord::new(1, LogLevel::Debug, &long_tag, &long_message);
        assert_eq!(record.tag().len(), MAX_TAG_LEN);
        assert_eq!(record.message().len(), MAX_MESSAGE_LEN);
    }

    #[test]
    fn test_record_truncates_on_char_boundary() {
        // 'é' is two bytes, so 128 of them straddle the 255 byte limit
        let message = "é".repeat(128);
        let record = LogRecord::new(0, LogLevel::Info, "UTF8", &message);
        assert_eq!(record.message().len(), 254);
        assert!(record.message().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_deserialized_record_is_bounded() {
        let json = format!(
            r#"{{"timestamp":7,"level":"Warn","tag":"{}","message":"ok\u0000hidden"}}"#,
            "T".repeat(40)
        );
        let record: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record.timestamp(), 7);
        assert_eq!(record.level(), LogLevel::Warn);
        assert_eq!(record.tag(), "T".repeat(MAX_TAG_LEN));
        assert_eq!(record.message(), "ok");

        let back: LogRecord = serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_record_stops_at_nul() {
        let record = LogRecord::new(0, LogLevel::Info, "TAG\0junk", "hello\0world");
        assert_eq!(record.tag(), "TAG");
        assert_eq!(record.message(), "hello");
    }
}
