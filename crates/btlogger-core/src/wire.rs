//! Binary wire format for log records
//!
//! Producers notify a fixed-size, packed, little-endian record:
//!
//! | offset | size | field                               |
//! |--------|------|-------------------------------------|
//! | 0      | 4    | timestamp (ms since producer boot)  |
//! | 4      | 1    | level                               |
//! | 5      | 2    | message length                      |
//! | 7      | 256  | message, NUL padded                 |
//! | 263    | 32   | tag, NUL padded                     |
//!
//! Older producers only ever send plain text. Any frame shorter than a full
//! record is taken to be such a legacy text frame.

use std::borrow::Cow;

use crate::errors::DecodeError;
use crate::record::{LogLevel, LogRecord, MAX_MESSAGE_LEN, MAX_TAG_LEN};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Size of the message field including its terminator
pub const MESSAGE_CAPACITY: usize = MAX_MESSAGE_LEN + 1;

/// Size of the tag field including its terminator
pub const TAG_CAPACITY: usize = MAX_TAG_LEN + 1;

/// Total size of a binary record on the wire
pub const WIRE_RECORD_SIZE: usize = 4 + 1 + 2 + MESSAGE_CAPACITY + TAG_CAPACITY;

/// Tag assigned to records synthesized from legacy text frames
pub const LEGACY_TAG: &str = "REMOTE";

const TIMESTAMP_OFFSET: usize = 0;
const LEVEL_OFFSET: usize = 4;
const LENGTH_OFFSET: usize = 5;
const MESSAGE_OFFSET: usize = 7;
const TAG_OFFSET: usize = MESSAGE_OFFSET + MESSAGE_CAPACITY;

// ----------------------------------------------------------------------------
// Wire Codec
// ----------------------------------------------------------------------------

/// Encoder/decoder for producer log frames
pub struct WireCodec;

impl WireCodec {
    /// Encode a record into its fixed wire layout
    pub fn encode(record: &LogRecord) -> [u8; WIRE_RECORD_SIZE] {
        let mut frame = [0u8; WIRE_RECORD_SIZE];

        frame[TIMESTAMP_OFFSET..LEVEL_OFFSET].copy_from_slice(&record.timestamp().to_le_bytes());
        frame[LEVEL_OFFSET] = record.level().as_wire();

        let message = record.message().as_bytes();
        // LogRecord guarantees message.len() <= MAX_MESSAGE_LEN
        frame[LENGTH_OFFSET..MESSAGE_OFFSET].copy_from_slice(&(message.len() as u16).to_le_bytes());
        frame[MESSAGE_OFFSET..MESSAGE_OFFSET + message.len()].copy_from_slice(message);

        let tag = record.tag().as_bytes();
        frame[TAG_OFFSET..TAG_OFFSET + tag.len()].copy_from_slice(tag);

        frame
    }

    /// Decode a notification payload.
    ///
    /// `received_at_ms` stamps records built from legacy text frames, which
    /// carry no timestamp of their own.
    pub fn decode(bytes: &[u8], received_at_ms: u32) -> Result<LogRecord, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        if bytes.len() >= WIRE_RECORD_SIZE {
            Self::decode_binary(&bytes[..WIRE_RECORD_SIZE])
        } else {
            Ok(Self::decode_text(bytes, received_at_ms))
        }
    }

    fn decode_binary(frame: &[u8]) -> Result<LogRecord, DecodeError> {
        let timestamp = u32::from_le_bytes([
            frame[TIMESTAMP_OFFSET],
            frame[TIMESTAMP_OFFSET + 1],
            frame[TIMESTAMP_OFFSET + 2],
            frame[TIMESTAMP_OFFSET + 3],
        ]);
        let level = LogLevel::from_wire(frame[LEVEL_OFFSET]);
        let declared = u16::from_le_bytes([frame[LENGTH_OFFSET], frame[LENGTH_OFFSET + 1]]) as usize;

        if declared > MAX_MESSAGE_LEN {
            return Err(DecodeError::Truncated {
                declared,
                capacity: MAX_MESSAGE_LEN,
            });
        }

        let message = until_nul(&frame[MESSAGE_OFFSET..MESSAGE_OFFSET + declared]);
        // The last tag byte is the terminator whatever the sender put there
        let tag = until_nul(&frame[TAG_OFFSET..TAG_OFFSET + MAX_TAG_LEN]);

        Ok(LogRecord::new(timestamp, level, &tag, &message))
    }

    fn decode_text(bytes: &[u8], received_at_ms: u32) -> LogRecord {
        let text = until_nul(bytes);
        LogRecord::new(received_at_ms, LogLevel::Info, LEGACY_TAG, &text)
    }
}

fn until_nul(bytes: &[u8]) -> Cow<'_, str> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
}
