//! Core types for the CAN stream library
//!
//! This module defines the fundamental types shared across the crate: message
//! identity, raw frames as delivered by stream sources, and the error
//! taxonomy. Decoded state and events live in the `store` module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wall-clock timestamp type used when anchoring monotonic time for display
pub type Timestamp = DateTime<Utc>;

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Composite key identifying a message on a specific bus
///
/// A CAN address alone is not unique across buses; the source byte
/// disambiguates. Ordering is by the packed `(source << 32) | address`
/// integer so ids sort by bus first, then address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    /// Bus source byte (0, 1, 2...)
    pub source: u8,
    /// CAN message address (11-bit or 29-bit)
    pub address: u32,
}

impl MessageId {
    pub fn new(source: u8, address: u32) -> Self {
        Self { source, address }
    }

    /// Packed integer used for the total order
    pub fn packed(&self) -> u64 {
        ((self.source as u64) << 32) | self.address as u64
    }
}

impl PartialOrd for MessageId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MessageId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.packed().cmp(&other.packed())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:X}", self.source, self.address)
    }
}

/// Raw CAN frame as delivered by a stream source
///
/// Sources (live device, replay segments) hand frames to the store as opaque
/// tuples; no decoding has happened at this point.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCanFrame {
    /// Bus source byte
    pub source: u8,
    /// CAN message address
    pub address: u32,
    /// Monotonic timestamp in nanoseconds
    pub mono_time: u64,
    /// Frame payload (0-8 bytes for classic CAN, up to 64 for CAN-FD)
    pub dat: Vec<u8>,
}

impl RawCanFrame {
    pub fn id(&self) -> MessageId {
        MessageId::new(self.source, self.address)
    }

    /// Convert the monotonic timestamp to wall-clock time given the
    /// wall-clock instant that corresponds to mono_time zero
    pub fn wall_time(&self, anchor: Timestamp) -> Timestamp {
        anchor + chrono::Duration::nanoseconds(self.mono_time as i64)
    }
}

/// Errors surfaced by the stream core
///
/// Parse errors are fatal only to the file being loaded. Decode failures on
/// the per-frame hot path never appear here; out-of-range reads degrade to
/// sentinel values instead (see `codec`).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Failed to parse DBC line {line}: {reason}\n  {content}")]
    Parse {
        line: usize,
        content: String,
        reason: String,
    },

    #[error("Duplicate message address: 0x{0:X}")]
    DuplicateAddress(u32),

    #[error("Duplicate signal name in message: {0}")]
    DuplicateSignal(String),

    #[error("Message already has a multiplexor signal: {0}")]
    MultiplexorExists(String),

    #[error("Message not found: CAN address 0x{0:X}")]
    MessageNotFound(u32),

    #[error("Signal not found: {0}")]
    SignalNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Build a parse error for a specific line of a DBC file
    pub fn parse(line: usize, content: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::Parse {
            line,
            content: content.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_order() {
        let a = MessageId::new(0, 0x200);
        let b = MessageId::new(0, 0x100);
        let c = MessageId::new(1, 0x100);
        assert!(b < a);
        assert!(a < c); // source dominates address
        assert_eq!(c.packed(), (1u64 << 32) | 0x100);
    }

    #[test]
    fn test_message_id_display() {
        let id = MessageId::new(2, 0x1FF);
        assert_eq!(id.to_string(), "2:1FF");
    }

    #[test]
    fn test_parse_error_format() {
        let err = StreamError::parse(12, "SG_ bogus", "malformed signal clause");
        let text = err.to_string();
        assert!(text.contains("line 12"));
        assert!(text.contains("SG_ bogus"));
    }
}
