//! CAN Stream Core Library
//!
//! Decodes CAN-bus frames against DBC signal definitions and maintains a
//! live/historical event store with incremental per-message change
//! analysis.
//!
//! # Architecture
//!
//! The library is split along the data path:
//! - `dbc` parses and owns message/signal definitions (layout, masks,
//!   multiplexing)
//! - `codec` extracts and packs bit-level signal values from payload bytes
//! - `store` keeps every received event in time order, maintains sparse
//!   per-second indices for range queries, and tracks per-message change
//!   state (trend classification, bit entropy, decay colors, suppression)
//! - `source` feeds frames in from replay segments or a live receiver
//! - `notify` carries change notifications to the consumer over a channel
//!
//! The library does NOT:
//! - Render anything (colors are plain RGBA values for a UI to consume)
//! - Talk to CAN hardware (frames arrive as opaque tuples)
//! - Persist state (DBC serialization belongs to the application layer)
//!
//! # Example Usage
//!
//! ```no_run
//! use can_stream_core::{DbcDatabase, EventStore, StreamConfig, RawCanFrame, MessageId};
//! use std::sync::Arc;
//!
//! let mut dbc = DbcDatabase::new();
//! dbc.load_str(r#"
//! BO_ 256 Speed: 8 ECU1
//!  SG_ SPEED : 0|16@1+ (0.01,0) [0|655.35] "km/h" ECU2
//! "#).unwrap();
//!
//! let store = Arc::new(EventStore::new(StreamConfig::new()));
//! store.push_frame(&RawCanFrame {
//!     source: 0,
//!     address: 0x100,
//!     mono_time: 0,
//!     dat: vec![0x10, 0x27, 0, 0, 0, 0, 0, 0],
//! });
//! store.commit_snapshots();
//!
//! let snapshot = store.snapshot(&MessageId::new(0, 0x100)).unwrap();
//! let msg = dbc.msg(0x100).unwrap();
//! let speed = can_stream_core::codec::decode(&snapshot.dat, msg.signal("SPEED").unwrap());
//! assert_eq!(speed, 100.0);
//! ```

// Public modules
pub mod codec;
pub mod config;
pub mod dbc;
pub mod notify;
pub mod source;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use config::StreamConfig;
pub use dbc::{DbcDatabase, Message, Signal, SignalType};
pub use notify::{notification_channel, Notifier, StreamNotification};
pub use source::{Source, SourceBackend};
pub use store::{CanEvent, DataPattern, EventStore, MessageState};
pub use types::{MessageId, RawCanFrame, Result, StreamError, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: empty database, empty store
        let db = DbcDatabase::new();
        assert_eq!(db.stats().num_messages, 0);
        let store = EventStore::new(StreamConfig::new());
        assert_eq!(store.snapshot_ids().len(), 0);
    }
}
