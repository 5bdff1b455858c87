//! DBC signal definitions
//!
//! The database combines message definitions from one or more DBC files
//! into a single address-keyed map and supports interactive editing with
//! change notifications. Structural edits always re-run the owning
//! message's `update()` so derived state never goes stale.

pub mod message;
pub mod parse;
pub mod signal;

pub use message::{Message, DEFAULT_NODE_NAME};
pub use signal::{Signal, SignalType};

use crate::notify::{Notifier, StreamNotification};
use crate::types::{Result, StreamError};
use std::collections::BTreeMap;
use std::path::Path;

/// Address-keyed DBC message database
#[derive(Debug, Default)]
pub struct DbcDatabase {
    /// Message definitions by CAN address
    messages: BTreeMap<u32, Message>,
    /// Change notification sink
    notifier: Notifier,
}

impl DbcDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a notification sink for structural changes
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Load a DBC file from disk, adding its messages to the database
    ///
    /// A parse failure aborts only this file; definitions already in the
    /// database are untouched.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let messages = parse::parse_dbc_file(path)?;
        self.insert_messages(messages);
        Ok(())
    }

    /// Load DBC text, adding its messages to the database
    pub fn load_str(&mut self, content: &str) -> Result<()> {
        let messages = parse::parse_dbc(content)?;
        self.insert_messages(messages);
        Ok(())
    }

    fn insert_messages(&mut self, messages: Vec<Message>) {
        for msg in messages {
            if self.messages.contains_key(&msg.address) {
                log::warn!(
                    "Replacing existing definition for address 0x{:X} ({})",
                    msg.address,
                    msg.name
                );
            }
            let address = msg.address;
            self.messages.insert(address, msg);
            self.notifier
                .send(StreamNotification::MessageUpdated { address });
        }
    }

    /// Look up a message definition by address
    pub fn msg(&self, address: u32) -> Option<&Message> {
        self.messages.get(&address)
    }

    /// All message definitions in address order
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    /// Number of message definitions
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Sorted, de-duplicated list of every signal name in the database
    pub fn signal_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .messages
            .values()
            .flat_map(|m| m.signals.iter().map(|s| s.name.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Add a new (empty) message definition
    pub fn add_message(&mut self, mut msg: Message) -> Result<()> {
        if self.messages.contains_key(&msg.address) {
            return Err(StreamError::DuplicateAddress(msg.address));
        }
        msg.update();
        let address = msg.address;
        self.messages.insert(address, msg);
        self.notifier
            .send(StreamNotification::MessageUpdated { address });
        Ok(())
    }

    /// Remove a message definition
    pub fn remove_message(&mut self, address: u32) -> Result<Message> {
        let msg = self
            .messages
            .remove(&address)
            .ok_or(StreamError::MessageNotFound(address))?;
        self.notifier
            .send(StreamNotification::MessageRemoved { address });
        Ok(msg)
    }

    /// Add a signal to an existing message
    ///
    /// Rejects duplicate names and a second Multiplexor; on success the
    /// message is re-derived (sort, mask, multiplex links).
    pub fn add_signal(&mut self, address: u32, sig: Signal) -> Result<()> {
        let msg = self
            .messages
            .get_mut(&address)
            .ok_or(StreamError::MessageNotFound(address))?;
        if msg.signals.iter().any(|s| s.name == sig.name) {
            return Err(StreamError::DuplicateSignal(sig.name));
        }
        if sig.signal_type == SignalType::Multiplexor {
            if let Some(existing) = msg.multiplexor_signal() {
                return Err(StreamError::MultiplexorExists(existing.name.clone()));
            }
        }
        let name = sig.name.clone();
        msg.signals.push(sig);
        msg.update();
        self.notifier
            .send(StreamNotification::SignalAdded { address, name });
        self.notifier
            .send(StreamNotification::MessageUpdated { address });
        Ok(())
    }

    /// Replace a signal definition in-place, keyed by its current name
    pub fn update_signal(&mut self, address: u32, name: &str, sig: Signal) -> Result<()> {
        let msg = self
            .messages
            .get_mut(&address)
            .ok_or(StreamError::MessageNotFound(address))?;
        let idx = msg
            .signal_index(name)
            .ok_or_else(|| StreamError::SignalNotFound(name.to_string()))?;
        if sig.name != name && msg.signals.iter().any(|s| s.name == sig.name) {
            return Err(StreamError::DuplicateSignal(sig.name));
        }
        if sig.signal_type == SignalType::Multiplexor {
            if let Some(mux) = msg.multiplexor {
                if mux != idx {
                    return Err(StreamError::MultiplexorExists(
                        msg.signals[mux].name.clone(),
                    ));
                }
            }
        }
        let name = sig.name.clone();
        msg.signals[idx] = sig;
        msg.update();
        self.notifier
            .send(StreamNotification::SignalUpdated { address, name });
        self.notifier
            .send(StreamNotification::MessageUpdated { address });
        Ok(())
    }

    /// Remove a signal from a message
    pub fn remove_signal(&mut self, address: u32, name: &str) -> Result<Signal> {
        let msg = self
            .messages
            .get_mut(&address)
            .ok_or(StreamError::MessageNotFound(address))?;
        let idx = msg
            .signal_index(name)
            .ok_or_else(|| StreamError::SignalNotFound(name.to_string()))?;
        let sig = msg.signals.remove(idx);
        msg.update();
        self.notifier.send(StreamNotification::SignalRemoved {
            address,
            name: sig.name.clone(),
        });
        self.notifier
            .send(StreamNotification::MessageUpdated { address });
        Ok(sig)
    }

    /// Database statistics
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.values().map(|m| m.signals.len()).sum(),
        }
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub num_messages: usize,
    pub num_signals: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::notification_channel;

    fn test_db() -> DbcDatabase {
        let mut db = DbcDatabase::new();
        db.load_str(
            r#"
BO_ 256 Speed: 8 ECU1
 SG_ SPEED : 0|16@1+ (0.01,0) [0|655.35] "km/h" ECU2
"#,
        )
        .unwrap();
        db
    }

    #[test]
    fn test_load_and_lookup() {
        let db = test_db();
        assert_eq!(db.len(), 1);
        let msg = db.msg(0x100).unwrap();
        assert_eq!(msg.name, "Speed");
        assert!(msg.signal("SPEED").is_some());
        assert_eq!(db.signal_names(), vec!["SPEED".to_string()]);
    }

    #[test]
    fn test_stats() {
        let db = test_db();
        let stats = db.stats();
        assert_eq!(stats.num_messages, 1);
        assert_eq!(stats.num_signals, 1);
    }

    #[test]
    fn test_add_signal_duplicate_rejected() {
        let mut db = test_db();
        let err = db.add_signal(0x100, Signal::new("SPEED", 16, 8)).unwrap_err();
        assert!(matches!(err, StreamError::DuplicateSignal(_)));
    }

    #[test]
    fn test_second_multiplexor_rejected() {
        let mut db = test_db();
        let mut mux1 = Signal::new("SEL_A", 16, 8);
        mux1.signal_type = SignalType::Multiplexor;
        db.add_signal(0x100, mux1).unwrap();

        let mut mux2 = Signal::new("SEL_B", 24, 8);
        mux2.signal_type = SignalType::Multiplexor;
        let err = db.add_signal(0x100, mux2).unwrap_err();
        assert!(matches!(err, StreamError::MultiplexorExists(_)));
    }

    #[test]
    fn test_remove_multiplexor_demotes_children() {
        let mut db = DbcDatabase::new();
        db.load_str(
            r#"
BO_ 512 Muxed: 8 ECU1
 SG_ Mode M : 0|8@1+ (1,0) [0|3] "" ECU1
 SG_ SignalA m2 : 8|16@1+ (1,0) [0|100] "" ECU1
"#,
        )
        .unwrap();

        db.remove_signal(0x200, "Mode").unwrap();
        let sig = db.msg(0x200).unwrap().signal("SignalA").unwrap();
        assert_eq!(sig.signal_type, SignalType::Normal);
        assert_eq!(sig.multiplex_value, 0);
    }

    #[test]
    fn test_notifications_emitted() {
        let (tx, rx) = notification_channel();
        let mut db = DbcDatabase::new().with_notifier(Notifier::new(tx));
        db.load_str("BO_ 256 Speed: 8 ECU1\n").unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            StreamNotification::MessageUpdated { address: 0x100 }
        );

        db.add_signal(0x100, Signal::new("NEW", 0, 8)).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            StreamNotification::SignalAdded {
                address: 0x100,
                name: "NEW".to_string()
            }
        );
    }

    #[test]
    fn test_update_signal_rename() {
        let mut db = test_db();
        let mut renamed = db.msg(0x100).unwrap().signal("SPEED").unwrap().clone();
        renamed.name = "WHEEL_SPEED".to_string();
        db.update_signal(0x100, "SPEED", renamed).unwrap();
        let msg = db.msg(0x100).unwrap();
        assert!(msg.signal("SPEED").is_none());
        assert!(msg.signal("WHEEL_SPEED").is_some());
    }
}
