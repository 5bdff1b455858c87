//! Change notifications
//!
//! Structural changes to the DBC database and state changes in the event
//! store are published on an explicit channel instead of cross-thread
//! callbacks. Rapid updates coalesce upstream: snapshot commits batch all
//! dirty ids into a single `SnapshotsUpdated` per UI frame.

use crate::types::MessageId;
use crossbeam_channel::{unbounded, Receiver, Sender};

/// Notifications published by the stream core
#[derive(Debug, Clone, PartialEq)]
pub enum StreamNotification {
    /// A signal was added to a message definition
    SignalAdded { address: u32, name: String },
    /// A signal definition was edited
    SignalUpdated { address: u32, name: String },
    /// A signal was removed from a message definition
    SignalRemoved { address: u32, name: String },
    /// A message definition changed (signals re-sorted, mask recomputed)
    MessageUpdated { address: u32 },
    /// A message definition was removed
    MessageRemoved { address: u32 },
    /// A batch of events was merged into the store
    EventsMerged { ids: Vec<MessageId> },
    /// Dirty snapshots were committed; `structure_changed` when a
    /// previously unseen id appeared or a known id vanished
    SnapshotsUpdated {
        ids: Vec<MessageId>,
        structure_changed: bool,
    },
    /// The set of live bus sources changed
    SourcesUpdated { sources: Vec<u8> },
    /// A seek completed and snapshots reflect the target time
    SeekFinished { sec: f64 },
}

pub type NotificationSender = Sender<StreamNotification>;
pub type NotificationReceiver = Receiver<StreamNotification>;

/// Create an unbounded notification channel
pub fn notification_channel() -> (NotificationSender, NotificationReceiver) {
    unbounded()
}

/// Optional notification sink
///
/// Components hold a `Notifier` and publish through it; with no subscriber
/// attached (or after the receiver is dropped) sends become no-ops.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<NotificationSender>,
}

impl Notifier {
    pub fn new(tx: NotificationSender) -> Self {
        Self { tx: Some(tx) }
    }

    /// A notifier that drops everything
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, notification: StreamNotification) {
        if let Some(tx) = &self.tx {
            // A disconnected receiver just means nobody is listening
            let _ = tx.send(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_delivery() {
        let (tx, rx) = notification_channel();
        let notifier = Notifier::new(tx);
        notifier.send(StreamNotification::MessageUpdated { address: 0x100 });
        assert_eq!(
            rx.try_recv().unwrap(),
            StreamNotification::MessageUpdated { address: 0x100 }
        );
    }

    #[test]
    fn test_none_notifier_is_noop() {
        let notifier = Notifier::none();
        notifier.send(StreamNotification::MessageRemoved { address: 1 });
    }

    #[test]
    fn test_disconnected_receiver_ignored() {
        let (tx, rx) = notification_channel();
        drop(rx);
        let notifier = Notifier::new(tx);
        notifier.send(StreamNotification::MessageUpdated { address: 2 });
    }
}
