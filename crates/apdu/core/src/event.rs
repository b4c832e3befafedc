//! Reader and card events published by a reader monitor

use crossbeam_channel::{Receiver, Sender, unbounded};

/// One change on a reader, in the order it was observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Reader was connected to the system
    Attached(String),
    /// A card entered the field
    CardPresent {
        /// Reader name
        reader: String,
        /// Serial read from the card's ATR; empty when the ATR carries none
        serial: String,
    },
    /// The card left the field
    CardAbsent {
        /// Reader name
        reader: String,
    },
    /// The reader reported a failure
    Error {
        /// Reader name
        reader: String,
        /// Driver message
        message: String,
    },
    /// Reader was disconnected from the system
    Detached(String),
}

impl ReaderEvent {
    /// Name of the reader the event concerns
    pub fn reader(&self) -> &str {
        match self {
            Self::Attached(reader) | Self::Detached(reader) => reader,
            Self::CardPresent { reader, .. }
            | Self::CardAbsent { reader }
            | Self::Error { reader, .. } => reader,
        }
    }
}

/// Sender for reader events
pub type ReaderEventSender = Sender<ReaderEvent>;
/// Receiver for reader events
pub type ReaderEventReceiver = Receiver<ReaderEvent>;

/// Create an unbounded channel for reader events
pub fn reader_event_channel() -> (ReaderEventSender, ReaderEventReceiver) {
    unbounded()
}
