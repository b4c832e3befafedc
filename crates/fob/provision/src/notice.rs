//! Notifications for the operator surface
//!
//! Everything the operator sees flows through one [`Notifier`]. The engine
//! never waits on the receiving side; a dropped receiver only silences it.

use crossbeam_channel::{Receiver, Sender, unbounded};
use fob_apdu_core::StatusWord;
use tracing::trace;

use crate::fob::Fob;
use crate::supervisor::Workflow;

/// Direction of a traced exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to card
    Request,
    /// Card to host
    Response,
}

/// Outcome of a verify tap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// The record that was checked
    pub fob: Fob,
    /// Status word of the external authentication
    pub status: StatusWord,
    /// Number of records created before this one
    pub ordinal: usize,
    /// Number of records in the store
    pub total: usize,
}

/// A notification for the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A reader was attached
    ReaderAttached(String),
    /// The reader was detached
    ReaderDetached(String),
    /// The seated card changed; `None` once it is removed
    Card(Option<String>),
    /// Workflow ownership or busy state changed
    Workflow {
        /// Workflow owning the reader
        workflow: Workflow,
        /// Whether a card transaction is in flight
        busy: bool,
    },
    /// One command or response of a protocol step
    Trace {
        /// Serial of the fob being talked to
        serial: String,
        /// Step label as stored on the record
        label: String,
        /// Which way the bytes went
        direction: Direction,
        /// Bytes as hex
        hex: String,
    },
    /// Snapshot of a record after it changed
    Fob(Fob),
    /// A per-fob operation failed; the text is operator-facing
    Failure(String),
    /// An upload started or finished
    UploadInProgress(bool),
    /// The registry accepted a fob
    Uploaded {
        /// Record that was uploaded
        fob: Fob,
        /// Number of records created before this one
        ordinal: usize,
    },
    /// Result of a verify tap
    VerifyResult(VerifyReport),
    /// The verify selection no longer applies
    SelectionCleared,
    /// The reader went away while a workflow was running
    Interrupted(Workflow),
}

/// Receiver for operator notifications
pub type NoticeReceiver = Receiver<Notice>;

/// Sending half of the notification channel
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: Sender<Notice>,
}

impl Notifier {
    /// Create a notifier and the receiver the front end drains
    pub fn channel() -> (Self, NoticeReceiver) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    /// Publish a notice
    pub fn notify(&self, notice: Notice) {
        if let Err(e) = self.sender.send(notice) {
            trace!(notice = ?e.0, "No one is listening for notices");
        }
    }

    /// Publish an operator-facing failure
    pub fn failure(&self, message: impl Into<String>) {
        self.notify(Notice::Failure(message.into()));
    }
}
