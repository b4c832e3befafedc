//! Error types for fob provisioning

use fob_apdu_core::{CommandError, StatusWord, TransportError};

use crate::commands::Step;
use crate::store::StoreError;
use crate::supervisor::Workflow;

/// Result type for provisioning operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while provisioning, verifying or uploading a fob
///
/// The `Display` text is the message shown to the operator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key is neither 16 nor 32 hex characters
    #[error("Key must be 16 or 32 hex characters, got {0}")]
    InvalidKeyLength(usize),

    /// Input is not valid hex
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Cipher input is not a whole number of blocks
    #[error("Cipher input must be a multiple of 8 bytes, got {0}")]
    InvalidBlockLength(usize),

    /// A command could not be built
    #[error("Invalid command: {0}")]
    Command(#[from] CommandError),

    /// The reader or the card failed to carry a command
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The card answered a step with an unexpected status word
    #[error("{step} error: res = {}", .status.to_hex())]
    Card {
        /// Step that failed
        step: Step,
        /// Status word the card returned
        status: StatusWord,
    },

    /// The card rejected the host cryptogram
    #[error("External authentication error: res = {}", .0.to_hex())]
    AuthRejected(StatusWord),

    /// The registry could not be reached or refused the request
    #[error("Network error: {0}")]
    Network(String),

    /// No reader is attached
    #[error("No NFC reader is found")]
    ReaderAbsent,

    /// A card is seated while a workflow is being started
    #[error("Please remove the fob from the reader, then start")]
    CardAlreadyPresent,

    /// Another workflow owns the reader
    #[error("{0} is already running")]
    WorkflowActive(Workflow),

    /// Init on a fob that already holds a provisioned secret
    #[error("The fob has been initialized")]
    AlreadyInitialized,

    /// Init on a fob already registered with the registry
    #[error("The fob has been uploaded")]
    AlreadyUploaded,

    /// Verify on a fob with no record
    #[error("The fob hasn't been initialized")]
    NeverInitialized,

    /// The lifecycle store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the card may have executed the command that failed
    pub const fn is_outcome_unknown(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_outcome_unknown(),
            _ => false,
        }
    }
}
