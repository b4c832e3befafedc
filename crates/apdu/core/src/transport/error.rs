//! Error types specific to card transport

/// Transport error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection error
    #[error("Failed to connect to device")]
    Connection,

    /// Transmission error
    #[error("Failed to transmit data")]
    Transmission,

    /// The card answered with no bytes at all
    #[error("No response from card")]
    NoResponse,

    /// No answer within the response window
    #[error("Operation timed out")]
    Timeout,

    /// The card left the field during the exchange
    #[error("Card was removed")]
    CardRemoved,

    /// Reader driver error (with code)
    #[error("Driver error code: {0:#x}")]
    Driver(i64),

    /// Other error with message
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a general other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }

    /// Whether the failure leaves the card's state unknown, i.e. the command
    /// may or may not have been executed
    pub const fn is_outcome_unknown(&self) -> bool {
        matches!(
            self,
            Self::Transmission | Self::NoResponse | Self::Timeout | Self::CardRemoved
        )
    }
}
