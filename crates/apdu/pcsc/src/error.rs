//! Error types for PC/SC transport

use fob_apdu_core::TransportError;

/// PC/SC-specific errors
#[derive(Debug, thiserror::Error)]
pub enum PcscError {
    /// PC/SC error
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// No readers available
    #[error("No readers available")]
    NoReadersAvailable,

    /// Reader not found
    #[error("Reader not found: {0}")]
    ReaderNotFound(String),

    /// No card present in reader
    #[error("No card present in reader: {0}")]
    NoCard(String),

    /// Card was reset or removed mid-exchange
    #[error("Card was removed")]
    CardRemoved,

    /// The card answered after the response window closed
    #[error("Card did not answer within {0} ms")]
    Timeout(u128),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl From<PcscError> for TransportError {
    fn from(error: PcscError) -> Self {
        match error {
            PcscError::Pcsc(pcsc::Error::RemovedCard | pcsc::Error::ResetCard)
            | PcscError::CardRemoved => Self::CardRemoved,
            PcscError::Pcsc(pcsc::Error::Timeout) | PcscError::Timeout(_) => Self::Timeout,
            PcscError::Pcsc(pcsc::Error::NoSmartcard) | PcscError::NoCard(_) => Self::Connection,
            PcscError::Pcsc(e) => Self::Driver(i64::from(e as u32)),
            PcscError::NoReadersAvailable | PcscError::ReaderNotFound(_) => Self::Connection,
            PcscError::Other(message) => Self::Other(message),
        }
    }
}
