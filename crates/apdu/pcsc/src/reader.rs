//! Reader representation for PC/SC devices

use pcsc::{ReaderState, State};

use crate::util::serial_from_atr;

/// Snapshot of a PC/SC card reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcscReader {
    /// Name of the reader
    name: String,

    /// Answer To Reset of the seated card, if any
    atr: Option<Vec<u8>>,
}

impl PcscReader {
    /// Create a new reader
    pub const fn new(name: String, atr: Option<Vec<u8>>) -> Self {
        Self { name, atr }
    }

    /// Create a reader from a reader state
    pub(crate) fn from_reader_state(reader_state: &ReaderState) -> Self {
        let atr = card_present(reader_state.event_state()).then(|| reader_state.atr().to_vec());
        Self {
            name: reader_state.name().to_string_lossy().into_owned(),
            atr,
        }
    }

    /// Get the reader name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if a card is present in the reader
    pub const fn has_card(&self) -> bool {
        self.atr.is_some()
    }

    /// Get the ATR of the card if present
    pub fn atr(&self) -> Option<&[u8]> {
        self.atr.as_deref()
    }

    /// Serial of the seated card, if one is present and its ATR is long enough
    pub fn serial(&self) -> Option<String> {
        self.atr.as_deref().and_then(serial_from_atr)
    }
}

/// Whether a reader state reports a seated card
pub(crate) fn card_present(state: State) -> bool {
    state.contains(State::PRESENT) && !state.contains(State::EMPTY)
}
