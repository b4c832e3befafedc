//! PC/SC transport implementation

use std::ffi::CString;
use std::fmt;
use std::time::Instant;

use fob_apdu_core::prelude::*;
use pcsc::{Card, Context, Disposition};
use tracing::{debug, warn};

use crate::{config::PcscConfig, error::PcscError};

/// Transport implementation using PC/SC
///
/// A transport is bound to the card that was seated when it was opened. Once
/// that card is reset or removed the transport stays disconnected; open a new
/// one for the next tap.
pub struct PcscTransport {
    /// Card connection, if established
    card: Option<Card>,
    /// PC/SC context, kept for `reset`
    context: Context,
    /// Reader name
    reader_name: String,
    /// Configuration
    config: PcscConfig,
}

impl fmt::Debug for PcscTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTransport")
            .field("reader_name", &self.reader_name)
            .field("has_card", &self.card.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl PcscTransport {
    /// Connect to the card in `reader_name`
    pub(crate) fn connect(
        context: Context,
        reader_name: &str,
        config: PcscConfig,
    ) -> Result<Self, PcscError> {
        let mut transport = Self {
            card: None,
            context,
            reader_name: reader_name.to_string(),
            config,
        };
        transport.connect_card()?;
        Ok(transport)
    }

    fn connect_card(&mut self) -> Result<(), PcscError> {
        let reader_cstr = CString::new(self.reader_name.clone())
            .map_err(|_| PcscError::ReaderNotFound(self.reader_name.clone()))?;

        match self.context.connect(
            &reader_cstr,
            self.config.share_mode.into(),
            self.config.protocols,
        ) {
            Ok(card) => {
                debug!(reader = %self.reader_name, "Connected to card");
                self.card = Some(card);
                Ok(())
            }
            Err(pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard) => {
                Err(PcscError::NoCard(self.reader_name.clone()))
            }
            Err(pcsc::Error::UnknownReader) => {
                Err(PcscError::ReaderNotFound(self.reader_name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get the ATR of the current card
    pub fn atr(&self) -> Result<Vec<u8>, PcscError> {
        self.card.as_ref().map_or_else(
            || Err(PcscError::NoCard(self.reader_name.clone())),
            |card| {
                card.get_attribute_owned(pcsc::Attribute::AtrString)
                    .map_err(Into::into)
            },
        )
    }

    /// Get the reader name
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    fn transmit_command(&mut self, command: &[u8]) -> Result<Bytes, PcscError> {
        let card = self
            .card
            .as_mut()
            .ok_or_else(|| PcscError::NoCard(self.reader_name.clone()))?;

        let mut response_buffer = [0u8; 258];
        let started = Instant::now();

        match card.transmit(command, &mut response_buffer) {
            Ok(response) => {
                let elapsed = started.elapsed();
                if elapsed > self.config.response_timeout {
                    warn!(
                        reader = %self.reader_name,
                        elapsed_ms = elapsed.as_millis(),
                        "Card answered after the response window"
                    );
                    return Err(PcscError::Timeout(self.config.response_timeout.as_millis()));
                }
                Ok(Bytes::copy_from_slice(response))
            }
            Err(e) => {
                if matches!(e, pcsc::Error::ResetCard | pcsc::Error::RemovedCard) {
                    self.card = None;
                    return Err(PcscError::CardRemoved);
                }
                Err(e.into())
            }
        }
    }
}

impl CardTransport for PcscTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        self.transmit_command(command).map_err(TransportError::from)
    }

    fn is_connected(&self) -> bool {
        self.card.is_some()
    }
}

impl Drop for PcscTransport {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(Disposition::LeaveCard);
        }
    }
}
