//! Transport traits for APDU communication with cards
//!
//! A [`CardTransport`] is one open connection to the card currently in the
//! field. A [`CardConnector`] opens such connections by reader name; it is
//! what long-lived components hold, since the card behind a reader changes
//! with every tap.

pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;

use std::fmt;

use bytes::Bytes;
pub use error::TransportError;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockCard, MockConnector, MockTransport};
use tracing::{debug, trace};

/// Trait for basic card transports
///
/// A transport is responsible for sending and receiving raw APDU bytes.
/// It has no knowledge of command structure or protocol details. One command
/// is in flight at a time; `&mut self` enforces it.
pub trait CardTransport: Send + fmt::Debug {
    /// Send raw APDU bytes to card and return response bytes
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        trace!(command = %hex::encode(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    /// This is the method that concrete implementations should override
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError>;

    /// Check if the transport is connected to a physical card
    fn is_connected(&self) -> bool;
}

/// Opens transports to the card seated in a named reader
pub trait CardConnector: Send + Sync {
    /// Transport produced by this connector
    type Transport: CardTransport;

    /// Connect to the card currently in `reader`
    fn connect(&self, reader: &str) -> Result<Self::Transport, TransportError>;
}
