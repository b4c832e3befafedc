//! PC/SC transport implementation for fob provisioning
//!
//! This crate provides an implementation of the `CardTransport` and
//! `CardConnector` traits from `fob-apdu-core` using the PC/SC API, plus a
//! monitor thread that turns reader and card state changes into a single
//! stream of [`ReaderEvent`]s.
//!
//! # Examples
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use fob_apdu_core::CardTransport;
//! use fob_apdu_transport_pcsc::{PcscDeviceManager, ReaderEvent};
//!
//! let manager = PcscDeviceManager::new()?;
//! let monitor = manager.monitor()?;
//! let events = monitor.start()?;
//!
//! for event in events {
//!     if let ReaderEvent::CardPresent { reader, serial } = event {
//!         println!("Card {serial} on {reader}");
//!         let mut transport = manager.open_reader(&reader)?;
//!         let response = transport.transmit_raw(&hex::decode("00A40000023F00")?)?;
//!         println!("Select MF: {}", hex::encode(response));
//!         break;
//!     }
//! }
//! monitor.stop();
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

mod config;
mod error;
mod manager;
mod monitor;
mod reader;
mod transport;
mod util;

pub use config::{PcscConfig, ShareMode};
pub use error::PcscError;
pub use fob_apdu_core::event::{
    ReaderEvent, ReaderEventReceiver, ReaderEventSender, reader_event_channel,
};
pub use manager::PcscDeviceManager;
pub use monitor::ReaderMonitor;
pub use reader::PcscReader;
pub use transport::PcscTransport;
pub use util::serial_from_atr;

// Re-export some pcsc types for convenience
pub use pcsc::{Protocols, Scope};
