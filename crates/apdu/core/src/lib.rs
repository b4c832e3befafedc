//! Core traits and types for APDU (Application Protocol Data Unit) exchanges
//! with contactless fobs
//!
//! This crate provides the foundational pieces the provisioning engine is built
//! on:
//!
//! - [`StatusWord`] and its interpretation, including the card-specific codes
//!   the provisioning protocol branches on
//! - [`Command`] for hex-templated commands and [`Response`] for raw replies
//! - The [`CardTransport`] and [`CardConnector`] traits implemented by the
//!   PC/SC transport (and by `transport::MockTransport` for tests)
//! - [`ReaderEvent`], the stream a reader monitor publishes
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::Bytes;

pub mod command;
pub mod event;
pub mod response;
pub mod status;
pub mod transport;

pub use command::{Command, CommandError};
pub use event::ReaderEvent;
pub use response::{Response, ResponseError};
pub use status::StatusWord;
pub use transport::{CardConnector, CardTransport, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, Command, Response, StatusWord,
        transport::{CardConnector, CardTransport, TransportError},
    };
}
