//! Provisioning engine for DES-keyed contactless fobs
//!
//! A fob is tapped on a reader, authenticated against its current key,
//! bootstrapped or wiped, given a fresh secret, and finally registered with
//! the backend. This crate holds every step of that lifecycle:
//!
//! - [`cipher`](self::cipher): DES and two-key 3DES used for the host cryptogram
//! - [`commands`]: the fixed command set the fobs understand
//! - [`session`]: one command at a time, traced and stamped on the record
//! - [`machine`]: the init and verify workflows
//! - [`store`]: fob records and their lifecycle flags
//! - [`registry`] and [`upload`]: getting initialized fobs to the backend
//! - [`supervisor`]: reader events, workflow ownership and dispatch
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fob_apdu_core::CardConnector;
//! use fob_provision::{MemoryStore, Notifier, Provisioner, ProvisionerConfig};
//!
//! fn provision<C: CardConnector>(connector: &C, reader: &str, serial: &str) -> fob_provision::Result<()> {
//!     let (notifier, _notices) = Notifier::channel();
//!     let provisioner = Provisioner::new(
//!         Arc::new(MemoryStore::new()),
//!         notifier,
//!         ProvisionerConfig::default(),
//!     );
//!     let mut transport = connector.connect(reader)?;
//!     let provisioned = provisioner.init(&mut transport, serial)?;
//!     println!("Initialized {}", provisioned.fob.display_number());
//!     Ok(())
//! }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod cipher;
pub mod commands;
pub mod config;
mod error;
pub mod fob;
pub mod machine;
pub mod notice;
pub mod registry;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod upload;

pub use self::cipher::{CipherUnit, DesKey};
pub use config::Config;
pub use error::{Error, Result};
pub use fob::{Fob, FobPatch};
pub use machine::{
    KeyingPath, ProvisionState, Provisioned, Provisioner, ProvisionerConfig, SecretPolicy,
};
pub use notice::{Direction, Notice, NoticeReceiver, Notifier, VerifyReport};
pub use registry::{Registry, RegistryClient, RegistryEnvironment, UploadOutcome};
pub use store::{FobStore, JsonFileStore, MemoryStore, StoreError};
pub use supervisor::{Control, ControlSender, SessionState, Supervisor, Workflow};
pub use upload::{
    BatchOutcome, Operator, ShutdownOutcome, TokioDispatch, UploadDispatch, UploadPipeline,
    UploadResult,
};
