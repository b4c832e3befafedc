//! Device manager for PC/SC operations

use std::fmt;

use fob_apdu_core::{CardConnector, TransportError};
use parking_lot::Mutex;
use pcsc::{Context, ReaderState, Scope, State};
use tracing::{debug, info};

use crate::config::PcscConfig;
use crate::error::PcscError;
use crate::monitor::ReaderMonitor;
use crate::reader::PcscReader;
use crate::transport::PcscTransport;
use crate::util::is_service_lost;

/// Manager for PC/SC device operations
pub struct PcscDeviceManager {
    /// PC/SC context, replaced when the service restarts
    context: Mutex<Context>,
    /// Configuration handed to transports and monitors
    config: PcscConfig,
}

impl fmt::Debug for PcscDeviceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscDeviceManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PcscDeviceManager {
    /// Create a new PC/SC device manager
    pub fn new() -> Result<Self, PcscError> {
        Self::with_config(PcscConfig::default())
    }

    /// Create a device manager with a custom configuration
    pub fn with_config(config: PcscConfig) -> Result<Self, PcscError> {
        let context = Mutex::new(Context::establish(Scope::User)?);
        Ok(Self { context, config })
    }

    /// Configuration in use
    pub const fn config(&self) -> &PcscConfig {
        &self.config
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<PcscReader>, PcscError> {
        let context = self.context.lock().clone();
        let readers = match context.list_readers_owned() {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if readers.is_empty() {
            return Err(PcscError::NoReadersAvailable);
        }

        let mut result = Vec::with_capacity(readers.len());
        for reader_name in readers {
            let mut reader_states = [ReaderState::new(reader_name.clone(), State::UNAWARE)];
            match context.get_status_change(None, &mut reader_states) {
                Ok(()) => result.push(PcscReader::from_reader_state(&reader_states[0])),
                Err(e) => {
                    debug!(error = %e, "Could not read reader status");
                    result.push(PcscReader::new(
                        reader_name.to_string_lossy().into_owned(),
                        None,
                    ));
                }
            }
        }

        Ok(result)
    }

    /// Open a connection to the card in a specific reader
    ///
    /// A context invalidated by a service restart is established again once.
    pub fn open_reader(&self, reader_name: &str) -> Result<PcscTransport, PcscError> {
        let context = self.context.lock().clone();
        match PcscTransport::connect(context, reader_name, self.config.clone()) {
            Err(PcscError::Pcsc(e)) if is_service_lost(&e) => {
                info!(error = %e, "Re-establishing PC/SC context");
                let fresh = Context::establish(Scope::User)?;
                *self.context.lock() = fresh.clone();
                PcscTransport::connect(fresh, reader_name, self.config.clone())
            }
            result => result,
        }
    }

    /// Create a monitor for reader and card events
    pub fn monitor(&self) -> Result<ReaderMonitor, PcscError> {
        // The monitor blocks in get_status_change, so it gets its own context
        let context = Context::establish(Scope::User)?;
        Ok(ReaderMonitor::new(context, self.config.poll_interval))
    }
}

impl CardConnector for PcscDeviceManager {
    type Transport = PcscTransport;

    fn connect(&self, reader: &str) -> Result<Self::Transport, TransportError> {
        self.open_reader(reader).map_err(TransportError::from)
    }
}
