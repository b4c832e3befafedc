//! Transport session: one fob, one open transport, one command at a time

use std::sync::Arc;

use fob_apdu_core::{CardTransport, Command, Response, TransportError};
use tracing::{trace, warn};

use crate::commands::Step;
use crate::fob::{Fob, FobPatch};
use crate::notice::{Direction, Notice, Notifier};
use crate::store::FobStore;
use crate::{Error, Result};

/// Exchanges commands with the fob in the field on behalf of one record
///
/// Each exchange is traced to the operator and stamped on the record as its
/// `last_operation`: `"<step>..."` when sent, `"<step> - <last 4 hex>"` when
/// answered.
#[derive(Debug)]
pub struct Session<'a, T: CardTransport> {
    transport: &'a mut T,
    store: Arc<dyn FobStore>,
    notifier: Notifier,
    fob: Fob,
}

impl<'a, T: CardTransport> Session<'a, T> {
    /// Open a session for `fob` over `transport`
    pub fn new(
        transport: &'a mut T,
        store: Arc<dyn FobStore>,
        notifier: Notifier,
        fob: Fob,
    ) -> Self {
        Self {
            transport,
            store,
            notifier,
            fob,
        }
    }

    /// Latest snapshot of the record
    pub const fn fob(&self) -> &Fob {
        &self.fob
    }

    /// Give up the session, keeping the latest snapshot
    pub fn into_fob(self) -> Fob {
        self.fob
    }

    /// Apply `patch` to the record and publish the new snapshot
    pub fn update(&mut self, patch: FobPatch) -> Result<&Fob> {
        self.fob = self.store.update(self.fob.id, patch)?;
        self.notifier.notify(Notice::Fob(self.fob.clone()));
        Ok(&self.fob)
    }

    /// Send `command` as `step` and return the card's answer
    ///
    /// Checked steps fail on anything but `9000`. Unchecked steps return the
    /// answer for the caller to branch on. A reply too short to carry a
    /// status word fails either way.
    pub fn transmit(&mut self, step: Step, command: &Command) -> Result<Response> {
        trace!("-- {step} --");
        self.record(step, Direction::Request, format!("{step}..."), command.to_hex())?;

        let raw = self.transport.transmit_raw(command.as_bytes())?;

        let response_hex = hex::encode(&raw);
        let tail = if response_hex.is_empty() {
            "\"\""
        } else {
            &response_hex[response_hex.len().saturating_sub(4)..]
        };
        let label = format!("{step} - {tail}");
        self.record(step, Direction::Response, label, response_hex)?;

        let response =
            Response::from_bytes(&raw).map_err(|_| Error::Transport(TransportError::NoResponse))?;

        if step.is_checked() && !response.is_success() {
            warn!(
                serial = %self.fob.serial,
                step = %step,
                status = %response.status(),
                "Card rejected command"
            );
            return Err(Error::Card {
                step,
                status: response.status(),
            });
        }

        Ok(response)
    }

    fn record(&mut self, step: Step, direction: Direction, label: String, hex: String) -> Result<()> {
        trace!(step = %step, ?direction, %hex);
        self.fob = self
            .store
            .update(self.fob.id, FobPatch::last_operation(label.clone()))?;
        self.notifier.notify(Notice::Trace {
            serial: self.fob.serial.clone(),
            label,
            direction,
            hex,
        });
        Ok(())
    }
}
