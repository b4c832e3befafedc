//! Monitor thread turning PC/SC state changes into [`ReaderEvent`]s

use std::collections::HashMap;
use std::ffi::CString;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fob_apdu_core::event::{
    ReaderEvent, ReaderEventReceiver, ReaderEventSender, reader_event_channel,
};
use parking_lot::Mutex;
use pcsc::{Context, ReaderState, Scope, State};
use tracing::{debug, info, warn};

use crate::error::PcscError;
use crate::reader::card_present;
use crate::util::{is_service_lost, serial_from_atr};

/// Monitor for PC/SC reader and card events
///
/// Runs one background thread that blocks on status changes and publishes
/// every attach, detach, insertion and removal on a single channel. The
/// channel closes when the monitor stops. When the PC/SC service goes away
/// (Windows stops it with the last reader) the thread establishes a new
/// context, so readers plugged in later are still seen.
pub struct ReaderMonitor {
    /// PC/SC context of the monitor thread, replaced when the service restarts
    context: Arc<Mutex<Context>>,
    /// Upper bound on a single status wait
    poll_interval: Duration,
    /// Whether the monitor is running
    running: Arc<AtomicBool>,
    /// Monitor thread, while running
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ReaderMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderMonitor")
            .field("poll_interval", &self.poll_interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ReaderMonitor {
    pub(crate) fn new(context: Context, poll_interval: Duration) -> Self {
        Self {
            context: Arc::new(Mutex::new(context)),
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Whether the monitor thread is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start monitoring and return the event stream
    pub fn start(&self) -> Result<ReaderEventReceiver, PcscError> {
        let (sender, receiver) = reader_event_channel();
        self.start_with_sender(sender)?;
        Ok(receiver)
    }

    /// Start monitoring, publishing on an existing channel
    pub fn start_with_sender(&self, sender: ReaderEventSender) -> Result<(), PcscError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(PcscError::Other("Monitor already running".to_string()));
        }

        let context = Arc::clone(&self.context);
        let running = Arc::clone(&self.running);
        let poll_interval = self.poll_interval;

        let handle = thread::Builder::new()
            .name("pcsc-monitor".to_string())
            .spawn(move || {
                monitor_loop(&context, poll_interval, &running, &sender);
                running.store(false, Ordering::Release);
                debug!("Reader monitor stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                PcscError::Other(format!("Failed to spawn monitor thread: {e}"))
            })?;

        *self.handle.lock() = Some(handle);
        info!("Reader monitor started");
        Ok(())
    }

    /// Stop monitoring and wait for the thread to exit
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        // Wake the thread if it is blocked in a status wait
        let _ = self.context.lock().cancel();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReaderMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_pnp(state: &ReaderState) -> bool {
    state.name() == pcsc::PNP_NOTIFICATION()
}

/// Replace the shared context after the service went away
fn reestablish(context: &Mutex<Context>) -> bool {
    match Context::establish(Scope::User) {
        Ok(fresh) => {
            *context.lock() = fresh;
            info!("PC/SC context re-established");
            true
        }
        Err(e) => {
            debug!(error = %e, "PC/SC service still unavailable");
            false
        }
    }
}

fn pnp_states() -> Vec<ReaderState> {
    vec![ReaderState::new(pcsc::PNP_NOTIFICATION(), State::UNAWARE)]
}

fn monitor_loop(
    shared: &Mutex<Context>,
    poll_interval: Duration,
    running: &AtomicBool,
    sender: &ReaderEventSender,
) {
    let mut tracker = StateTracker::default();
    let mut reader_states = pnp_states();

    while running.load(Ordering::Acquire) {
        let context = shared.lock().clone();
        let names: Vec<CString> = match context.list_readers_owned() {
            Ok(names) => names,
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) if is_service_lost(&e) => {
                warn!(error = %e, "PC/SC service lost");
                // Readers are gone with the service
                for event in tracker.observe_readers(&[]) {
                    if sender.send(event).is_err() {
                        return;
                    }
                }
                if reestablish(shared) {
                    reader_states = pnp_states();
                } else {
                    thread::sleep(poll_interval);
                }
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Failed to list readers");
                thread::sleep(poll_interval);
                continue;
            }
        };

        let name_strings: Vec<String> = names
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        for event in tracker.observe_readers(&name_strings) {
            if sender.send(event).is_err() {
                return;
            }
        }

        reader_states
            .retain(|rs| is_pnp(rs) || names.iter().any(|name| name.as_c_str() == rs.name()));
        for name in names {
            if !reader_states.iter().any(|rs| rs.name() == name.as_c_str()) {
                reader_states.push(ReaderState::new(name, State::UNAWARE));
            }
        }

        match context.get_status_change(Some(poll_interval), &mut reader_states) {
            Ok(()) => {}
            Err(pcsc::Error::Timeout | pcsc::Error::UnknownReader) => continue,
            Err(pcsc::Error::Cancelled) => break,
            Err(e) if is_service_lost(&e) => {
                warn!(error = %e, "PC/SC service lost during status wait");
                if reestablish(shared) {
                    reader_states = pnp_states();
                } else {
                    thread::sleep(poll_interval);
                }
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Status wait failed");
                for reader in tracker.readers() {
                    let event = ReaderEvent::Error {
                        reader,
                        message: e.to_string(),
                    };
                    if sender.send(event).is_err() {
                        return;
                    }
                }
                thread::sleep(poll_interval);
                continue;
            }
        }

        for rs in &mut reader_states {
            if !is_pnp(rs) {
                let name = rs.name().to_string_lossy().into_owned();
                let present = card_present(rs.event_state());
                if let Some(event) = tracker.observe_card(&name, present, rs.atr()) {
                    if sender.send(event).is_err() {
                        return;
                    }
                }
            }
            rs.sync_current_state();
        }
    }
}

/// Last known state per reader, used to drop duplicate notifications
#[derive(Debug, Default)]
struct StateTracker {
    /// ATR of the seated card per reader, `None` when the reader is empty
    readers: HashMap<String, Option<Vec<u8>>>,
}

impl StateTracker {
    fn readers(&self) -> Vec<String> {
        self.readers.keys().cloned().collect()
    }

    /// Diff the current reader list against the known one
    fn observe_readers(&mut self, current: &[String]) -> Vec<ReaderEvent> {
        let mut events = Vec::new();

        let gone: Vec<String> = self
            .readers
            .keys()
            .filter(|name| !current.contains(name))
            .cloned()
            .collect();
        for name in gone {
            if let Some(Some(_)) = self.readers.remove(&name) {
                events.push(ReaderEvent::CardAbsent {
                    reader: name.clone(),
                });
            }
            info!(reader = %name, "Reader detached");
            events.push(ReaderEvent::Detached(name));
        }

        for name in current {
            if !self.readers.contains_key(name) {
                info!(reader = %name, "Reader attached");
                self.readers.insert(name.clone(), None);
                events.push(ReaderEvent::Attached(name.clone()));
            }
        }

        events
    }

    /// Record the card state of one reader, returning an event on change
    fn observe_card(&mut self, reader: &str, present: bool, atr: &[u8]) -> Option<ReaderEvent> {
        let seated = self.readers.entry(reader.to_string()).or_default();

        if !present {
            return seated.take().map(|_| ReaderEvent::CardAbsent {
                reader: reader.to_string(),
            });
        }

        if seated.as_deref() == Some(atr) {
            return None;
        }
        *seated = Some(atr.to_vec());

        let serial = serial_from_atr(atr).unwrap_or_else(|| {
            warn!(%reader, atr = %hex::encode(atr), "No serial in ATR");
            String::new()
        });
        Some(ReaderEvent::CardPresent {
            reader: reader.to_string(),
            serial,
        })
    }
}
