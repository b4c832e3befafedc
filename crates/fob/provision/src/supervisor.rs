//! Session and reader lifecycle supervisor
//!
//! The supervisor is the single consumer of the reader event stream and the
//! only owner of [`SessionState`]. Operator requests reach it as [`Control`]
//! messages on a second channel, so every state change happens on one thread.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, never, select, unbounded};
use fob_apdu_core::event::ReaderEventReceiver;
use fob_apdu_core::{CardConnector, ReaderEvent};
use tracing::{debug, info, instrument, warn};

use crate::machine::Provisioner;
use crate::notice::{Notice, Notifier};
use crate::upload::UploadDispatch;
use crate::{Error, Result};

/// Workflow that owns the reader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Workflow {
    /// No workflow; taps are only reported
    #[default]
    Idle,
    /// Taps provision a new secret
    Initializing,
    /// Taps check the stored secret
    Verifying,
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Initializing => f.write_str("Init"),
            Self::Verifying => f.write_str("Verify"),
        }
    }
}

/// What the supervisor knows about the reader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Attached reader, if any
    pub reader: Option<String>,
    /// Serial of the seated card, if any; empty for a card whose ATR carries
    /// no serial
    pub card: Option<String>,
    /// Workflow owning the reader
    pub workflow: Workflow,
}

impl SessionState {
    /// Whether a workflow other than `Idle` is running
    pub const fn is_active(&self) -> bool {
        !matches!(self.workflow, Workflow::Idle)
    }
}

/// Operator requests for the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Start a workflow
    Start(Workflow),
    /// Return to idle
    Stop,
    /// Leave the run loop
    Shutdown,
}

/// Sender for operator requests
pub type ControlSender = Sender<Control>;

/// Create the control channel
pub fn control_channel() -> (ControlSender, Receiver<Control>) {
    unbounded()
}

/// Owns the reader session and runs workflows on card taps
pub struct Supervisor<C: CardConnector> {
    connector: C,
    provisioner: Provisioner,
    dispatch: Arc<dyn UploadDispatch>,
    notifier: Notifier,
    state: SessionState,
}

impl<C: CardConnector> fmt::Debug for Supervisor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<C: CardConnector> Supervisor<C> {
    /// Create a supervisor with no reader attached
    pub fn new(
        connector: C,
        provisioner: Provisioner,
        dispatch: Arc<dyn UploadDispatch>,
        notifier: Notifier,
    ) -> Self {
        Self {
            connector,
            provisioner,
            dispatch,
            notifier,
            state: SessionState::default(),
        }
    }

    /// Current session state
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Hand the reader to `workflow`
    ///
    /// A rejected start changes nothing.
    pub fn start(&mut self, workflow: Workflow) -> Result<()> {
        if self.state.is_active() {
            return Err(Error::WorkflowActive(self.state.workflow));
        }
        if self.state.reader.is_none() {
            return Err(Error::ReaderAbsent);
        }
        if self.state.card.is_some() {
            return Err(Error::CardAlreadyPresent);
        }
        if workflow == Workflow::Idle {
            return Ok(());
        }

        info!(%workflow, "Workflow started");
        self.state.workflow = workflow;
        self.publish_workflow(false);
        Ok(())
    }

    /// Return to idle; a card transaction already running completes
    pub fn stop(&mut self) {
        if self.state.is_active() {
            info!(workflow = %self.state.workflow, "Workflow stopped");
        }
        self.state.workflow = Workflow::Idle;
        self.publish_workflow(false);
    }

    fn publish_workflow(&self, busy: bool) {
        self.notifier.notify(Notice::Workflow {
            workflow: self.state.workflow,
            busy,
        });
    }

    /// Apply one reader event
    ///
    /// Only one reader is driven at a time; while one is held, events of any
    /// other reader are dropped and a second attach is reported.
    pub fn handle_event(&mut self, event: ReaderEvent) {
        if let Some(held) = self.state.reader.as_deref() {
            if held != event.reader() {
                if let ReaderEvent::Attached(reader) = &event {
                    warn!(%reader, %held, "Ignoring second reader");
                    self.notifier
                        .failure(format!("Reader {reader} ignored, already using {held}"));
                } else {
                    debug!(reader = %event.reader(), "Ignoring event of another reader");
                }
                return;
            }
        }

        match event {
            ReaderEvent::Attached(reader) => {
                info!(%reader, "Reader attached");
                self.state.reader = Some(reader.clone());
                self.notifier.notify(Notice::ReaderAttached(reader));
            }
            ReaderEvent::Detached(reader) => {
                if self.state.reader.as_deref() != Some(reader.as_str()) {
                    debug!(%reader, "Ignoring detach of an unknown reader");
                    return;
                }
                info!(%reader, "Reader detached");
                let interrupted = self.state.workflow;
                self.state = SessionState::default();
                if interrupted != Workflow::Idle {
                    warn!(workflow = %interrupted, "Workflow interrupted by reader removal");
                    self.notifier.notify(Notice::Interrupted(interrupted));
                    self.publish_workflow(false);
                }
                self.notifier.notify(Notice::ReaderDetached(reader));
            }
            ReaderEvent::CardPresent { reader, serial } => {
                if self.state.card.as_deref() == Some(serial.as_str()) {
                    debug!(%serial, "Card already seated");
                    return;
                }
                if self.state.reader.is_none() {
                    self.state.reader = Some(reader.clone());
                }
                self.state.card = Some(serial.clone());
                if serial.is_empty() {
                    warn!(%reader, "Seated card has no readable serial");
                    self.notifier
                        .failure("Card not recognized: its ATR carries no serial");
                    return;
                }
                self.notifier.notify(Notice::Card(Some(serial.clone())));
                self.run_workflow(&reader, &serial);
            }
            ReaderEvent::CardAbsent { .. } => {
                self.state.card = None;
                self.notifier.notify(Notice::Card(None));
                if self.state.workflow == Workflow::Verifying {
                    self.notifier.notify(Notice::SelectionCleared);
                }
            }
            ReaderEvent::Error { reader, message } => {
                warn!(%reader, %message, "Reader error");
                self.notifier.failure(message);
            }
        }
    }

    #[instrument(skip(self))]
    fn run_workflow(&mut self, reader: &str, serial: &str) {
        let workflow = self.state.workflow;
        if workflow == Workflow::Idle {
            return;
        }

        self.publish_workflow(true);
        let result = match workflow {
            Workflow::Initializing => self.initialize(reader, serial),
            Workflow::Verifying => self.verify(reader, serial),
            Workflow::Idle => Ok(()),
        };
        self.publish_workflow(false);

        if let Err(e) = result {
            warn!(error = %e, "Workflow failed");
            self.notifier.failure(e.to_string());
        }
    }

    fn initialize(&self, reader: &str, serial: &str) -> Result<()> {
        let mut transport = self.connector.connect(reader)?;
        let provisioned = self.provisioner.init(&mut transport, serial)?;
        self.dispatch.dispatch(provisioned.fob);
        Ok(())
    }

    fn verify(&self, reader: &str, serial: &str) -> Result<()> {
        let mut transport = self.connector.connect(reader)?;
        let report = self.provisioner.verify(&mut transport, serial)?;
        if report.status.is_success() && report.fob.awaits_upload() {
            self.dispatch.offer(report.fob);
        }
        Ok(())
    }

    /// Apply an operator request; rejections are reported as failures
    pub fn handle_control(&mut self, control: Control) {
        match control {
            Control::Start(workflow) => {
                if let Err(e) = self.start(workflow) {
                    debug!(error = %e, "Start rejected");
                    self.notifier.failure(e.to_string());
                }
            }
            Control::Stop => self.stop(),
            Control::Shutdown => {}
        }
    }

    /// Consume reader events and operator requests until shutdown or until
    /// both channels are closed
    pub fn run(mut self, mut events: ReaderEventReceiver, mut control: Receiver<Control>) {
        info!("Supervisor running");
        let (mut events_open, mut control_open) = (true, true);

        while events_open || control_open {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => {
                        debug!("Reader event stream closed");
                        events = never();
                        events_open = false;
                    }
                },
                recv(control) -> request => match request {
                    Ok(Control::Shutdown) => break,
                    Ok(request) => self.handle_control(request),
                    Err(_) => {
                        control = never();
                        control_open = false;
                    }
                },
            }
        }
        info!("Supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fob::Fob;
    use crate::machine::ProvisionerConfig;
    use crate::store::MemoryStore;
    use fob_apdu_core::transport::{MockCard, MockConnector};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct RecordingDispatch {
        dispatched: Mutex<Vec<Fob>>,
        offered: Mutex<Vec<Fob>>,
    }

    impl UploadDispatch for RecordingDispatch {
        fn dispatch(&self, fob: Fob) {
            self.dispatched.lock().push(fob);
        }

        fn offer(&self, fob: Fob) {
            self.offered.lock().push(fob);
        }
    }

    fn supervisor(card: &MockCard) -> (Supervisor<MockConnector>, crate::notice::NoticeReceiver) {
        let store = Arc::new(MemoryStore::new());
        let (notifier, receiver) = Notifier::channel();
        let provisioner = Provisioner::new(
            store,
            notifier.clone(),
            ProvisionerConfig::default().with_settle_delay(Duration::ZERO),
        );
        let supervisor = Supervisor::new(
            MockConnector::new(card.clone()),
            provisioner,
            Arc::new(RecordingDispatch::default()),
            notifier,
        );
        (supervisor, receiver)
    }

    fn attached(card: &MockCard) -> (Supervisor<MockConnector>, crate::notice::NoticeReceiver) {
        let (mut supervisor, receiver) = supervisor(card);
        supervisor.handle_event(ReaderEvent::Attached("ACR122U".into()));
        (supervisor, receiver)
    }

    #[test]
    fn test_workflow_display() {
        assert_eq!(Workflow::Idle.to_string(), "Idle");
        assert_eq!(Workflow::Initializing.to_string(), "Init");
        assert_eq!(Workflow::Verifying.to_string(), "Verify");
    }

    #[test]
    fn test_start_requires_reader() {
        let (mut supervisor, _receiver) = supervisor(&MockCard::new());
        assert!(matches!(
            supervisor.start(Workflow::Initializing),
            Err(Error::ReaderAbsent)
        ));
        assert_eq!(supervisor.state(), &SessionState::default());
    }

    #[test]
    fn test_start_rejects_seated_card() {
        let (mut supervisor, _receiver) = attached(&MockCard::new());
        supervisor.handle_event(ReaderEvent::CardPresent {
            reader: "ACR122U".into(),
            serial: "0a1b2c3d".into(),
        });
        assert!(matches!(
            supervisor.start(Workflow::Verifying),
            Err(Error::CardAlreadyPresent)
        ));
        assert_eq!(supervisor.state().workflow, Workflow::Idle);
    }

    #[test]
    fn test_workflows_are_exclusive() {
        let (mut supervisor, receiver) = attached(&MockCard::new());
        supervisor.start(Workflow::Verifying).unwrap();
        let before = supervisor.state().clone();
        let _: Vec<_> = receiver.try_iter().collect();

        let err = supervisor.start(Workflow::Initializing).unwrap_err();
        assert_eq!(err.to_string(), "Verify is already running");
        assert_eq!(supervisor.state(), &before);
        assert!(receiver.try_iter().next().is_none());

        supervisor.stop();
        supervisor.start(Workflow::Initializing).unwrap();
        assert_eq!(supervisor.state().workflow, Workflow::Initializing);
    }

    #[test]
    fn test_idle_tap_is_only_reported() {
        let card = MockCard::new();
        let (mut supervisor, receiver) = attached(&card);
        let _: Vec<_> = receiver.try_iter().collect();

        supervisor.handle_event(ReaderEvent::CardPresent {
            reader: "ACR122U".into(),
            serial: "0a1b2c3d".into(),
        });
        assert!(card.commands().is_empty());
        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            [Notice::Card(Some("0a1b2c3d".into()))]
        );
    }

    #[test]
    fn test_duplicate_card_present_is_ignored() {
        let card = MockCard::new();
        let (mut supervisor, receiver) = attached(&card);
        supervisor.start(Workflow::Verifying).unwrap();
        let _: Vec<_> = receiver.try_iter().collect();

        let tap = ReaderEvent::CardPresent {
            reader: "ACR122U".into(),
            serial: "0a1b2c3d".into(),
        };
        supervisor.handle_event(tap.clone());
        supervisor.handle_event(tap);

        let failures: Vec<_> = receiver
            .try_iter()
            .filter(|n| matches!(n, Notice::Failure(_)))
            .collect();
        assert_eq!(
            failures,
            [Notice::Failure("The fob hasn't been initialized".into())]
        );
        assert!(card.commands().is_empty());
    }

    #[test]
    fn test_card_absent_clears_verify_selection() {
        let (mut supervisor, receiver) = attached(&MockCard::new());
        supervisor.start(Workflow::Verifying).unwrap();
        supervisor.handle_event(ReaderEvent::CardPresent {
            reader: "ACR122U".into(),
            serial: "0a1b2c3d".into(),
        });
        let _: Vec<_> = receiver.try_iter().collect();

        supervisor.handle_event(ReaderEvent::CardAbsent {
            reader: "ACR122U".into(),
        });
        assert_eq!(supervisor.state().card, None);
        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            [Notice::Card(None), Notice::SelectionCleared]
        );
    }

    #[test]
    fn test_detach_interrupts_workflow() {
        let (mut supervisor, receiver) = attached(&MockCard::new());
        supervisor.start(Workflow::Initializing).unwrap();
        let _: Vec<_> = receiver.try_iter().collect();

        supervisor.handle_event(ReaderEvent::Detached("ACR122U".into()));
        assert_eq!(supervisor.state(), &SessionState::default());
        let notices: Vec<_> = receiver.try_iter().collect();
        assert!(notices.contains(&Notice::Interrupted(Workflow::Initializing)));
        assert!(notices.contains(&Notice::ReaderDetached("ACR122U".into())));
    }

    #[test]
    fn test_second_reader_is_ignored() {
        let (mut supervisor, receiver) = attached(&MockCard::new());
        supervisor.start(Workflow::Initializing).unwrap();
        let before = supervisor.state().clone();
        let _: Vec<_> = receiver.try_iter().collect();

        supervisor.handle_event(ReaderEvent::Attached("OMNIKEY 5022".into()));
        supervisor.handle_event(ReaderEvent::CardPresent {
            reader: "OMNIKEY 5022".into(),
            serial: "0a1b2c3d".into(),
        });
        supervisor.handle_event(ReaderEvent::Detached("OMNIKEY 5022".into()));

        assert_eq!(supervisor.state(), &before);
        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            [Notice::Failure(
                "Reader OMNIKEY 5022 ignored, already using ACR122U".into()
            )]
        );
    }

    #[test]
    fn test_card_without_serial_blocks_start() {
        let card = MockCard::new();
        let (mut supervisor, receiver) = attached(&card);
        let _: Vec<_> = receiver.try_iter().collect();

        supervisor.handle_event(ReaderEvent::CardPresent {
            reader: "ACR122U".into(),
            serial: String::new(),
        });
        assert_eq!(supervisor.state().card.as_deref(), Some(""));
        assert!(matches!(
            supervisor.start(Workflow::Initializing),
            Err(Error::CardAlreadyPresent)
        ));
        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            [Notice::Failure(
                "Card not recognized: its ATR carries no serial".into()
            )]
        );

        supervisor.handle_event(ReaderEvent::CardAbsent {
            reader: "ACR122U".into(),
        });
        supervisor.start(Workflow::Initializing).unwrap();
        assert!(card.commands().is_empty());
    }

    #[test]
    fn test_reader_error_keeps_state() {
        let (mut supervisor, receiver) = attached(&MockCard::new());
        supervisor.start(Workflow::Verifying).unwrap();
        let before = supervisor.state().clone();
        let _: Vec<_> = receiver.try_iter().collect();

        supervisor.handle_event(ReaderEvent::Error {
            reader: "ACR122U".into(),
            message: "PC/SC error: Communication error".into(),
        });
        assert_eq!(supervisor.state(), &before);
        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            [Notice::Failure("PC/SC error: Communication error".into())]
        );
    }

    #[test]
    fn test_run_until_shutdown() {
        let (supervisor, receiver) = supervisor(&MockCard::new());
        let (event_tx, event_rx) = fob_apdu_core::event::reader_event_channel();
        let (control_tx, control_rx) = control_channel();

        event_tx.send(ReaderEvent::Attached("ACR122U".into())).unwrap();
        drop(event_tx);
        let handle = std::thread::spawn(move || supervisor.run(event_rx, control_rx));

        let first = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, Notice::ReaderAttached("ACR122U".into()));
        control_tx.send(Control::Shutdown).unwrap();
        handle.join().unwrap();
    }
}
