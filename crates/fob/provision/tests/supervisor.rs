//! Supervisor driving the workflows from reader events

mod common;

use std::sync::Arc;

use common::*;
use fob_apdu_core::ReaderEvent;
use fob_apdu_core::transport::{MockCard, MockConnector};
use fob_provision::{
    Fob, FobStore, MemoryStore, Notice, NoticeReceiver, Supervisor, UploadDispatch, Workflow,
};
use parking_lot::Mutex;

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

fn supervisor(
    card: &MockCard,
    store: Arc<MemoryStore>,
) -> (Supervisor<MockConnector>, Arc<RecordingDispatch>, NoticeReceiver) {
    let (provisioner, notices) = provisioner(store);
    let dispatch = Arc::new(RecordingDispatch::default());
    let mut supervisor = Supervisor::new(
        MockConnector::new(card.clone()),
        provisioner.clone(),
        dispatch.clone(),
        provisioner.notifier().clone(),
    );
    supervisor.handle_event(ReaderEvent::Attached(READER.into()));
    (supervisor, dispatch, notices)
}

fn tap(serial: &str) -> ReaderEvent {
    ReaderEvent::CardPresent {
        reader: READER.into(),
        serial: serial.into(),
    }
}

fn lift() -> ReaderEvent {
    ReaderEvent::CardAbsent {
        reader: READER.into(),
    }
}

#[test]
fn test_init_tap_provisions_and_dispatches_once() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "6A88");
    card.reply("9000").reply("9000");

    let store = Arc::new(MemoryStore::new());
    let (mut supervisor, dispatch, notices) = supervisor(&card, store.clone());
    supervisor.start(Workflow::Initializing).unwrap();

    supervisor.handle_event(tap(SERIAL));
    supervisor.handle_event(tap(SERIAL));

    let dispatched = dispatch.dispatched.lock().clone();
    assert_eq!(dispatched.len(), 1);
    assert!(dispatched[0].initialized);
    assert_eq!(dispatched[0].secret.as_deref(), Some(SECRET));
    assert_eq!(card.commands().len(), 5);

    let notices: Vec<_> = notices.try_iter().collect();
    assert!(!notices.iter().any(|n| matches!(n, Notice::Failure(_))));
    assert!(notices.contains(&Notice::Workflow {
        workflow: Workflow::Initializing,
        busy: true,
    }));

    // A second tap of the same fob after lifting it is refused by the store
    supervisor.handle_event(lift());
    supervisor.handle_event(tap(SERIAL));
    assert_eq!(dispatch.dispatched.lock().len(), 1);
    assert_eq!(store.find_all().unwrap().len(), 1);
}

#[test]
fn test_failed_init_keeps_reader_usable() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "63C0");

    let store = Arc::new(MemoryStore::new());
    let (mut supervisor, dispatch, notices) = supervisor(&card, store);
    supervisor.start(Workflow::Initializing).unwrap();
    supervisor.handle_event(tap(SERIAL));

    let failures: Vec<_> = notices
        .try_iter()
        .filter(|n| matches!(n, Notice::Failure(_)))
        .collect();
    assert_eq!(
        failures,
        [Notice::Failure(
            "External authentication error: res = 63c0".into()
        )]
    );
    assert!(dispatch.dispatched.lock().is_empty());
    assert_eq!(supervisor.state().workflow, Workflow::Initializing);
    assert_eq!(supervisor.state().card.as_deref(), Some(SERIAL));
}

#[test]
fn test_verify_offers_upload_for_pending_fob() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "9000");

    let store = Arc::new(MemoryStore::new());
    initialized(&store, SERIAL);
    let (mut supervisor, dispatch, notices) = supervisor(&card, store);
    supervisor.start(Workflow::Verifying).unwrap();
    supervisor.handle_event(tap(SERIAL));

    assert_eq!(dispatch.offered.lock().len(), 1);
    assert!(dispatch.dispatched.lock().is_empty());
    assert!(
        notices
            .try_iter()
            .any(|n| matches!(n, Notice::VerifyResult(report) if report.status.is_success()))
    );
    assert!(
        card.commands_hex()
            .iter()
            .all(|c| !c.starts_with("80"))
    );
}

#[test]
fn test_start_is_exclusive_across_workflows() {
    let store = Arc::new(MemoryStore::new());
    let (mut supervisor, _dispatch, _notices) = supervisor(&MockCard::new(), store);

    supervisor.start(Workflow::Initializing).unwrap();
    let before = supervisor.state().clone();
    assert!(supervisor.start(Workflow::Verifying).is_err());
    assert_eq!(supervisor.state(), &before);

    supervisor.stop();
    supervisor.start(Workflow::Verifying).unwrap();
    assert!(supervisor.start(Workflow::Initializing).is_err());
    assert_eq!(supervisor.state().workflow, Workflow::Verifying);
}

#[test]
fn test_tap_after_stop_is_only_reported() {
    let card = MockCard::new();
    let store = Arc::new(MemoryStore::new());
    let (mut supervisor, dispatch, notices) = supervisor(&card, store.clone());

    supervisor.start(Workflow::Initializing).unwrap();
    supervisor.stop();
    let _: Vec<_> = notices.try_iter().collect();

    supervisor.handle_event(tap(SERIAL));

    assert!(card.commands().is_empty());
    assert!(dispatch.dispatched.lock().is_empty());
    assert!(store.find_all().unwrap().is_empty());
    assert_eq!(
        notices.try_iter().collect::<Vec<_>>(),
        [Notice::Card(Some(SERIAL.into()))]
    );
    assert_eq!(supervisor.state().card.as_deref(), Some(SERIAL));
}
