//! Init and verify against a scripted card

mod common;

use std::sync::Arc;

use common::*;
use fob_apdu_core::transport::{MockCard, MockTransport};
use fob_apdu_core::{StatusWord, TransportError};
use fob_provision::commands::Step;
use fob_provision::{Error, FobPatch, FobStore, JsonFileStore, KeyingPath, MemoryStore, Notice};

#[test]
fn test_fresh_card_is_bootstrapped() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "6A88");
    card.reply("9000").reply("9000");

    let store = Arc::new(MemoryStore::new());
    let (provisioner, _notices) = provisioner(store.clone());
    let provisioned = provisioner
        .init(&mut MockTransport::new(card.clone()), SERIAL)
        .unwrap();

    assert_eq!(provisioned.path, KeyingPath::Bootstrapped);
    assert_eq!(
        card.commands_hex(),
        [
            SELECT_MF.to_string(),
            GET_CHALLENGE.to_string(),
            default_authenticate("11223344"),
            CREATE_FILE.to_string(),
            ADD_SECRET.to_string(),
        ]
    );

    let fob = store.find_by_serial(SERIAL).unwrap().unwrap();
    assert!(fob.initialized);
    assert!(!fob.uploaded);
    assert_eq!(fob.secret.as_deref(), Some(SECRET));
    assert_eq!(fob.pending_secret, None);
    assert_eq!(fob.last_operation, "Add secret - 9000");
    assert_eq!(provisioned.fob, fob);
}

#[test]
fn test_existing_key_file_is_tolerated() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "6A88");
    card.reply("6A86").reply("9000");

    let store = Arc::new(MemoryStore::new());
    let (provisioner, _notices) = provisioner(store.clone());
    let provisioned = provisioner
        .init(&mut MockTransport::new(card.clone()), SERIAL)
        .unwrap();

    assert_eq!(provisioned.path, KeyingPath::Bootstrapped);
    assert!(provisioned.fob.initialized);
}

#[test]
fn test_accepted_default_key_rekeys() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "A1B2C3D4", "9000");
    card.reply("9000").reply("9000").reply("9000");

    let store = Arc::new(MemoryStore::new());
    let (provisioner, _notices) = provisioner(store.clone());
    let provisioned = provisioner
        .init(&mut MockTransport::new(card.clone()), SERIAL)
        .unwrap();

    assert_eq!(provisioned.path, KeyingPath::ReKeyed);
    let commands = card.commands_hex();
    assert_eq!(commands.len(), 6);
    assert_eq!(commands[3], CLEAN_DATA);
    assert_eq!(commands[4], CREATE_FILE);
    assert_eq!(commands[5], ADD_SECRET);
}

#[test]
fn test_rekey_create_file_must_succeed() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "A1B2C3D4", "9000");
    card.reply("9000").reply("6A86");

    let store = Arc::new(MemoryStore::new());
    let (provisioner, _notices) = provisioner(store.clone());
    let err = provisioner
        .init(&mut MockTransport::new(card.clone()), SERIAL)
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Card { step: Step::CreateFile, status } if status == StatusWord::new(0x6A, 0x86)
    ));
    assert_eq!(err.to_string(), "Create file error: res = 6a86");
    assert!(!card.commands_hex().contains(&ADD_SECRET.to_string()));
}

#[test]
fn test_wrong_key_is_rejected_without_mutation() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "63C2");

    let store = Arc::new(MemoryStore::new());
    let (provisioner, notices) = provisioner(store.clone());
    let err = provisioner
        .init(&mut MockTransport::new(card.clone()), SERIAL)
        .unwrap_err();

    assert!(matches!(err, Error::AuthRejected(status) if status.remaining_tries() == Some(2)));
    assert_eq!(card.commands().len(), 3);

    let fob = store.find_by_serial(SERIAL).unwrap().unwrap();
    assert!(!fob.initialized);
    assert_eq!(fob.secret, None);
    assert_eq!(fob.last_operation, "External Authentication - 63c2");

    let traced = notices
        .try_iter()
        .filter(|n| matches!(n, Notice::Trace { .. }))
        .count();
    assert_eq!(traced, 6);
}

#[test]
fn test_unexpected_auth_status_is_fatal() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "6982");

    let store = Arc::new(MemoryStore::new());
    let (provisioner, _notices) = provisioner(store);
    let err = provisioner
        .init(&mut MockTransport::new(card.clone()), SERIAL)
        .unwrap_err();

    assert_eq!(err.to_string(), "External Authentication error: res = 6982");
    assert_eq!(card.commands().len(), 3);
}

#[test]
fn test_stale_challenge_is_retried_once() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "6984");
    script_auth(&card, "55667788", "6A88");
    card.reply("9000").reply("9000");

    let store = Arc::new(MemoryStore::new());
    let (provisioner, _notices) = provisioner(store);
    let provisioned = provisioner
        .init(&mut MockTransport::new(card.clone()), SERIAL)
        .unwrap();

    assert_eq!(provisioned.path, KeyingPath::Bootstrapped);
    let commands = card.commands_hex();
    assert_eq!(
        commands.iter().filter(|c| *c == GET_CHALLENGE).count(),
        2
    );
    assert_eq!(commands[2], default_authenticate("11223344"));
    assert_eq!(commands[4], default_authenticate("55667788"));
}

#[test]
fn test_stale_challenge_budget() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "6984");
    script_auth(&card, "55667788", "6984");

    let store = Arc::new(MemoryStore::new());
    let (provisioner, _notices) = provisioner(store);
    let err = provisioner
        .init(&mut MockTransport::new(card.clone()), SERIAL)
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Card { step: Step::ExternalAuthentication, status } if status == StatusWord::new(0x69, 0x84)
    ));
    assert_eq!(card.commands().len(), 5);
    assert_eq!(card.pending_replies(), 0);
}

#[test]
fn test_unanswered_write_keeps_pending_secret() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "6A88");
    card.reply("9000").fail(TransportError::Timeout);

    let store = Arc::new(MemoryStore::new());
    let (provisioner, _notices) = provisioner(store.clone());
    let err = provisioner
        .init(&mut MockTransport::new(card.clone()), SERIAL)
        .unwrap_err();
    assert!(err.is_outcome_unknown());

    let fob = store.find_by_serial(SERIAL).unwrap().unwrap();
    assert!(!fob.initialized);
    assert_eq!(fob.secret, None);
    assert_eq!(fob.pending_secret.as_deref(), Some(SECRET));
    assert_eq!(fob.last_operation, "Add secret...");

    // The write did land: the card now answers to the pending key
    let retry = MockCard::new();
    retry.reply("9000");
    script_auth(&retry, "99887766", "9000");
    retry.reply("9000").reply("9000").reply("9000");

    let provisioned = provisioner
        .init(&mut MockTransport::new(retry.clone()), SERIAL)
        .unwrap();
    assert_eq!(provisioned.path, KeyingPath::ReKeyed);
    assert_eq!(
        retry.commands_hex()[2],
        external_authenticate(SECRET, "99887766")
    );
    assert_eq!(provisioned.fob.secret.as_deref(), Some(SECRET));
    assert_eq!(provisioned.fob.pending_secret, None);
}

#[test]
fn test_rejected_pending_key_falls_back_to_default() {
    let store = Arc::new(MemoryStore::new());
    let fob = store.find_or_create(SERIAL).unwrap();
    store.update(fob.id, FobPatch::pending(SECRET)).unwrap();

    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "63C1");
    script_auth(&card, "55667788", "6A88");
    card.reply("9000").reply("9000");

    let (provisioner, _notices) = provisioner(store.clone());
    let provisioned = provisioner
        .init(&mut MockTransport::new(card.clone()), SERIAL)
        .unwrap();

    let commands = card.commands_hex();
    assert_eq!(commands[2], external_authenticate(SECRET, "11223344"));
    assert_eq!(commands[4], default_authenticate("55667788"));
    assert_eq!(provisioned.path, KeyingPath::Bootstrapped);
    assert!(provisioned.fob.initialized);
}

#[test]
fn test_refused_write_clears_pending_secret() {
    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "6A88");
    card.reply("9000").reply("6A82");

    let store = Arc::new(MemoryStore::new());
    let (provisioner, _notices) = provisioner(store.clone());
    let err = provisioner
        .init(&mut MockTransport::new(card), SERIAL)
        .unwrap_err();

    assert_eq!(err.to_string(), "Add secret error: res = 6a82");
    let fob = store.find_by_serial(SERIAL).unwrap().unwrap();
    assert_eq!(fob.pending_secret, None);
    assert!(!fob.initialized);
}

#[test]
fn test_init_is_refused_for_provisioned_fobs() {
    let store = Arc::new(MemoryStore::new());
    initialized(&store, SERIAL);
    let uploaded = initialized(&store, "11223344");
    store.update(uploaded.id, FobPatch::uploaded()).unwrap();

    let card = MockCard::new();
    let (provisioner, _notices) = provisioner(store.clone());
    let mut transport = MockTransport::new(card.clone());

    assert!(matches!(
        provisioner.init(&mut transport, SERIAL),
        Err(Error::AlreadyInitialized)
    ));
    assert!(matches!(
        provisioner.init(&mut transport, "11223344"),
        Err(Error::AlreadyUploaded)
    ));
    assert!(card.commands().is_empty());
    assert_eq!(store.find_all().unwrap().len(), 2);
}

#[test]
fn test_verify_matching_secret() {
    let store = Arc::new(MemoryStore::new());
    initialized(&store, "00000001");
    let fob = initialized(&store, SERIAL);
    store.find_or_create("00000003").unwrap();

    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "9000");

    let (provisioner, notices) = provisioner(store.clone());
    let report = provisioner
        .verify(&mut MockTransport::new(card.clone()), SERIAL)
        .unwrap();

    assert!(report.status.is_success());
    assert_eq!(report.fob.id, fob.id);
    assert_eq!(report.ordinal, 1);
    assert_eq!(report.total, 3);
    assert_eq!(
        card.commands_hex(),
        [
            SELECT_MF.to_string(),
            GET_CHALLENGE.to_string(),
            external_authenticate(SECRET, "11223344"),
        ]
    );
    assert!(notices.try_iter().any(|n| n == Notice::VerifyResult(report.clone())));

    let after = store.find_by_serial(SERIAL).unwrap().unwrap();
    assert_eq!(after.secret, fob.secret);
    assert!(after.initialized);
}

#[test]
fn test_verify_reports_mismatch() {
    let store = Arc::new(MemoryStore::new());
    initialized(&store, SERIAL);

    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "63C0");

    let (provisioner, _notices) = provisioner(store);
    let report = provisioner
        .verify(&mut MockTransport::new(card), SERIAL)
        .unwrap();
    assert!(report.status.is_verify_failed());
    assert_eq!(report.ordinal, 0);
}

#[test]
fn test_verify_unknown_fob() {
    let store = Arc::new(MemoryStore::new());
    let card = MockCard::new();
    let (provisioner, _notices) = provisioner(store.clone());

    let err = provisioner
        .verify(&mut MockTransport::new(card.clone()), SERIAL)
        .unwrap_err();
    assert_eq!(err.to_string(), "The fob hasn't been initialized");
    assert!(card.commands().is_empty());
    assert!(store.find_all().unwrap().is_empty());
}

#[test]
fn test_records_survive_in_json_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fobs.json");

    let card = MockCard::new();
    card.reply("9000");
    script_auth(&card, "11223344", "6A88");
    card.reply("9000").reply("9000");

    {
        let store = Arc::new(JsonFileStore::open(&path).unwrap());
        let (notifier, _notices) = fob_provision::Notifier::channel();
        let config = fob_provision::ProvisionerConfig::default()
            .with_settle_delay(std::time::Duration::ZERO)
            .with_secret(fob_provision::SecretPolicy::fixed(SECRET).unwrap());
        let provisioner = fob_provision::Provisioner::new(store, notifier, config);
        provisioner
            .init(&mut MockTransport::new(card), SERIAL)
            .unwrap();
    }

    let store = JsonFileStore::open(&path).unwrap();
    let all = store.find_all().unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].initialized);
    assert_eq!(all[0].secret.as_deref(), Some(SECRET));
    assert_eq!(store.find_not_uploaded().unwrap(), all);
}
