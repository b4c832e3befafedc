//! Shared fixtures for the provisioning scenarios

#![allow(dead_code, unreachable_pub)]

use std::sync::Arc;
use std::time::Duration;

use fob_apdu_core::transport::MockCard;
use fob_provision::commands::DEFAULT_KEY;
use fob_provision::{
    CipherUnit, FobPatch, FobStore, MemoryStore, NoticeReceiver, Notifier, Provisioner,
    ProvisionerConfig, SecretPolicy,
};

pub const READER: &str = "ACS ACR122U PICC Interface";
pub const SERIAL: &str = "0a1b2c3d";
pub const SECRET: &str = "95FD677E92AA7C051E70928A3D5C0D95";

pub const SELECT_MF: &str = "00A40000023F00";
pub const GET_CHALLENGE: &str = "008400000400000000";
pub const CLEAN_DATA: &str = "800E000000";
pub const CREATE_FILE: &str = "80E00000073F005001F1FFFF";
pub const ADD_SECRET: &str = "80D401001539F0F1AAFF95FD677E92AA7C051E70928A3D5C0D95";

/// Provisioner writing [`SECRET`], with no settle delay
pub fn provisioner(store: Arc<MemoryStore>) -> (Provisioner, NoticeReceiver) {
    let (notifier, receiver) = Notifier::channel();
    let config = ProvisionerConfig::default()
        .with_settle_delay(Duration::ZERO)
        .with_secret(SecretPolicy::fixed(SECRET).unwrap());
    (Provisioner::new(store, notifier, config), receiver)
}

/// External authenticate command the host sends for `challenge` under `key`
pub fn external_authenticate(key: &str, challenge: &str) -> String {
    let cryptogram = CipherUnit::from_hex(key)
        .unwrap()
        .encrypt_hex(&format!("{challenge}00000000"))
        .unwrap();
    format!("0082000008{cryptogram}")
}

/// Same, under the manufacturer key
pub fn default_authenticate(challenge: &str) -> String {
    external_authenticate(DEFAULT_KEY, challenge)
}

/// Queue a challenge reply followed by the authentication status word
pub fn script_auth(card: &MockCard, challenge: &str, status: &str) {
    card.reply(&format!("{challenge}9000")).reply(status);
}

/// A record already carrying [`SECRET`]
pub fn initialized(store: &MemoryStore, serial: &str) -> fob_provision::Fob {
    let fob = store.find_or_create(serial).unwrap();
    store.update(fob.id, FobPatch::initialized(SECRET)).unwrap()
}
