//! Provisioning state machine
//!
//! Init walks a fob through select, mutual authentication, file system
//! bootstrap or wipe, and the secret write:
//!
//! ```text
//! Idle -> Selecting -> Authenticating -+-> Bootstrapping -+-> Committing -> Done
//!                                      +-> ReKeying ------+
//!                                      +-> Rejected
//! ```
//!
//! The branch is chosen by the external authentication status word: `6A88`
//! means the key file does not exist yet, `9000` means the card accepted the
//! candidate key and is wiped first, `63Cx` means the key was wrong.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fob_apdu_core::{CardTransport, StatusWord, TransportError};
use rand::RngCore;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroize;

use crate::cipher::{CipherUnit, DesKey};
use crate::commands::{self, DEFAULT_KEY, Step};
use crate::fob::{Fob, FobPatch};
use crate::notice::{Notice, Notifier, VerifyReport};
use crate::session::Session;
use crate::store::FobStore;
use crate::{Error, Result};

/// Default pause between select and authentication
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(150);

/// Challenge/response rounds allowed when the card reports a stale challenge
pub const CHALLENGE_ATTEMPTS: u8 = 2;

/// How new secrets are chosen
#[derive(Clone, PartialEq, Eq)]
pub enum SecretPolicy {
    /// Random key of 8 (DES) or 16 (3DES) bytes
    Random {
        /// Key length in bytes
        bytes: usize,
    },
    /// The same key for every fob; bench testing only
    Fixed(String),
}

impl fmt::Debug for SecretPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random { bytes } => f.debug_struct("Random").field("bytes", bytes).finish(),
            Self::Fixed(_) => f.write_str("Fixed(..)"),
        }
    }
}

impl Default for SecretPolicy {
    fn default() -> Self {
        Self::Random { bytes: 16 }
    }
}

impl SecretPolicy {
    /// Random keys of `bytes` length
    pub fn random(bytes: usize) -> Result<Self> {
        match bytes {
            8 | 16 => Ok(Self::Random { bytes }),
            other => Err(Error::Config(format!(
                "secret length must be 8 or 16 bytes, got {other}"
            ))),
        }
    }

    /// A fixed key, validated as a DES or 3DES key
    pub fn fixed(key: &str) -> Result<Self> {
        DesKey::from_hex(key)?;
        Ok(Self::Fixed(key.to_uppercase()))
    }

    /// Produce the next secret as uppercase hex
    pub fn generate(&self) -> String {
        match self {
            Self::Random { bytes } => {
                let mut key = vec![0u8; *bytes];
                rand::rng().fill_bytes(&mut key);
                let secret = hex::encode_upper(&key);
                key.zeroize();
                secret
            }
            Self::Fixed(key) => key.clone(),
        }
    }
}

/// Tunables of the state machine
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Pause between select and authentication
    pub settle_delay: Duration,
    /// Rounds allowed on a stale challenge
    pub challenge_attempts: u8,
    /// How new secrets are chosen
    pub secret: SecretPolicy,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            challenge_attempts: CHALLENGE_ATTEMPTS,
            secret: SecretPolicy::default(),
        }
    }
}

impl ProvisionerConfig {
    /// Set the settle delay
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the secret policy
    pub fn with_secret(mut self, secret: SecretPolicy) -> Self {
        self.secret = secret;
        self
    }
}

/// States of a provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    /// Nothing sent yet
    Idle,
    /// Selecting the master file
    Selecting,
    /// Running the challenge/response exchange
    Authenticating,
    /// Creating the key file on a blank card
    Bootstrapping,
    /// Wiping and recreating the key file
    ReKeying,
    /// The card refused the key
    Rejected,
    /// Writing the new secret
    Committing,
    /// Secret confirmed
    Done,
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How the key file was prepared before the write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyingPath {
    /// Blank card: key file created
    Bootstrapped,
    /// Previously keyed card: data erased and key file recreated
    ReKeyed,
}

/// A successful init
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    /// The initialized record
    pub fob: Fob,
    /// Which branch was taken
    pub path: KeyingPath,
}

/// Runs state transitions for one serial, logging each one
#[derive(Debug)]
struct Progress<'a> {
    serial: &'a str,
    state: ProvisionState,
}

impl<'a> Progress<'a> {
    const fn new(serial: &'a str) -> Self {
        Self {
            serial,
            state: ProvisionState::Idle,
        }
    }

    fn advance(&mut self, next: ProvisionState) {
        debug!(serial = self.serial, from = %self.state, to = %next, "Provisioning state");
        self.state = next;
    }
}

/// Drives init and verify against the fob in the field
#[derive(Debug, Clone)]
pub struct Provisioner {
    store: Arc<dyn FobStore>,
    notifier: Notifier,
    config: ProvisionerConfig,
}

impl Provisioner {
    /// Create a provisioner
    pub fn new(store: Arc<dyn FobStore>, notifier: Notifier, config: ProvisionerConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// The store records are kept in
    pub fn store(&self) -> &Arc<dyn FobStore> {
        &self.store
    }

    /// Channel notices are published on
    pub const fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Provision a new secret onto the fob with `serial`
    #[instrument(skip(self, transport))]
    pub fn init<T: CardTransport>(&self, transport: &mut T, serial: &str) -> Result<Provisioned> {
        if let Some(existing) = self.store.find_by_serial(serial)? {
            if existing.uploaded {
                return Err(Error::AlreadyUploaded);
            }
            if existing.initialized {
                return Err(Error::AlreadyInitialized);
            }
        }
        let fob = self.store.find_or_create(serial)?;
        self.notifier.notify(Notice::Fob(fob.clone()));

        let mut progress = Progress::new(serial);
        let mut session = Session::new(transport, self.store.clone(), self.notifier.clone(), fob);

        progress.advance(ProvisionState::Selecting);
        self.select(&mut session)?;

        progress.advance(ProvisionState::Authenticating);
        let mut status = match session.fob().pending_secret.clone() {
            Some(pending) => {
                let status = self.authenticate(&mut session, &pending)?;
                if status.is_verify_failed() {
                    warn!(serial, "Pending key rejected, retrying with the default key");
                    session.update(FobPatch::clear_pending())?;
                    self.authenticate(&mut session, DEFAULT_KEY)?
                } else {
                    status
                }
            }
            None => self.authenticate(&mut session, DEFAULT_KEY)?,
        };

        let path = if status.is_verify_failed() {
            progress.advance(ProvisionState::Rejected);
            return Err(Error::AuthRejected(status));
        } else if status.is_referenced_data_not_found() {
            progress.advance(ProvisionState::Bootstrapping);
            status = session
                .transmit(Step::CreateFile, &commands::create_file())?
                .status();
            if !status.is_success() && !status.is_incorrect_p1p2() {
                return Err(Error::Card {
                    step: Step::CreateFile,
                    status,
                });
            }
            KeyingPath::Bootstrapped
        } else if !status.is_success() {
            return Err(Error::Card {
                step: Step::ExternalAuthentication,
                status,
            });
        } else {
            progress.advance(ProvisionState::ReKeying);
            session.transmit(Step::CleanData, &commands::clean_data())?;
            status = session
                .transmit(Step::CreateFile, &commands::create_file())?
                .status();
            if !status.is_success() {
                return Err(Error::Card {
                    step: Step::CreateFile,
                    status,
                });
            }
            KeyingPath::ReKeyed
        };

        progress.advance(ProvisionState::Committing);
        let secret = self.config.secret.generate();
        let mut key = hex::decode(&secret)?;
        let command = commands::add_secret(&key);
        key.zeroize();
        let command = command?;

        session.update(FobPatch::pending(secret.clone()))?;
        match session.transmit(Step::AddSecret, &command) {
            Ok(_) => {
                session.update(FobPatch::initialized(secret))?;
            }
            Err(e) if e.is_outcome_unknown() => {
                warn!(serial, error = %e, "Secret write outcome unknown, keeping pending key");
                return Err(e);
            }
            Err(e) => {
                session.update(FobPatch::clear_pending())?;
                return Err(e);
            }
        }

        progress.advance(ProvisionState::Done);
        let fob = session.into_fob();
        info!(serial, display = %fob.display_number(), ?path, "Fob initialized");
        Ok(Provisioned { fob, path })
    }

    /// Check that the fob with `serial` authenticates under its stored key
    ///
    /// Nothing is written to the card.
    #[instrument(skip(self, transport))]
    pub fn verify<T: CardTransport>(&self, transport: &mut T, serial: &str) -> Result<VerifyReport> {
        let fob = self
            .store
            .find_by_serial(serial)?
            .ok_or(Error::NeverInitialized)?;
        let key = fob.secret.clone().unwrap_or_else(|| DEFAULT_KEY.to_string());

        let mut session = Session::new(transport, self.store.clone(), self.notifier.clone(), fob);
        self.select(&mut session)?;
        let status = self.authenticate(&mut session, &key)?;

        let fob = session.into_fob();
        let report = VerifyReport {
            ordinal: self.store.count_before(fob.id)?,
            total: self.store.find_all()?.len(),
            status,
            fob,
        };
        info!(serial, status = %status, ordinal = report.ordinal, "Fob verified");
        self.notifier.notify(Notice::VerifyResult(report.clone()));
        Ok(report)
    }

    fn select<T: CardTransport>(&self, session: &mut Session<'_, T>) -> Result<()> {
        session.transmit(Step::SelectMf, &commands::select_mf())?;
        if !self.config.settle_delay.is_zero() {
            thread::sleep(self.config.settle_delay);
        }
        Ok(())
    }

    /// Run the challenge/response exchange under `key` and return the
    /// external authentication status word
    fn authenticate<T: CardTransport>(
        &self,
        session: &mut Session<'_, T>,
        key: &str,
    ) -> Result<StatusWord> {
        let cipher = CipherUnit::from_hex(key)?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let response = session.transmit(Step::GetChallenge, &commands::get_challenge())?;
            let challenge = response
                .payload()
                .get(..4)
                .ok_or_else(|| TransportError::other("Challenge shorter than 4 bytes"))?;

            let mut block = [0u8; 8];
            block[..4].copy_from_slice(challenge);
            let encrypted = cipher.encrypt(&block);
            let cryptogram: [u8; 8] = encrypted
                .as_slice()
                .try_into()
                .map_err(|_| Error::InvalidBlockLength(encrypted.len()))?;

            let status = session
                .transmit(
                    Step::ExternalAuthentication,
                    &commands::external_authenticate(&cryptogram)?,
                )?
                .status();

            if status.is_referenced_data_invalidated() && attempt < self.config.challenge_attempts {
                debug!(attempt, "Stale challenge, requesting a new one");
                continue;
            }
            return Ok(status);
        }
    }
}
