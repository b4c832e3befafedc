//! Fob lifecycle store
//!
//! The store owns the [`Fob`] records. Its contract is small: find-or-create
//! by serial, patch by id, and the handful of queries the workflows need.
//! Records are never deleted and lifecycle flags never go back to false.

mod json;
mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fob::{Fob, FobPatch};

pub use json::JsonFileStore;
pub use memory::MemoryStore;

/// Store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record has this id
    #[error("No fob with id {0}")]
    NotFound(u64),

    /// `uploaded` was raised on a fob that was never initialized
    #[error("Fob {0} cannot be marked uploaded before it is initialized")]
    NotInitialized(String),

    /// A different secret was written over an initialized fob
    #[error("Fob {0} already holds a provisioned secret")]
    SecretLocked(String),

    /// Reading or writing the backing file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing document could not be encoded or decoded
    #[error("Malformed store document: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Read/write contract of the fob lifecycle store
pub trait FobStore: Send + Sync + fmt::Debug {
    /// Look a fob up by serial
    fn find_by_serial(&self, serial: &str) -> Result<Option<Fob>, StoreError>;

    /// Create a record for `serial`, assigning the next id
    fn create(&self, serial: &str) -> Result<Fob, StoreError>;

    /// Apply `patch` to the record with `id` and return the result
    fn update(&self, id: u64, patch: FobPatch) -> Result<Fob, StoreError>;

    /// Number of records with an id smaller than `id`
    fn count_before(&self, id: u64) -> Result<usize, StoreError>;

    /// All records, by id
    fn find_all(&self) -> Result<Vec<Fob>, StoreError>;

    /// Initialized records not yet accepted by the registry
    fn find_not_uploaded(&self) -> Result<Vec<Fob>, StoreError>;

    /// Record how many fobs were left unuploaded at shutdown
    fn record_unuploaded(&self, count: usize) -> Result<(), StoreError>;

    /// Find the record for `serial`, creating it on first contact
    fn find_or_create(&self, serial: &str) -> Result<Fob, StoreError> {
        match self.find_by_serial(serial)? {
            Some(fob) => Ok(fob),
            None => self.create(serial),
        }
    }
}

/// The whole store as one serializable document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    fobs: Vec<Fob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unuploaded_at_exit: Option<usize>,
}

impl Document {
    fn find_by_serial(&self, serial: &str) -> Option<Fob> {
        self.fobs.iter().find(|fob| fob.serial == serial).cloned()
    }

    fn create(&mut self, serial: &str) -> Fob {
        self.next_id = self.next_id.max(self.fobs.iter().map(|f| f.id).max().unwrap_or(0)) + 1;
        let fob = Fob::new(self.next_id, serial);
        self.fobs.push(fob.clone());
        fob
    }

    fn find_or_create(&mut self, serial: &str) -> Fob {
        match self.find_by_serial(serial) {
            Some(fob) => fob,
            None => self.create(serial),
        }
    }

    fn update(&mut self, id: u64, patch: FobPatch) -> Result<Fob, StoreError> {
        let fob = self
            .fobs
            .iter_mut()
            .find(|fob| fob.id == id)
            .ok_or(StoreError::NotFound(id))?;

        if patch.uploaded && !(fob.initialized || patch.initialized) {
            return Err(StoreError::NotInitialized(fob.serial.clone()));
        }
        if let Some(secret) = &patch.secret {
            if fob.initialized && fob.secret.as_ref() != Some(secret) {
                return Err(StoreError::SecretLocked(fob.serial.clone()));
            }
        }

        if let Some(label) = patch.last_operation {
            fob.last_operation = label;
        }
        if let Some(secret) = patch.secret {
            fob.secret = Some(secret);
        }
        if let Some(pending) = patch.pending_secret {
            fob.pending_secret = pending;
        }
        fob.initialized |= patch.initialized;
        fob.uploaded |= patch.uploaded;

        Ok(fob.clone())
    }

    fn count_before(&self, id: u64) -> usize {
        self.fobs.iter().filter(|fob| fob.id < id).count()
    }

    fn find_all(&self) -> Vec<Fob> {
        let mut fobs = self.fobs.clone();
        fobs.sort_by_key(|fob| fob.id);
        fobs
    }

    fn find_not_uploaded(&self) -> Vec<Fob> {
        self.find_all()
            .into_iter()
            .filter(Fob::awaits_upload)
            .collect()
    }
}
