use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Document, FobStore, StoreError};
use crate::fob::{Fob, FobPatch};

/// Store persisted as one JSON document
///
/// Every mutation rewrites the whole file through a temporary sibling that is
/// synced before the rename, so a crash or power loss leaves either the old or
/// the new document on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    document: Mutex<Document>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let document = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "Starting a new fob store");
                Document::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Count last passed to [`FobStore::record_unuploaded`]
    pub fn recorded_unuploaded(&self) -> Option<usize> {
        self.document.lock().unuploaded_at_exit
    }

    /// Run `f` on a copy of the document and commit it once it is on disk
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Document) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut document = self.document.lock();
        let mut next = document.clone();
        let value = f(&mut next)?;
        self.persist(&next)?;
        *document = next;
        Ok(value)
    }

    fn persist(&self, document: &Document) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let mut file = File::create(&temp)?;
        file.write_all(&serde_json::to_vec_pretty(document)?)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, &self.path)?;
        sync_parent(&self.path);
        debug!(path = %self.path.display(), fobs = document.fobs.len(), "Store written");
        Ok(())
    }
}

/// Flush the rename itself. Directories cannot be opened for syncing on every
/// platform, so a failure here is only logged.
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
            debug!(error = %e, "Could not sync store directory");
        }
    }
}

impl FobStore for JsonFileStore {
    fn find_by_serial(&self, serial: &str) -> Result<Option<Fob>, StoreError> {
        Ok(self.document.lock().find_by_serial(serial))
    }

    fn create(&self, serial: &str) -> Result<Fob, StoreError> {
        self.mutate(|doc| Ok(doc.create(serial)))
    }

    fn update(&self, id: u64, patch: FobPatch) -> Result<Fob, StoreError> {
        self.mutate(|doc| doc.update(id, patch))
    }

    fn count_before(&self, id: u64) -> Result<usize, StoreError> {
        Ok(self.document.lock().count_before(id))
    }

    fn find_all(&self) -> Result<Vec<Fob>, StoreError> {
        Ok(self.document.lock().find_all())
    }

    fn find_not_uploaded(&self) -> Result<Vec<Fob>, StoreError> {
        Ok(self.document.lock().find_not_uploaded())
    }

    fn record_unuploaded(&self, count: usize) -> Result<(), StoreError> {
        self.mutate(|doc| {
            doc.unuploaded_at_exit = Some(count);
            Ok(())
        })
    }

    fn find_or_create(&self, serial: &str) -> Result<Fob, StoreError> {
        if let Some(fob) = self.find_by_serial(serial)? {
            return Ok(fob);
        }
        self.mutate(|doc| Ok(doc.find_or_create(serial)))
    }
}
