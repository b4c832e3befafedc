use parking_lot::Mutex;

use super::{Document, FobStore, StoreError};
use crate::fob::{Fob, FobPatch};

/// Ephemeral store, used by tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Document>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Count last passed to [`FobStore::record_unuploaded`]
    pub fn recorded_unuploaded(&self) -> Option<usize> {
        self.document.lock().unuploaded_at_exit
    }
}

impl FobStore for MemoryStore {
    fn find_by_serial(&self, serial: &str) -> Result<Option<Fob>, StoreError> {
        Ok(self.document.lock().find_by_serial(serial))
    }

    fn create(&self, serial: &str) -> Result<Fob, StoreError> {
        Ok(self.document.lock().create(serial))
    }

    fn update(&self, id: u64, patch: FobPatch) -> Result<Fob, StoreError> {
        self.document.lock().update(id, patch)
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
        self.document.lock().unuploaded_at_exit = Some(count);
        Ok(())
    }

    fn find_or_create(&self, serial: &str) -> Result<Fob, StoreError> {
        Ok(self.document.lock().find_or_create(serial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        let fob = store.find_or_create("0a1b2c3d").unwrap();
        assert_eq!(store.find_or_create("0a1b2c3d").unwrap().id, fob.id);
        assert_eq!(store.find_all().unwrap().len(), 1);

        store.update(fob.id, FobPatch::initialized("AA")).unwrap();
        assert_eq!(store.find_not_uploaded().unwrap().len(), 1);

        assert_eq!(store.recorded_unuploaded(), None);
        store.record_unuploaded(1).unwrap();
        assert_eq!(store.recorded_unuploaded(), Some(1));
    }
}
