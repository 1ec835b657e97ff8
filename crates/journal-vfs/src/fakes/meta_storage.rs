use parking_lot::Mutex;

use crate::traits::{IoError, IoHandle, MetaStorage};

/// A [`MetaStorage`] backed by a single growable in-memory byte buffer.
///
/// Writes and reads complete synchronously (the returned [`IoHandle`] is
/// already resolved), which is sufficient for replay/checkpoint tests: the
/// journal never assumes I/O completes within a particular number of polls,
/// only that it eventually does.
#[derive(Debug)]
pub struct InMemoryMetaStorage {
    bytes:    Mutex<Vec<u8>>,
    poisoned: Mutex<bool>,
}

impl InMemoryMetaStorage {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes:    Mutex::new(vec![0; capacity]),
            poisoned: Mutex::new(false),
        }
    }

    /// Makes every subsequent write fail, simulating a media failure.
    pub fn poison(&self) {
        *self.poisoned.lock() = true;
    }

    /// Returns a snapshot of the whole backing buffer, e.g. to corrupt bytes
    /// for a torn-log test before constructing a fresh [`InMemoryMetaStorage`]
    /// from the result via [`Self::from_bytes`].
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes:    Mutex::new(bytes),
            poisoned: Mutex::new(false),
        }
    }
}

impl MetaStorage for InMemoryMetaStorage {
    fn write_page(&self, offset: u64, data: &[u8]) -> IoHandle {
        let (tx, rx) = crossbeam_channel::bounded(1);

        if *self.poisoned.lock() {
            tracing::debug!(offset, len = data.len(), "rejecting write against poisoned fake storage");
            let _ = tx.send(Err(IoError { message: "storage poisoned".to_owned() }));
            return IoHandle::new(rx);
        }

        let mut bytes = self.bytes.lock();
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        drop(bytes);

        let _ = tx.send(Ok(()));
        IoHandle::new(rx)
    }

    fn read_page(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError> {
        let bytes = self.bytes.lock();
        let start = offset as usize;
        let end = start + len;
        if end > bytes.len() {
            return Ok(vec![0; len]);
        }
        Ok(bytes[start..end].to_vec())
    }
}
