use crate::commitlog::{InMemoryLog, SharedLogBuffer};
use crate::protocol::RaftLogEntry;
use crate::replica::{LocalStateRecord, SharedLocalStateRecord, VolatileLocalState};
use crate::storage::{Storage, StorageHandles};
use std::io;
use std::sync::{Arc, Mutex};

/// Keeps everything in memory. What's stored survives close and reopen of the server it belongs
/// to, but not the process.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    log: SharedLogBuffer,
    local_state: SharedLocalStateRecord,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            log: Arc::new(Mutex::new(Vec::new())),
            local_state: Arc::new(Mutex::new(LocalStateRecord::default())),
        }
    }

    /// Number of entries currently in the log.
    pub fn log_len(&self) -> usize {
        self.log.lock().expect("MemoryStorage mutex guard poison").len()
    }
}

impl Storage for MemoryStorage {
    fn open(&self) -> Result<StorageHandles, io::Error> {
        Ok(StorageHandles::new(
            InMemoryLog::<RaftLogEntry>::with_buffer(self.log.clone()),
            VolatileLocalState::with_record(self.local_state.clone()),
        ))
    }

    fn purge(&self) -> Result<(), io::Error> {
        self.log.lock().expect("MemoryStorage mutex guard poison").clear();
        *self.local_state.lock().expect("MemoryStorage mutex guard poison") = LocalStateRecord::default();
        Ok(())
    }
}
