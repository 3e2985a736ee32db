//! Where a member keeps its log and its term/vote record.
mod disk;
mod memory;

use crate::commitlog::Log;
use crate::protocol::RaftLogEntry;
use crate::replica::PersistentLocalState;
use std::io;

pub use disk::DiskStorage;
pub use disk::FileLocalState;
pub use memory::MemoryStorage;

/// Storage is opened once per `RaftServer::open()`, and purged by `RaftServer::delete()`.
pub trait Storage: Send + Sync + 'static {
    /// Hand out the log and the term/vote record, recovered from whatever was persisted before.
    fn open(&self) -> Result<StorageHandles, io::Error>;

    /// Remove everything persisted. Called only while no handles are open.
    fn purge(&self) -> Result<(), io::Error>;
}

pub struct StorageHandles {
    pub log: Box<dyn Log<RaftLogEntry>>,
    pub local_state: Box<dyn PersistentLocalState>,
}

impl StorageHandles {
    pub fn new<L, S>(log: L, local_state: S) -> Self
    where
        L: Log<RaftLogEntry> + 'static,
        S: PersistentLocalState + 'static,
    {
        StorageHandles {
            log: Box::new(log),
            local_state: Box::new(local_state),
        }
    }
}
