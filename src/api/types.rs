use crate::api::StateMachineOutput;
use crate::replica::{Member, MemberId};
use crate::transport::TransportError;
use std::fmt;
use std::io;
use std::sync::Arc;

/// The role a server currently plays.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    /// Not running: never opened, closed, deleted, or stopped after a storage fault.
    Inactive,
    /// Started, membership not yet resolved.
    Join,
    /// Non-voting replica.
    Passive,
    Follower,
    Candidate,
    Leader,
    /// Departing the cluster.
    Leave,
}

impl Role {
    pub fn is_active(&self) -> bool {
        !matches!(self, Role::Inactive | Role::Leave)
    }
}

/// A point in time view of the local server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerStatus {
    pub role: Role,
    pub term: u64,
    pub leader: Option<MemberId>,
    /// 0 means nothing is known to be committed.
    pub commit_index: u64,
    /// 0 means nothing has been applied.
    pub last_applied: u64,
    /// Set when the server stopped because local storage failed.
    pub fault: Option<String>,
}

impl ServerStatus {
    pub(crate) fn inactive(term: u64, last_applied: u64, fault: Option<String>) -> Self {
        ServerStatus {
            role: Role::Inactive,
            term,
            leader: None,
            commit_index: last_applied,
            last_applied,
            fault,
        }
    }
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self::inactive(0, 0, None)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitOutput {
    pub index: u64,
    pub term: u64,
    pub output: StateMachineOutput,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("not leader, leader is {}", .0.id)]
    LeaderRedirect(Member),

    // Can be retried with backoff. Likely an election is in progress.
    #[error("no leader is currently known")]
    NoLeader,

    #[error("leadership was lost before the entry was applied")]
    LeadershipLost,

    #[error("failed to persist entry")]
    LocalIoError(#[source] io::Error),

    #[error("command could not be encoded")]
    Encode(#[from] crate::serializer::SerializerError),

    #[error("server is not open")]
    NotOpen,

    #[error("replica event loop has exited")]
    ReplicaExited,
}

/// Failure of `open()`, `close()` or `delete()`. Concurrent callers coalesced onto one operation
/// all receive a clone of the same error.
#[derive(Clone, Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("failed to open storage")]
    StorageOpen(#[source] SharedIoError),
    #[error("failed to recover from storage")]
    Recovery(#[source] SharedIoError),
    #[error("failed to purge storage")]
    StoragePurge(#[source] SharedIoError),
    #[error("failed to start listening")]
    Listen(#[from] TransportError),
    #[error("the operation was interrupted before it completed")]
    Interrupted,
    #[error("server has been deleted")]
    Deleted,
}

/// A cloneable `io::Error`.
#[derive(Clone)]
pub struct SharedIoError(Arc<io::Error>);

impl SharedIoError {
    pub fn kind(&self) -> io::ErrorKind {
        self.0.kind()
    }
}

impl From<io::Error> for SharedIoError {
    fn from(e: io::Error) -> Self {
        SharedIoError(Arc::new(e))
    }
}

impl fmt::Debug for SharedIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for SharedIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for SharedIoError {}
