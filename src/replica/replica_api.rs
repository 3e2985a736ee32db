use crate::api::{CommittedEntry, StateMachine};
use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::peers::MemberId;
use bytes::Bytes;
use std::fmt;
use std::io;

#[derive(Debug)]
pub(crate) struct SubmitInput {
    pub(crate) data: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum RequestVoteError {
    #[error("local storage failure")]
    LocalIoError(#[from] io::Error),
    #[error("replica actor has exited")]
    ActorExited,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum AppendEntriesError {
    #[error("leader {0} is not a member of the cluster")]
    LeaderNotInCluster(MemberId),
    #[error("local storage failure")]
    LocalIoError(#[from] io::Error),
    #[error("replica actor has exited")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct RequestVoteReplyFromPeer {
    pub(crate) peer_id: MemberId,
    pub(crate) term: Term,
    pub(crate) result: RequestVoteResult,
}

#[derive(Debug)]
pub(crate) enum RequestVoteResult {
    VoteGranted,
    VoteNotGranted { peer_term: Term },
    RetryableFailure(String),
}

#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeer {
    pub(crate) descriptor: AppendEntriesReplyFromPeerDescriptor,
    pub(crate) result: Result<AppendEntriesPeerOutcome, AppendEntriesReplyFromPeerError>,
}

// This is basically info about the original request
#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeerDescriptor {
    pub(crate) peer_id: MemberId,
    pub(crate) term: Term,
    pub(crate) seq_no: u64,
    pub(crate) previous_log_entry_index: Option<Index>,
    pub(crate) num_log_entries: usize,
}

#[derive(Debug)]
pub(crate) enum AppendEntriesPeerOutcome {
    Accepted,
    /// Peer's log didn't match at the previous entry. Carries where the peer suggests we resume.
    Rejected { next_index_hint: u64 },
}

#[derive(Debug)]
pub(crate) enum AppendEntriesReplyFromPeerError {
    StaleTerm { new_term: Term },
    RetryableFailure(String),
}

/// LeaderTimerTick contains info for a single tick of a leader's per-peer timer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LeaderTimerTick {
    pub(crate) peer_id: MemberId,
    pub(crate) term: Term,
}

/// ElectionTimerTick is a single timeout of a follower's or candidate's election timer. Each timer
/// gets a fresh id, so ticks from a replaced timer can be told apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ElectionTimerTick {
    pub(crate) timer_id: u64,
}

/// What survives between two runs of a replica inside the same `RaftServer`: the state machine,
/// and how far into the log it has been applied.
pub(crate) struct DormantState {
    pub(crate) state_machine: Box<dyn StateMachine>,
    pub(crate) last_applied: Option<Index>,
}

impl DormantState {
    pub(crate) fn new(state_machine: Box<dyn StateMachine>) -> Self {
        DormantState {
            state_machine,
            last_applied: None,
        }
    }

    pub(crate) fn apply(&mut self, index: Index, term: Term, data: Vec<u8>) -> crate::api::StateMachineOutput {
        let output = self.state_machine.apply_committed_entry(CommittedEntry {
            index: index.as_u64(),
            term: term.as_u64(),
            data: Bytes::from(data),
        });
        self.last_applied.replace(index);
        output
    }
}

impl fmt::Debug for DormantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DormantState(last_applied={:?})", self.last_applied)
    }
}

/// Returned by the event loop when it exits.
#[derive(Debug)]
pub(crate) struct ReplicaExit {
    pub(crate) dormant: DormantState,
    pub(crate) term: Term,
    pub(crate) fault: Option<String>,
}
