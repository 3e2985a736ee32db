use crate::commitlog::Index;
use crate::protocol::RaftLogEntry;
use crate::replica::{MemberId, Term};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("{field} must not be empty")]
    EmptyMemberId { field: &'static str },
    #[error("{field} is inconsistent: index {index} with term {term} (both must be 0, or both positive)")]
    InconsistentLogPosition { field: &'static str, index: u64, term: u64 },
    #[error("entry at offset {offset} has term {entry_term}, newer than request term {request_term}")]
    EntryTermAheadOfRequest {
        offset: usize,
        entry_term: u64,
        request_term: u64,
    },
    #[error("entry at offset {offset} has term {entry_term}, older than the entry before it ({previous_term})")]
    EntryTermsOutOfOrder {
        offset: usize,
        entry_term: u64,
        previous_term: u64,
    },
}

/// Sent by a candidate to every voting member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    term: Term,
    candidate: MemberId,
    last_log_entry: Option<(Term, Index)>,
}

impl VoteRequest {
    pub fn new(term: u64, candidate: MemberId, last_log_index: u64, last_log_term: u64) -> Result<Self, ProtocolError> {
        validate_member_id("candidate", &candidate)?;
        let last_log_entry = log_position("lastLogIndex/lastLogTerm", last_log_index, last_log_term)?;

        Ok(VoteRequest {
            term: Term::new(term),
            candidate,
            last_log_entry,
        })
    }

    pub(crate) fn from_parts(term: Term, candidate: MemberId, last_log_entry: Option<(Term, Index)>) -> Self {
        VoteRequest {
            term,
            candidate,
            last_log_entry,
        }
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn candidate(&self) -> &MemberId {
        &self.candidate
    }

    pub fn last_log_index(&self) -> u64 {
        self.last_log_entry.map(|(_, index)| index.as_u64()).unwrap_or(0)
    }

    pub fn last_log_term(&self) -> u64 {
        self.last_log_entry.map(|(term, _)| term.as_u64()).unwrap_or(0)
    }

    pub(crate) fn last_log_entry(&self) -> Option<(Term, Index)> {
        self.last_log_entry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteResponse {
    /// The responder's current term, after handling the request.
    pub term: Term,
    pub granted: bool,
}

/// Sent by the leader to replicate entries; with no entries it is a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesRequest {
    term: Term,
    leader: MemberId,
    previous_log_entry: Option<(Term, Index)>,
    entries: Vec<RaftLogEntry>,
    leader_commit: Option<Index>,
}

impl AppendEntriesRequest {
    pub fn new(
        term: u64,
        leader: MemberId,
        previous_log_index: u64,
        previous_log_term: u64,
        entries: Vec<RaftLogEntry>,
        leader_commit: u64,
    ) -> Result<Self, ProtocolError> {
        validate_member_id("leader", &leader)?;
        let previous_log_entry = log_position("prevLogIndex/prevLogTerm", previous_log_index, previous_log_term)?;

        let mut floor = previous_log_term;
        for (offset, entry) in entries.iter().enumerate() {
            let entry_term = entry.term().as_u64();
            if entry_term > term {
                return Err(ProtocolError::EntryTermAheadOfRequest {
                    offset,
                    entry_term,
                    request_term: term,
                });
            }
            if entry_term < floor {
                return Err(ProtocolError::EntryTermsOutOfOrder {
                    offset,
                    entry_term,
                    previous_term: floor,
                });
            }
            floor = entry_term;
        }

        Ok(AppendEntriesRequest {
            term: Term::new(term),
            leader,
            previous_log_entry,
            entries,
            leader_commit: Index::from_u64(leader_commit),
        })
    }

    pub(crate) fn from_parts(
        term: Term,
        leader: MemberId,
        previous_log_entry: Option<(Term, Index)>,
        entries: Vec<RaftLogEntry>,
        leader_commit: Option<Index>,
    ) -> Self {
        AppendEntriesRequest {
            term,
            leader,
            previous_log_entry,
            entries,
            leader_commit,
        }
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn leader(&self) -> &MemberId {
        &self.leader
    }

    pub fn previous_log_index(&self) -> u64 {
        self.previous_log_entry.map(|(_, index)| index.as_u64()).unwrap_or(0)
    }

    pub fn previous_log_term(&self) -> u64 {
        self.previous_log_entry.map(|(term, _)| term.as_u64()).unwrap_or(0)
    }

    pub fn entries(&self) -> &[RaftLogEntry] {
        &self.entries
    }

    pub fn leader_commit(&self) -> u64 {
        self.leader_commit.map(|index| index.as_u64()).unwrap_or(0)
    }

    pub(crate) fn previous_log_entry(&self) -> Option<(Term, Index)> {
        self.previous_log_entry
    }

    pub(crate) fn leader_commit_index(&self) -> Option<Index> {
        self.leader_commit
    }

    pub(crate) fn into_entries(self) -> Vec<RaftLogEntry> {
        self.entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendEntriesResponse {
    /// The responder's current term, after handling the request.
    pub term: Term,
    pub success: bool,
    /// On success, the highest index known to match the leader's log (0 if none). On failure, the
    /// index the leader should try next.
    pub index: u64,
}

impl AppendEntriesResponse {
    pub(crate) fn accepted(term: Term, match_index: Option<Index>) -> Self {
        AppendEntriesResponse {
            term,
            success: true,
            index: match_index.map(|i| i.as_u64()).unwrap_or(0),
        }
    }

    pub(crate) fn rejected(term: Term, next_index_hint: Index) -> Self {
        AppendEntriesResponse {
            term,
            success: false,
            index: next_index_hint.as_u64(),
        }
    }

    pub(crate) fn stale_term(term: Term) -> Self {
        AppendEntriesResponse {
            term,
            success: false,
            index: 0,
        }
    }
}

/// Every message that crosses the wire between members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftMessage {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendEntriesRequest(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
}

fn validate_member_id(field: &'static str, id: &MemberId) -> Result<(), ProtocolError> {
    if id.as_str().is_empty() {
        Err(ProtocolError::EmptyMemberId { field })
    } else {
        Ok(())
    }
}

fn log_position(field: &'static str, index: u64, term: u64) -> Result<Option<(Term, Index)>, ProtocolError> {
    match (index, term) {
        (0, 0) => Ok(None),
        (0, _) | (_, 0) => Err(ProtocolError::InconsistentLogPosition { field, index, term }),
        (index, term) => Ok(Some((Term::new(term), Index::new(index)))),
    }
}
