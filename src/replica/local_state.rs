use crate::replica::peers::MemberId;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Default)]
pub struct Term(u64);

impl Term {
    pub fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PersistentLocalState is used whenever the raft algorithm requires that something is persisted
/// to a durable store to guarantee safety. Not everything that uses disk has to go through this,
/// only algorithm-correctness-critical ones.
///
/// Store methods should be implemented atomically via a CAS like operation. Similar to most CAS
/// method signatures, the CAS store methods will return true if we have mutated state. State must
/// be durable before a store method returns.
pub trait PersistentLocalState: Send {
    /// Set current term to `new_term` atomically, iff it is larger than current term. Clears the
    /// vote, since a vote is only valid for the term it was cast in.
    ///
    /// CAS: Return true if we successfully mutated state.
    fn store_term_if_increased(&mut self, new_term: Term) -> Result<bool, io::Error>;

    /// Store our vote for the latest term iff the latest term (internal state) is the same term as
    /// the one provided, and we have not stored a vote for the latest term.
    ///
    /// CAS: Return true if we successfully mutated state.
    fn store_vote_for_term_if_unvoted(&mut self, expected_current_term: Term, vote: MemberId) -> Result<bool, io::Error>;

    /// Return the new term. Used when transitioning to candidate.
    fn increment_term_and_vote_for_self(&mut self, me: &MemberId) -> Result<Term, io::Error>;

    fn current_term(&self) -> Term;
    fn voted_for_current_term(&self) -> (Term, Option<MemberId>);
}

/// The term/vote pair as it is persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct LocalStateRecord {
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<MemberId>,
}

impl LocalStateRecord {
    pub(crate) fn store_term_if_increased(&mut self, new_term: Term) -> bool {
        if new_term <= self.current_term {
            false
        } else {
            self.current_term = new_term;
            self.voted_for = None;
            true
        }
    }

    pub(crate) fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: MemberId) -> bool {
        if expected_term == self.current_term && self.voted_for.is_none() {
            self.voted_for.replace(vote);
            true
        } else {
            false
        }
    }

    pub(crate) fn increment_term_and_vote_for(&mut self, me: &MemberId) -> Term {
        self.current_term.incr();
        self.voted_for.replace(me.clone());

        self.current_term
    }
}

pub(crate) type SharedLocalStateRecord = Arc<Mutex<LocalStateRecord>>;

/// Term and vote kept in memory only. The record is shared with the `MemoryStorage` that created
/// it, so it outlives a single open/close cycle but not the process.
pub struct VolatileLocalState {
    record: SharedLocalStateRecord,
}

impl VolatileLocalState {
    pub fn new() -> Self {
        Self::with_record(Arc::new(Mutex::new(LocalStateRecord::default())))
    }

    pub(crate) fn with_record(record: SharedLocalStateRecord) -> Self {
        VolatileLocalState { record }
    }

    fn record(&self) -> MutexGuard<'_, LocalStateRecord> {
        self.record.lock().expect("VolatileLocalState mutex guard poison")
    }
}

impl Default for VolatileLocalState {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentLocalState for VolatileLocalState {
    fn store_term_if_increased(&mut self, new_term: Term) -> Result<bool, io::Error> {
        Ok(self.record().store_term_if_increased(new_term))
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: MemberId) -> Result<bool, io::Error> {
        Ok(self.record().store_vote_for_term_if_unvoted(expected_term, vote))
    }

    fn increment_term_and_vote_for_self(&mut self, me: &MemberId) -> Result<Term, io::Error> {
        Ok(self.record().increment_term_and_vote_for(me))
    }

    fn current_term(&self) -> Term {
        self.record().current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<MemberId>) {
        let record = self.record();
        (record.current_term, record.voted_for.clone())
    }
}
