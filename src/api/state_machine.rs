use bytes::Bytes;

/// StateMachine is the application specific view of applying the replicated log in sequentially
/// consistent order.
pub trait StateMachine: Send + 'static {
    /// apply_committed_entry is called only when it's guaranteed that the provided entry has been
    /// committed (i.e. replicated to a majority). You will never need to reverse an entry once
    /// you've been asked to apply it, so your impl of applying an entry need not be reversible.
    ///
    /// Entries are applied one at a time, in strictly increasing index order, each exactly once
    /// for the lifetime of the `RaftServer` that owns this state machine.
    ///
    /// The leader doesn't resolve the submitter's future until this returns. The output is handed
    /// back to the submitter, so a client can correlate a state transition with its result.
    fn apply_committed_entry(&mut self, entry: CommittedEntry) -> StateMachineOutput;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedEntry {
    pub index: u64,
    pub term: u64,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateMachineOutput {
    Data(Bytes),
    NoData,
}

/// Applies nothing. Useful for members that only need to take part in elections and replication.
#[derive(Default)]
pub struct NoOpStateMachine;

impl NoOpStateMachine {
    pub fn new() -> Self {
        NoOpStateMachine
    }
}

impl StateMachine for NoOpStateMachine {
    fn apply_committed_entry(&mut self, _: CommittedEntry) -> StateMachineOutput {
        StateMachineOutput::NoData
    }
}
