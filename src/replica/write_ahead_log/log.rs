use crate::api::StateMachineOutput;
use crate::commitlog::{Index, Log};
use crate::protocol::RaftLogEntry;
use crate::replica::local_state::Term;
use crate::replica::replica_api::DormantState;
use std::io;

/// An entry that has just been applied to the state machine.
#[derive(Debug)]
pub(crate) struct AppliedEntry {
    pub(crate) index: Index,
    pub(crate) term: Term,
    pub(crate) output: StateMachineOutput,
}

/// WriteAheadLog is the raft-specific log facade.
///
/// Note: A log entry has 3 states (not modeled directly in code):
/// 1. Persisted - written to disk, not yet replicated to majority
/// 2. Committed - written to disk, replicated to majority
/// 3. Applied - a committed entry that has also been applied to the state machine
///
/// A log entry's state has no global truth. Each replica will have their own local view of what
/// state the log entry is in.
pub(crate) struct WriteAheadLog {
    logger: slog::Logger,

    // This is the log that we're replicating.
    log: Box<dyn Log<RaftLogEntry>>,
    // Metadata about the highest log entry that we've locally written. It must be updated atomically.
    latest_entry_metadata: Option<(Term, Index)>,

    // Index of highest log entry known to be committed. None if nothing is committed.
    commit_index: Option<Index>,
    // Owns the state machine, and the index of highest log entry applied to it.
    applied: DormantState,
}

impl WriteAheadLog {
    /// Recover the log's tail from storage. The commit index restarts at whatever the state
    /// machine has already applied.
    pub(crate) fn recover(
        logger: slog::Logger,
        log: Box<dyn Log<RaftLogEntry>>,
        applied: DormantState,
    ) -> Result<Self, (io::Error, DormantState)> {
        let latest_entry_metadata = match log.last_index() {
            None => None,
            Some(last_index) => match log.read(last_index) {
                Ok(Some(entry)) => Some((entry.term(), last_index)),
                Ok(None) => {
                    let e = io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("log reports last index {:?} but has no entry there", last_index),
                    );
                    return Err((e, applied));
                }
                Err(e) => return Err((e, applied)),
            },
        };

        let latest_index = latest_entry_metadata.map(|(_, index)| index);
        if applied.last_applied > latest_index {
            let e = io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "state machine has applied up to {:?} but the log ends at {:?}",
                    applied.last_applied, latest_index
                ),
            );
            return Err((e, applied));
        }

        slog::info!(
            logger,
            "Recovered log. Latest entry: {:?}, last applied: {:?}",
            latest_entry_metadata,
            applied.last_applied
        );

        Ok(WriteAheadLog {
            logger,
            log,
            latest_entry_metadata,
            commit_index: applied.last_applied,
            applied,
        })
    }

    pub(crate) fn into_dormant(self) -> DormantState {
        self.applied
    }

    pub(crate) fn latest_entry(&self) -> Option<(Term, Index)> {
        self.latest_entry_metadata
    }

    pub(crate) fn latest_index(&self) -> Option<Index> {
        self.latest_entry_metadata.map(|(_, index)| index)
    }

    pub(crate) fn read(&self, index: Index) -> Result<Option<RaftLogEntry>, io::Error> {
        self.log.read(index)
    }

    pub(crate) fn read_required(&self, index: Index) -> Result<RaftLogEntry, io::Error> {
        self.read(index)?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("expected a log entry at index {:?}", index),
            )
        })
    }

    /// Term of the entry at `index`, or None if we don't have one.
    pub(crate) fn term_at(&self, index: Index) -> Result<Option<Term>, io::Error> {
        if let Some((latest_term, latest_index)) = self.latest_entry_metadata {
            if index == latest_index {
                return Ok(Some(latest_term));
            }
            if index > latest_index {
                return Ok(None);
            }
        }
        Ok(self.read(index)?.map(|entry| entry.term()))
    }

    /// Remove anything starting at `index` and later. Never removes committed entries.
    pub(crate) fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        if let Some(commit_index) = self.commit_index {
            if index <= commit_index {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "refusing to truncate at {:?}, entries up to {:?} are committed",
                        index, commit_index
                    ),
                ));
            }
        }

        let mut new_latest_entry_metadata = None;
        if let Some(new_latest_entry_index) = index.checked_minus(1) {
            new_latest_entry_metadata = self
                .read(new_latest_entry_index)?
                .map(|latest_entry| (latest_entry.term(), new_latest_entry_index));
        }

        self.log.truncate(index)?;
        slog::info!(self.logger, "Truncated log from index {:?}", index);

        // Only update state after log action completes.
        self.latest_entry_metadata = new_latest_entry_metadata;
        Ok(())
    }

    pub(crate) fn append(&mut self, entry: RaftLogEntry) -> Result<Index, io::Error> {
        let appended_term = entry.term();
        let appended_index = self.log.append(entry)?;
        // Only update state after log action completes.
        self.latest_entry_metadata = Some((appended_term, appended_index));

        Ok(appended_index)
    }

    /// Read up to `max_entries` consecutive entries starting at `start`.
    pub(crate) fn read_batch(&self, start: Index, max_entries: usize) -> Result<Vec<RaftLogEntry>, io::Error> {
        let latest_index = match self.latest_index() {
            Some(latest) if latest >= start => latest,
            _ => return Ok(Vec::new()),
        };

        let available = (latest_index.as_u64() - start.as_u64() + 1) as usize;
        let count = available.min(max_entries);
        let mut entries = Vec::with_capacity(count);
        for offset in 0..count as u64 {
            entries.push(self.read_required(start.plus(offset))?);
        }
        Ok(entries)
    }

    pub(crate) fn commit_index(&self) -> Option<Index> {
        self.commit_index
    }

    pub(crate) fn last_applied(&self) -> Option<Index> {
        self.applied.last_applied
    }

    /// Leader side.
    ///
    /// > If there exists an N such that N > commitIndex, a majority
    /// > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
    /// > set commitIndex = N (§5.3, §5.4).
    ///
    /// Returns true if the commit index moved.
    pub(crate) fn ratchet_fwd_commit_index_if_valid(
        &mut self,
        tentative_new_commit_index: Index,
        current_term: Term,
    ) -> Result<bool, io::Error> {
        if matches!(self.commit_index, Some(ci) if tentative_new_commit_index <= ci) {
            return Ok(false);
        }
        if matches!(self.latest_index(), Some(latest) if tentative_new_commit_index > latest) {
            return Ok(false);
        }

        match self.term_at(tentative_new_commit_index)? {
            Some(term) if term == current_term => {
                self.commit_index.replace(tentative_new_commit_index);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Follower side. Never moves backwards, and never past our own log.
    pub(crate) fn ratchet_fwd_commit_index(&mut self, new_commit_index: Index) -> bool {
        let bounded = match self.latest_index() {
            Some(latest) => new_commit_index.min(latest),
            None => return false,
        };
        if matches!(self.commit_index, Some(ci) if bounded <= ci) {
            return false;
        }

        self.commit_index.replace(bounded);
        true
    }

    /// apply_all_committed_entries applies all committed but unapplied entries in order.
    ///
    /// > If commitIndex > lastApplied: increment lastApplied, apply
    /// > log[lastApplied] to state machine (§5.3)
    pub(crate) fn apply_all_committed_entries(&mut self) -> Result<Vec<AppliedEntry>, io::Error> {
        let mut applied_entries = Vec::new();

        let commit_index = match self.commit_index {
            Some(ci) => ci,
            None => return Ok(applied_entries),
        };

        loop {
            let next_index = match self.applied.last_applied {
                None => Index::start_index(),
                Some(last_applied) if last_applied < commit_index => last_applied.plus(1),
                Some(_) => break,
            };

            let entry = self.read_required(next_index)?;
            let term = entry.term();
            let output = self.applied.apply(next_index, term, entry.into_data());
            slog::debug!(self.logger, "Applied entry {:?} (term {:?})", next_index, term);

            applied_entries.push(AppliedEntry {
                index: next_index,
                term,
                output,
            });
        }

        Ok(applied_entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CommittedEntry, StateMachine};
    use crate::commitlog::InMemoryLog;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<u64>>>);

    impl StateMachine for Recorder {
        fn apply_committed_entry(&mut self, entry: CommittedEntry) -> StateMachineOutput {
            self.0.lock().unwrap().push(entry.index);
            StateMachineOutput::Data(entry.data)
        }
    }

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn wal_with(terms: &[u64]) -> (WriteAheadLog, Arc<Mutex<Vec<u64>>>) {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut log: InMemoryLog<RaftLogEntry> = InMemoryLog::create();
        for (i, term) in terms.iter().enumerate() {
            log.append(RaftLogEntry::new(Term::new(*term), vec![i as u8])).unwrap();
        }
        let dormant = DormantState::new(Box::new(Recorder(applied.clone())));

        let wal = WriteAheadLog::recover(logger(), Box::new(log), dormant).unwrap();
        (wal, applied)
    }

    #[test]
    fn recover_reads_latest_entry() {
        let (wal, _) = wal_with(&[1, 1, 3]);

        assert_eq!(wal.latest_entry(), Some((Term::new(3), Index::new(3))));
        assert_eq!(wal.commit_index(), None);
        assert_eq!(wal.last_applied(), None);
    }

    #[test]
    fn recover_refuses_log_shorter_than_applied_state() {
        let mut dormant = DormantState::new(Box::new(crate::api::NoOpStateMachine::new()));
        dormant.last_applied = Some(Index::new(2));
        let mut log: InMemoryLog<RaftLogEntry> = InMemoryLog::create();
        log.append(RaftLogEntry::new(Term::new(1), vec![])).unwrap();

        let result = WriteAheadLog::recover(logger(), Box::new(log), dormant);

        match result {
            Err((e, dormant)) => {
                assert_eq!(e.kind(), io::ErrorKind::InvalidData);
                assert_eq!(dormant.last_applied, Some(Index::new(2)));
            }
            Ok(_) => panic!("expected recovery failure"),
        }
    }

    #[test]
    fn leader_commit_requires_entry_from_current_term() {
        let (mut wal, _) = wal_with(&[1, 1, 2]);

        // Entry 2 is from term 1, we're on term 2.
        assert!(!wal.ratchet_fwd_commit_index_if_valid(Index::new(2), Term::new(2)).unwrap());
        assert_eq!(wal.commit_index(), None);

        assert!(wal.ratchet_fwd_commit_index_if_valid(Index::new(3), Term::new(2)).unwrap());
        assert_eq!(wal.commit_index(), Some(Index::new(3)));

        // Never backwards, never past the log.
        assert!(!wal.ratchet_fwd_commit_index_if_valid(Index::new(1), Term::new(1)).unwrap());
        assert!(!wal.ratchet_fwd_commit_index_if_valid(Index::new(4), Term::new(2)).unwrap());
        assert_eq!(wal.commit_index(), Some(Index::new(3)));
    }

    #[test]
    fn apply_in_order_exactly_once() {
        let (mut wal, applied) = wal_with(&[1, 1, 1, 1]);

        assert!(wal.ratchet_fwd_commit_index(Index::new(2)));
        let first: Vec<_> = wal
            .apply_all_committed_entries()
            .unwrap()
            .into_iter()
            .map(|a| a.index.as_u64())
            .collect();
        assert_eq!(first, vec![1, 2]);

        // Nothing new committed, nothing applied.
        assert!(wal.apply_all_committed_entries().unwrap().is_empty());

        // Follower commit is bounded by our own log.
        assert!(wal.ratchet_fwd_commit_index(Index::new(10)));
        assert_eq!(wal.commit_index(), Some(Index::new(4)));
        let second = wal.apply_all_committed_entries().unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[1].output, StateMachineOutput::Data(Bytes::from(vec![3u8])));

        assert_eq!(*applied.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(wal.last_applied(), Some(Index::new(4)));
    }

    #[test]
    fn truncate_never_touches_committed_entries() {
        let (mut wal, _) = wal_with(&[1, 1, 2]);
        wal.ratchet_fwd_commit_index(Index::new(1));

        assert!(wal.truncate(Index::new(1)).is_err());

        wal.truncate(Index::new(2)).unwrap();
        assert_eq!(wal.latest_entry(), Some((Term::new(1), Index::new(1))));
        assert_eq!(wal.term_at(Index::new(2)).unwrap(), None);
    }

    #[test]
    fn read_batch_is_bounded() {
        let (wal, _) = wal_with(&[1, 1, 1, 2, 2]);

        assert_eq!(wal.read_batch(Index::new(2), 2).unwrap().len(), 2);
        assert_eq!(wal.read_batch(Index::new(4), 10).unwrap().len(), 2);
        assert!(wal.read_batch(Index::new(6), 10).unwrap().is_empty());
    }
}
