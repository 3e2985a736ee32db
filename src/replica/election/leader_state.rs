use crate::commitlog::Index;
use crate::replica::election::timers::LeaderTimerHandle;
use crate::replica::MemberId;
use std::cmp;
use std::collections::HashMap;

/// Per-peer replication progress, for the lifetime of one leadership term.
pub(crate) struct LeaderStateTracker {
    peer_state: HashMap<MemberId, PeerState>,
}

impl LeaderStateTracker {
    pub(super) fn new(peer_state: HashMap<MemberId, PeerState>) -> Self {
        LeaderStateTracker { peer_state }
    }

    pub(crate) fn peer_state_mut(&mut self, peer_id: &MemberId) -> Option<&mut PeerState> {
        self.peer_state.get_mut(peer_id)
    }

    pub(crate) fn peer_ids(&self) -> Vec<MemberId> {
        self.peer_state.keys().cloned().collect()
    }

    /// Matched index of every voting peer. Passive peers don't count towards a majority.
    pub(crate) fn voting_peers_matched(&self) -> Vec<Option<Index>> {
        self.peer_state
            .values()
            .filter(|peer_state| peer_state.voting)
            .map(PeerState::matched)
            .collect()
    }
}

pub(crate) struct PeerState {
    // Held to send heartbeats for this peer
    leader_timer_handle: LeaderTimerHandle,
    voting: bool,

    // > index of the next log entry to send to that server
    // > (initialized to leader last log index + 1)
    next: Index,
    // > index of highest log entry known to be replicated on server
    // > (initialized to 0, increases monotonically)
    matched: Option<Index>,

    // SeqNo is a logical clock of this leader's interactions with the peer. Each request gets the
    // next SeqNo, and a reply is only accepted if it's newer than the last accepted one.
    last_sent_seq_no: u64,
    last_received_seq_no: u64,
}

impl PeerState {
    pub(super) fn new(leader_timer_handle: LeaderTimerHandle, voting: bool, latest_index: Option<Index>) -> Self {
        PeerState {
            leader_timer_handle,
            voting,
            next: latest_index.map(|i| i.plus(1)).unwrap_or_else(Index::start_index),
            matched: None,
            last_sent_seq_no: 0,
            last_received_seq_no: 0,
        }
    }

    pub(crate) fn next_and_previous_log_index(&self) -> (Index, Option<Index>) {
        (self.next, self.next.checked_minus(1))
    }

    pub(crate) fn matched(&self) -> Option<Index> {
        self.matched
    }

    pub(crate) fn handle_append_entries_result(
        &mut self,
        logger: &slog::Logger,
        received_seq_no: u64,
        update: PeerStateUpdate,
    ) {
        if !self.ratchet_fwd_received_seq_no(received_seq_no) {
            slog::warn!(logger, "Dropping out of date seq-no({:?}): {:?}", received_seq_no, update);
            return;
        }

        match update {
            PeerStateUpdate::OtherError => { /* No action */ }
            PeerStateUpdate::Success {
                previous_log_entry,
                num_entries_replicated,
            } => {
                self.update_log(previous_log_entry, num_entries_replicated);
            }
            PeerStateUpdate::PeerLogBehind { next_index_hint } => {
                self.rewind_log(logger, next_index_hint);
            }
        }
    }

    fn update_log(&mut self, previous_log_entry: Option<Index>, num_entries_replicated: usize) {
        // A heartbeat still proves the peer matches us up to the previous entry.
        let new_matched = match (previous_log_entry, num_entries_replicated) {
            (None, 0) => return,
            (None, n) => Index::new(n as u64),
            (Some(prev), n) => prev.plus(n as u64),
        };

        if matches!(self.matched, Some(matched) if matched >= new_matched) {
            return;
        }
        self.matched.replace(new_matched);
        self.next = cmp::max(self.next, new_matched.plus(1));
    }

    /// Move `next` back after a rejection. The peer's hint is honored as long as it stays above
    /// what we know it has matched and below where we just failed, so a bad hint degrades to
    /// stepping back one entry.
    fn rewind_log(&mut self, logger: &slog::Logger, next_index_hint: u64) {
        let floor = self.matched.map(|m| m.as_u64() + 1).unwrap_or(1);
        let ceiling = self.next.as_u64().saturating_sub(1);

        if ceiling < floor {
            slog::warn!(
                logger,
                "Can't rewind peer log below {:?}, next is {:?}. Not mutating state.",
                floor,
                self.next
            );
            return;
        }

        let new_next = next_index_hint.max(floor).min(ceiling);
        slog::info!(
            logger,
            "Rewinding peer next index {:?} -> {} (hint {})",
            self.next,
            new_next,
            next_index_hint
        );
        self.next = Index::new(new_next);
    }

    pub(crate) fn has_outstanding_request(&self) -> bool {
        self.last_received_seq_no < self.last_sent_seq_no
    }

    pub(crate) fn next_seq_no(&mut self) -> u64 {
        self.last_sent_seq_no += 1;
        self.last_sent_seq_no
    }

    /// returns true if the state was mutated.
    fn ratchet_fwd_received_seq_no(&mut self, received_seq_no: u64) -> bool {
        if self.last_received_seq_no < received_seq_no && received_seq_no <= self.last_sent_seq_no {
            self.last_received_seq_no = received_seq_no;
            true
        } else {
            false
        }
    }

    pub(crate) fn reset_heartbeat_timer(&self) {
        self.leader_timer_handle.reset_heartbeat_timer();
    }
}

#[derive(Debug)]
pub(crate) enum PeerStateUpdate {
    Success {
        previous_log_entry: Option<Index>,
        num_entries_replicated: usize,
    },
    PeerLogBehind {
        next_index_hint: u64,
    },
    OtherError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::Term;
    use std::time::Duration;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn peer_state(latest_index: u64) -> (PeerState, ActorClient) {
        let (client, _rx) = ActorClient::new(10);
        let timer = LeaderTimerHandle::spawn_timer_task(
            Duration::from_secs(60),
            client.weak(),
            MemberId::new("peer"),
            Term::new(1),
        );
        (PeerState::new(timer, true, Index::from_u64(latest_index)), client)
    }

    fn send(peer: &mut PeerState) -> u64 {
        assert!(!peer.has_outstanding_request());
        let seq_no = peer.next_seq_no();
        assert!(peer.has_outstanding_request());
        seq_no
    }

    #[tokio::test]
    async fn success_ratchets_matched_and_next() {
        // -- setup --
        let logger = logger();
        let (mut peer, _client) = peer_state(5);
        assert_eq!(peer.next_and_previous_log_index(), (Index::new(6), Some(Index::new(5))));

        // -- execute & verify --
        // Heartbeat success at prev=5 proves a match at 5.
        let seq_no = send(&mut peer);
        peer.handle_append_entries_result(
            &logger,
            seq_no,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(5)),
                num_entries_replicated: 0,
            },
        );
        assert_eq!(peer.matched(), Some(Index::new(5)));
        assert_eq!(peer.next_and_previous_log_index().0, Index::new(6));

        let seq_no = send(&mut peer);
        peer.handle_append_entries_result(
            &logger,
            seq_no,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(5)),
                num_entries_replicated: 3,
            },
        );
        assert_eq!(peer.matched(), Some(Index::new(8)));
        assert_eq!(peer.next_and_previous_log_index().0, Index::new(9));

        // Replayed reply is dropped.
        peer.handle_append_entries_result(
            &logger,
            seq_no,
            PeerStateUpdate::PeerLogBehind { next_index_hint: 1 },
        );
        assert_eq!(peer.next_and_previous_log_index().0, Index::new(9));
    }

    #[tokio::test]
    async fn rejection_follows_hint_within_bounds() {
        // -- setup --
        let logger = logger();
        let (mut peer, _client) = peer_state(10);

        // -- execute & verify --
        // Peer has only 3 entries.
        let seq_no = send(&mut peer);
        peer.handle_append_entries_result(&logger, seq_no, PeerStateUpdate::PeerLogBehind { next_index_hint: 4 });
        assert_eq!(peer.next_and_previous_log_index().0, Index::new(4));

        // A hint at or above where we just failed degrades to stepping back by one.
        let seq_no = send(&mut peer);
        peer.handle_append_entries_result(&logger, seq_no, PeerStateUpdate::PeerLogBehind { next_index_hint: 9 });
        assert_eq!(peer.next_and_previous_log_index().0, Index::new(3));

        // Never below what the peer has matched.
        let seq_no = send(&mut peer);
        peer.handle_append_entries_result(
            &logger,
            seq_no,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(1)),
                num_entries_replicated: 0,
            },
        );
        let seq_no = send(&mut peer);
        peer.handle_append_entries_result(&logger, seq_no, PeerStateUpdate::PeerLogBehind { next_index_hint: 0 });
        assert_eq!(peer.next_and_previous_log_index(), (Index::new(2), Some(Index::new(1))));
    }

    #[tokio::test]
    async fn rewind_at_start_of_log_is_a_no_op() {
        let logger = logger();
        let (mut peer, _client) = peer_state(0);

        let seq_no = send(&mut peer);
        peer.handle_append_entries_result(&logger, seq_no, PeerStateUpdate::PeerLogBehind { next_index_hint: 1 });

        assert_eq!(peer.next_and_previous_log_index(), (Index::start_index(), None));
    }
}
