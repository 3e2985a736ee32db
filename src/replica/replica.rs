use crate::actor::{Callback, WeakActorClient};
use crate::api::{Role, ServerStatus, SubmitError, SubmitOutput};
use crate::commitlog::Index;
use crate::protocol::{AppendEntriesRequest, AppendEntriesResponse, RaftLogEntry, VoteRequest, VoteResponse};
use crate::replica::election::{ElectionConfig, ElectionState, PeerStateUpdate};
use crate::replica::local_state::{PersistentLocalState, Term};
use crate::replica::peers::{ClusterTracker, Member, MemberId};
use crate::replica::replica_api::{
    AppendEntriesError, AppendEntriesPeerOutcome, AppendEntriesReplyFromPeer, AppendEntriesReplyFromPeerDescriptor,
    AppendEntriesReplyFromPeerError, ElectionTimerTick, LeaderTimerTick, ReplicaExit, RequestVoteError,
    RequestVoteReplyFromPeer, RequestVoteResult, SubmitInput,
};
use crate::replica::write_ahead_log::WriteAheadLog;
use crate::transport::{Transport, TransportError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::{cmp, io, mem};
use tokio::sync::watch;
use tokio::time::error::Elapsed;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) struct ReplicaConfig {
    pub logger: slog::Logger,
    pub cluster_tracker: ClusterTracker,
    pub local_state: Box<dyn PersistentLocalState>,
    pub wal: WriteAheadLog,
    pub actor_client: WeakActorClient,
    pub transport: Arc<dyn Transport>,
    pub status: Arc<watch::Sender<ServerStatus>>,
    pub leader_heartbeat_duration: Duration,
    pub election_min_timeout: Duration,
    pub election_max_timeout: Duration,
    pub rpc_timeout: Duration,
    pub max_entries_per_append: usize,
}

/// Replica is the role state machine of one member. It is owned by the replica actor, so every
/// method here runs on the actor's task and none of them block on the network.
pub(crate) struct Replica {
    logger: slog::Logger,
    my_member_id: MemberId,
    cluster_tracker: ClusterTracker,
    local_state: Box<dyn PersistentLocalState>,
    election_state: ElectionState,
    wal: WriteAheadLog,
    actor_client: WeakActorClient,
    transport: Arc<dyn Transport>,
    // Cancelled when the replica leaves or stops, which abandons every in-flight outbound RPC.
    outbound_rpcs: CancellationToken,
    rpc_timeout: Duration,
    max_entries_per_append: usize,
    // Leader only. Callbacks of submitted entries, resolved once the entry is applied.
    pending_submissions: BTreeMap<Index, PendingSubmission>,
    status: Arc<watch::Sender<ServerStatus>>,
    fault: Option<String>,
}

struct PendingSubmission {
    term: Term,
    callback: Callback<SubmitOutput, SubmitError>,
}

impl Replica {
    pub(crate) fn new(config: ReplicaConfig) -> Self {
        let my_member_id = config.cluster_tracker.my_member_id().clone();
        let mut election_state = ElectionState::new_inactive(
            ElectionConfig {
                my_member_id: my_member_id.clone(),
                leader_heartbeat_duration: config.leader_heartbeat_duration,
                election_min_timeout: config.election_min_timeout,
                election_max_timeout: config.election_max_timeout,
            },
            config.actor_client.clone(),
        );
        election_state.transition_to_join();

        let replica = Replica {
            logger: config.logger,
            my_member_id,
            cluster_tracker: config.cluster_tracker,
            local_state: config.local_state,
            election_state,
            wal: config.wal,
            actor_client: config.actor_client,
            transport: config.transport,
            outbound_rpcs: CancellationToken::new(),
            rpc_timeout: config.rpc_timeout,
            max_entries_per_append: config.max_entries_per_append,
            pending_submissions: BTreeMap::new(),
            status: config.status,
            fault: None,
        };
        replica.publish_status();

        replica
    }

    /// Leave JOIN. Membership is static, so voting members become followers and passive members
    /// become passive replicas right away.
    pub(crate) fn start(&mut self) {
        if self.cluster_tracker.am_i_voting() {
            self.election_state.transition_to_follower(None);
        } else {
            self.election_state.transition_to_passive(None);
        }
        slog::info!(
            self.logger,
            "Joined cluster at term {:?}. Election state: {:?}",
            self.local_state.current_term(),
            self.election_state
        );
    }

    pub(crate) fn handle_submit(&mut self, input: SubmitInput, callback: Callback<SubmitOutput, SubmitError>) {
        // Leader check
        if self.election_state.role() != Role::Leader {
            callback.send(Err(self.not_leader_error()));
            return;
        }

        // > If command received from client: append entry to local log,
        // > respond after entry applied to state machine (§5.3)
        let term = self.local_state.current_term();
        let index = match self.wal.append(RaftLogEntry::new(term, input.data.to_vec())) {
            Ok(index) => index,
            Err(e) => {
                let e = self.fatal(e);
                callback.send(Err(SubmitError::LocalIoError(e)));
                return;
            }
        };
        slog::debug!(self.logger, "Appended client entry at {:?}", index);
        self.pending_submissions.insert(index, PendingSubmission { term, callback });

        // Don't wait for the next heartbeat. Peers with a request in flight pick the entry up when
        // their reply comes back.
        for peer_id in self.leader_peer_ids() {
            match self.replicate_to_peer(&peer_id) {
                Ok(()) | Err(HandleLeaderTimerError::PeerConcurrencyThrottle) => {}
                Err(e) => self.log_leader_timer_error(&peer_id, e),
            }
        }

        // Commits immediately if we're the only voting member.
        self.advance_leader_commit_index();
    }

    fn not_leader_error(&self) -> SubmitError {
        match self
            .election_state
            .leader_id()
            .and_then(|leader_id| self.cluster_tracker.member(leader_id))
        {
            Some(leader) => SubmitError::LeaderRedirect(leader.clone()),
            None => SubmitError::NoLeader,
        }
    }

    pub(crate) fn handle_request_vote(&mut self, request: VoteRequest) -> Result<VoteResponse, RequestVoteError> {
        let candidate_id = request.candidate().clone();

        // Ensure candidate is a known voting member. We don't adopt its term either, so a stray
        // process can't disrupt the cluster.
        if !self.cluster_tracker.is_voting_member(&candidate_id) {
            slog::warn!(
                self.logger,
                "Not granting vote. {:?} is not a voting member.",
                candidate_id
            );
            return Ok(self.vote_response(false));
        }

        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if request.term() < current_term {
            slog::info!(
                self.logger,
                "Not granting vote. {:?}'s term {:?} is out of date.",
                candidate_id,
                request.term()
            );
            return Ok(self.vote_response(false));
        }

        self.observe_term(request.term(), None)?;

        if !self.cluster_tracker.am_i_voting() {
            return Ok(self.vote_response(false));
        }

        // Read our local term/vote state as 1 atomic action.
        let (current_term, opt_voted_for) = self.local_state.voted_for_current_term();

        // 2. If votedFor is null or candidateId, and candidate’s log is at
        // least as up-to-date as receiver’s log, grant vote (§5.2, §5.4).
        if let Some(voted_for) = &opt_voted_for {
            if voted_for != &candidate_id {
                slog::info!(self.logger, "Not granting vote. We already voted for {:?}.", voted_for);
                return Ok(self.vote_response(false));
            }
        }

        if !self.is_candidate_log_gte_mine(request.last_log_entry()) {
            slog::info!(self.logger, "Not granting vote. {:?}'s log is out of date.", candidate_id);
            return Ok(self.vote_response(false));
        }

        if opt_voted_for.is_none() {
            let stored = self
                .local_state
                .store_vote_for_term_if_unvoted(current_term, candidate_id.clone())
                .map_err(|e| self.fatal(e))?;
            if !stored {
                return Ok(self.vote_response(false));
            }
        }

        slog::info!(self.logger, "Voting for {:?} in term {:?}.", candidate_id, current_term);
        self.election_state.reset_timeout_if_follower();

        Ok(VoteResponse {
            term: current_term,
            granted: true,
        })
    }

    fn vote_response(&self, granted: bool) -> VoteResponse {
        VoteResponse {
            term: self.local_state.current_term(),
            granted,
        }
    }

    fn is_candidate_log_gte_mine(&self, candidate_last_entry: Option<(Term, Index)>) -> bool {
        // > Raft determines which of two logs is more up-to-date
        // > by comparing the index and term of the last entries in the
        // > logs. If the logs have last entries with different terms, then
        // > the log with the later term is more up-to-date. If the logs
        // > end with the same term, then whichever log is longer is
        // > more up-to-date.
        candidate_last_entry >= self.wal.latest_entry()
    }

    pub(crate) fn handle_request_vote_reply_from_peer(&mut self, reply: RequestVoteReplyFromPeer) {
        if let RequestVoteResult::VoteNotGranted { peer_term } = &reply.result {
            if self.observe_term(*peer_term, None).unwrap_or(false) {
                return;
            }
        }

        let current_term = self.local_state.current_term();
        if current_term != reply.term {
            slog::info!(
                self.logger,
                "Received vote for outdated term {:?}, current term: {:?}.",
                reply.term,
                current_term,
            );
            return;
        }

        match reply.result {
            RequestVoteResult::VoteGranted => {
                let num_votes_received = match self.election_state.add_vote_if_candidate(reply.peer_id) {
                    Some(v) => v,
                    None => {
                        slog::info!(
                            self.logger,
                            "Received vote for term {:?} after transitioning to a election state: {:?}",
                            reply.term,
                            self.election_state,
                        );
                        return;
                    }
                };

                let num_voting_members = self.cluster_tracker.num_voting_members();
                slog::info!(
                    self.logger,
                    "Received {}/{} votes for term {:?}",
                    num_votes_received,
                    num_voting_members,
                    reply.term,
                );

                if num_votes_received >= Self::get_majority_vote_count(num_voting_members) {
                    self.become_leader(reply.term);
                }
            }
            RequestVoteResult::VoteNotGranted { .. } => {
                slog::info!(
                    self.logger,
                    "Vote not granted from {:?} for term {:?}",
                    reply.peer_id,
                    reply.term,
                );
            }
            RequestVoteResult::RetryableFailure(message) => {
                // Not retried. If we don't win this round, the next election timeout starts another.
                slog::warn!(
                    self.logger,
                    "RequestVote to {:?} failed for term {:?}: {}",
                    reply.peer_id,
                    reply.term,
                    message
                );
            }
        }
    }

    fn get_majority_vote_count(num_voting_members: usize) -> usize {
        (num_voting_members / 2) + 1
    }

    fn become_leader(&mut self, term: Term) {
        self.election_state
            .transition_to_leader(term, self.cluster_tracker.peers(), self.wal.latest_index());
        slog::info!(self.logger, "Won election for term {:?}. Now leader.", term);

        // Assert leadership right away instead of waiting for the first heartbeat tick.
        for peer_id in self.leader_peer_ids() {
            if let Err(e) = self.replicate_to_peer(&peer_id) {
                self.log_leader_timer_error(&peer_id, e);
            }
        }
    }

    pub(crate) fn handle_append_entries(
        &mut self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, AppendEntriesError> {
        // Ensure leader is known voting member.
        let leader_id = request.leader().clone();
        if !self.cluster_tracker.is_voting_member(&leader_id) {
            return Err(AppendEntriesError::LeaderNotInCluster(leader_id));
        }

        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if request.term() < current_term {
            slog::info!(
                self.logger,
                "Rejecting AppendEntries from {:?}. Its term {:?} is out of date.",
                leader_id,
                request.term()
            );
            return Ok(AppendEntriesResponse::stale_term(current_term));
        }

        let increased = self.observe_term(request.term(), Some(leader_id.clone()))?;
        if !increased {
            match self.election_state.role() {
                Role::Candidate => {
                    self.become_follower(Some(leader_id.clone()));
                    slog::info!(
                        self.logger,
                        "Lost election for term {:?} to {:?}.",
                        current_term,
                        leader_id
                    );
                }
                Role::Leader => {
                    slog::error!(
                        self.logger,
                        "{:?} claims to lead term {:?}, but we do. Rejecting.",
                        leader_id,
                        current_term
                    );
                    return Ok(AppendEntriesResponse::stale_term(current_term));
                }
                _ => self.election_state.set_leader_if_unknown(&leader_id),
            }
        }
        let current_term = request.term();

        // Reset follower timeout.
        self.election_state.reset_timeout_if_follower();

        // 2. Reply false if [my] log doesn't contain an entry at [leader's]
        // prevLogIndex whose term matches [leader's] prevLogTerm (§5.3)
        if let Some((leader_prev_entry_term, leader_prev_entry_index)) = request.previous_log_entry() {
            match self.wal.term_at(leader_prev_entry_index).map_err(|e| self.fatal(e))? {
                Some(my_term) if my_term == leader_prev_entry_term => {}
                Some(my_term) => {
                    let hint = self
                        .conflict_hint(leader_prev_entry_index, my_term)
                        .map_err(|e| self.fatal(e))?;
                    slog::info!(
                        self.logger,
                        "Log conflict at {:?} (mine {:?}, leader {:?}). Suggesting {:?}.",
                        leader_prev_entry_index,
                        my_term,
                        leader_prev_entry_term,
                        hint
                    );
                    return Ok(AppendEntriesResponse::rejected(current_term, hint));
                }
                None => {
                    let hint = self
                        .wal
                        .latest_index()
                        .map(|latest| latest.plus(1))
                        .unwrap_or_else(Index::start_index);
                    slog::info!(
                        self.logger,
                        "Missing entry {:?}. Suggesting {:?}.",
                        leader_prev_entry_index,
                        hint
                    );
                    return Ok(AppendEntriesResponse::rejected(current_term, hint));
                }
            }
        }

        let previous_index = request.previous_log_index();
        let num_new_entries = request.entries().len() as u64;
        let leader_commit = request.leader_commit_index();

        // 3. If [my] existing entry conflicts with [leader's new entries]
        // (same index but different terms), delete [my] existing entry and
        // all that follow it (§5.3)
        // 4. Append any new entries not already in the log
        let mut next_entry_index = Index::new(previous_index + 1);
        for new_entry in request.into_entries() {
            match self.wal.term_at(next_entry_index).map_err(|e| self.fatal(e))? {
                // 4. (no-op)
                Some(existing_term) if existing_term == new_entry.term() => {
                    next_entry_index = next_entry_index.plus(1);
                    continue;
                }
                // 3. (delete)
                Some(_) => self.wal.truncate(next_entry_index).map_err(|e| self.fatal(e))?,
                None => {}
            }

            // 4. (append)
            let appended_index = self.wal.append(new_entry).map_err(|e| self.fatal(e))?;
            if appended_index != next_entry_index {
                let e = io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "appended log entry at {:?}, expected {:?}",
                        appended_index, next_entry_index
                    ),
                );
                return Err(self.fatal(e).into());
            }
            next_entry_index = next_entry_index.plus(1);
        }

        // 5. If leaderCommit > commitIndex, set commitIndex = min(leaderCommit, index of last new entry)
        let index_of_last_new_entry = Index::from_u64(previous_index + num_new_entries);
        if let (Some(leader_commit), Some(last_new)) = (leader_commit, index_of_last_new_entry) {
            self.wal.ratchet_fwd_commit_index(cmp::min(leader_commit, last_new));
        }

        // > If commitIndex > lastApplied: increment lastApplied, apply
        // > log[lastApplied] to state machine (§5.3)
        self.apply_committed_entries()?;

        Ok(AppendEntriesResponse::accepted(current_term, index_of_last_new_entry))
    }

    /// Where the leader should resume after our entry at `conflict_index` turned out to have the
    /// wrong term: the first entry we hold of that term, so the whole term is skipped in one round
    /// trip. Never at or below our commit index.
    fn conflict_hint(&self, conflict_index: Index, conflict_term: Term) -> Result<Index, io::Error> {
        let floor = self
            .wal
            .commit_index()
            .map(|ci| ci.plus(1))
            .unwrap_or_else(Index::start_index);

        let mut first_of_term = conflict_index;
        while first_of_term > floor {
            let previous = match first_of_term.checked_minus(1) {
                Some(previous) => previous,
                None => break,
            };
            if self.wal.term_at(previous)? != Some(conflict_term) {
                break;
            }
            first_of_term = previous;
        }

        Ok(first_of_term)
    }

    pub(crate) fn handle_append_entries_reply_from_peer(&mut self, reply: AppendEntriesReplyFromPeer) {
        let logger = self.logger.new(slog::o!(
            "Peer" => reply.descriptor.peer_id.to_string(),
            "SeqNo" => reply.descriptor.seq_no
        ));
        slog::debug!(logger, "AE reply from peer result: {:?}", reply.result);

        let current_term = self.local_state.current_term();
        if current_term != reply.descriptor.term {
            slog::info!(
                logger,
                "Received AE reply for outdated term {:?}, but we're on term {:?}",
                reply.descriptor.term,
                current_term
            );
            return;
        }

        // 1. Check for stale term rejection
        let peer_log_update = match reply.result {
            Err(AppendEntriesReplyFromPeerError::StaleTerm { new_term }) => {
                slog::warn!(logger, "Rejected by peer because my term is stale.");
                match self.observe_term(new_term, None) {
                    Ok(true) | Err(_) => return,
                    Ok(false) => {
                        slog::warn!(
                            logger,
                            "Peer reported stale term without a newer one. Treating as generic failure."
                        );
                        PeerStateUpdate::OtherError
                    }
                }
            }
            Err(AppendEntriesReplyFromPeerError::RetryableFailure(err_msg)) => {
                slog::warn!(logger, "AE failure: {}", err_msg);
                PeerStateUpdate::OtherError
            }
            Ok(AppendEntriesPeerOutcome::Rejected { next_index_hint }) => {
                slog::info!(logger, "Peer log doesn't match ours. Hint: {}", next_index_hint);
                PeerStateUpdate::PeerLogBehind { next_index_hint }
            }
            Ok(AppendEntriesPeerOutcome::Accepted) => PeerStateUpdate::Success {
                previous_log_entry: reply.descriptor.previous_log_entry_index,
                num_entries_replicated: reply.descriptor.num_log_entries,
            },
        };
        let retry_now = !matches!(peer_log_update, PeerStateUpdate::OtherError);

        // 2. Update peer log tracker
        let peer_id = reply.descriptor.peer_id;
        let next_index = match self.election_state.leader_state_mut() {
            None => {
                slog::info!(logger, "No longer leader");
                return;
            }
            Some(leader_state) => match leader_state.peer_state_mut(&peer_id) {
                None => {
                    slog::warn!(logger, "Peer {:?} not found while handling AE reply", peer_id);
                    return;
                }
                Some(peer_state) => {
                    peer_state.handle_append_entries_result(&logger, reply.descriptor.seq_no, peer_log_update);
                    peer_state.next_and_previous_log_index().0
                }
            },
        };

        // 3. Check for majority replication and apply new commits.
        self.advance_leader_commit_index();

        // 4. Keep going while the peer is behind.
        // > If last log index ≥ nextIndex for a follower: send
        // > AppendEntries RPC with log entries starting at nextIndex
        let peer_is_behind = matches!(self.wal.latest_index(), Some(latest) if latest >= next_index);
        if retry_now && peer_is_behind {
            if let Err(e) = self.replicate_to_peer(&peer_id) {
                self.log_leader_timer_error(&peer_id, e);
            }
        }
    }

    /// > If there exists an N such that N > commitIndex, a majority
    /// > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
    /// > set commitIndex = N (§5.3, §5.4).
    ///
    /// See also:
    /// > Figure 8: A time sequence showing why a leader cannot determine
    /// > commitment using log entries from older terms.
    fn advance_leader_commit_index(&mut self) {
        let current_term = self.local_state.current_term();
        let mut matched = match self.election_state.leader_state_mut() {
            Some(leader_state) => leader_state.voting_peers_matched(),
            None => return,
        };
        matched.push(self.wal.latest_index());

        let tentative_new_commit_index = match Self::get_cluster_commit_index(matched) {
            Some(index) => index,
            None => return,
        };

        match self
            .wal
            .ratchet_fwd_commit_index_if_valid(tentative_new_commit_index, current_term)
        {
            Ok(true) => {
                // A failed apply has already stopped the replica.
                if self.apply_committed_entries().is_err() {
                    return;
                }
            }
            Ok(false) => {}
            Err(e) => {
                self.fatal(e);
            }
        }
    }

    /// `matched` holds one element per voting member, the leader included. Returns the highest
    /// index a majority of them have.
    fn get_cluster_commit_index(mut matched: Vec<Option<Index>>) -> Option<Index> {
        if matched.is_empty() {
            return None;
        }
        matched.sort();

        // The element at `i` (ascending) is held by `len - i` members. The largest `i` that still
        // leaves a majority is `(len - 1) / 2`. When in doubt, just read the unit tests.
        let quorum_idx = (matched.len() - 1) / 2;
        matched[quorum_idx]
    }

    fn apply_committed_entries(&mut self) -> Result<(), io::Error> {
        let applied_entries = self.wal.apply_all_committed_entries().map_err(|e| self.fatal(e))?;

        for applied in applied_entries {
            if let Some(pending) = self.pending_submissions.remove(&applied.index) {
                // Our entry was replaced by another leader's at the same index.
                if pending.term != applied.term {
                    pending.callback.send(Err(SubmitError::LeadershipLost));
                    continue;
                }
                pending.callback.send(Ok(SubmitOutput {
                    index: applied.index.as_u64(),
                    term: applied.term.as_u64(),
                    output: applied.output,
                }));
            }
        }

        Ok(())
    }

    pub(crate) fn handle_leader_timer(&mut self, tick: LeaderTimerTick) {
        let current_term = self.local_state.current_term();
        if current_term != tick.term {
            slog::warn!(
                self.logger,
                "Received leader heartbeat for outdated term {:?}, current term: {:?}",
                tick.term,
                current_term
            );
            return;
        }

        if let Err(e) = self.replicate_to_peer(&tick.peer_id) {
            self.log_leader_timer_error(&tick.peer_id, e);
        }
    }

    fn leader_peer_ids(&mut self) -> Vec<MemberId> {
        self.election_state
            .leader_state_mut()
            .map(|leader_state| leader_state.peer_ids())
            .unwrap_or_default()
    }

    fn replicate_to_peer(&mut self, peer_id: &MemberId) -> Result<(), HandleLeaderTimerError> {
        let current_term = self.local_state.current_term();
        let peer = match self.cluster_tracker.member(peer_id) {
            Some(peer) => peer.clone(),
            None => return Err(HandleLeaderTimerError::UnknownPeer),
        };

        let leader_state = self
            .election_state
            .leader_state_mut()
            .ok_or(HandleLeaderTimerError::NoLongerLeader)?;
        let peer_state = match leader_state.peer_state_mut(peer_id) {
            Some(ps) => ps,
            None => {
                return Err(HandleLeaderTimerError::LeaderStateMissingPeer {
                    leader_state_tracker_peers: leader_state.peer_ids(),
                })
            }
        };

        let (request, descriptor) = leader_timer_handler::new_append_entries_request(
            current_term,
            self.my_member_id.clone(),
            peer_id.clone(),
            peer_state,
            &self.wal,
            self.max_entries_per_append,
        )?;

        tokio::task::spawn(Self::call_peer_append_entries(
            self.logger.new(slog::o!(
                "Peer" => peer_id.to_string(),
                "SeqNo" => descriptor.seq_no
            )),
            self.transport.clone(),
            peer,
            request,
            self.rpc_timeout,
            self.actor_client.clone(),
            descriptor,
            self.outbound_rpcs.clone(),
        ));

        peer_state.reset_heartbeat_timer();

        Ok(())
    }

    fn log_leader_timer_error(&mut self, peer_id: &MemberId, error: HandleLeaderTimerError) {
        match error {
            HandleLeaderTimerError::NoLongerLeader => {
                slog::info!(self.logger, "Received leader timer event but no longer leader.")
            }
            HandleLeaderTimerError::PeerConcurrencyThrottle => {
                slog::debug!(self.logger, "Request to peer {:?} still outstanding", peer_id)
            }
            HandleLeaderTimerError::UnknownPeer => {
                slog::error!(self.logger, "Missing Peer {:?} in ClusterTracker", peer_id)
            }
            HandleLeaderTimerError::DiskRead(index, ioe) => {
                slog::error!(self.logger, "Failed to read log entry at index {:?}", index);
                self.fatal(ioe);
            }
            HandleLeaderTimerError::UnexpectedMissingLogEntry(index) => {
                let ioe = io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("leader is tracking index {:?}, but the entry is missing from the log", index),
                );
                self.fatal(ioe);
            }
            HandleLeaderTimerError::LeaderStateMissingPeer {
                leader_state_tracker_peers,
            } => {
                slog::error!(
                    self.logger,
                    "Peer {:?} is present in ClusterTracker but missing in LeaderStateTracker. LeaderStateTracker peers: {:?}",
                    peer_id,
                    leader_state_tracker_peers,
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn call_peer_append_entries(
        logger: slog::Logger,
        transport: Arc<dyn Transport>,
        peer: Member,
        request: AppendEntriesRequest,
        rpc_timeout: Duration,
        callback: WeakActorClient,
        descriptor: AppendEntriesReplyFromPeerDescriptor,
        cancelled: CancellationToken,
    ) {
        // Checked first, so a task first polled after close never reaches the peer.
        let rpc_reply = tokio::select! {
            biased;
            _ = cancelled.cancelled() => return,
            reply = tokio::time::timeout(rpc_timeout, transport.append_entries(&peer, request)) => reply,
        };

        let callback_input = AppendEntriesReplyFromPeer {
            result: Self::convert_append_entries_rpc_reply(descriptor.term, rpc_reply),
            descriptor,
        };

        if callback
            .notify_append_entries_reply_from_peer(callback_input)
            .await
            .is_err()
        {
            slog::debug!(logger, "Replica exited before AE reply was delivered");
        }
    }

    fn convert_append_entries_rpc_reply(
        request_term: Term,
        rpc_reply: Result<Result<AppendEntriesResponse, TransportError>, Elapsed>,
    ) -> Result<AppendEntriesPeerOutcome, AppendEntriesReplyFromPeerError> {
        match rpc_reply {
            Ok(Ok(response)) if response.success => Ok(AppendEntriesPeerOutcome::Accepted),
            Ok(Ok(response)) if response.term > request_term => Err(AppendEntriesReplyFromPeerError::StaleTerm {
                new_term: response.term,
            }),
            Ok(Ok(response)) => Ok(AppendEntriesPeerOutcome::Rejected {
                next_index_hint: response.index,
            }),
            Ok(Err(transport_error)) => Err(AppendEntriesReplyFromPeerError::RetryableFailure(
                transport_error.to_string(),
            )),
            Err(_timeout) => Err(AppendEntriesReplyFromPeerError::RetryableFailure(
                "Timed out calling AppendEntries".into(),
            )),
        }
    }

    pub(crate) fn handle_election_timeout(&mut self, tick: ElectionTimerTick) {
        if !self.election_state.is_current_election_timer(tick.timer_id) {
            slog::debug!(
                self.logger,
                "Dropping stale election timeout {}. Election state: {:?}",
                tick.timer_id,
                self.election_state
            );
            return;
        }

        // Write-ahead log style: Vote for self on local state before transitioning to candidate.
        let new_term = match self.local_state.increment_term_and_vote_for_self(&self.my_member_id) {
            Ok(term) => term,
            Err(e) => {
                self.fatal(e);
                return;
            }
        };
        self.election_state.transition_to_candidate_and_vote_for_self();
        slog::info!(
            self.logger,
            "Election timed out. Changed to candidate for term {:?}. Election state: {:?}",
            new_term,
            self.election_state,
        );

        // Our own vote may already be a majority.
        if Self::get_majority_vote_count(self.cluster_tracker.num_voting_members()) <= 1 {
            self.become_leader(new_term);
            return;
        }

        let request = VoteRequest::from_parts(new_term, self.my_member_id.clone(), self.wal.latest_entry());
        for peer in self.cluster_tracker.voting_peers() {
            tokio::task::spawn(Self::call_peer_request_vote(
                self.logger.new(slog::o!("Peer" => peer.id.to_string())),
                self.transport.clone(),
                peer.clone(),
                request.clone(),
                self.rpc_timeout,
                self.actor_client.clone(),
                self.outbound_rpcs.clone(),
            ));
        }
    }

    async fn call_peer_request_vote(
        logger: slog::Logger,
        transport: Arc<dyn Transport>,
        peer: Member,
        request: VoteRequest,
        rpc_timeout: Duration,
        callback: WeakActorClient,
        cancelled: CancellationToken,
    ) {
        let term = request.term();
        // Checked first, so a task first polled after close never reaches the peer.
        let rpc_reply = tokio::select! {
            biased;
            _ = cancelled.cancelled() => return,
            reply = tokio::time::timeout(rpc_timeout, transport.request_vote(&peer, request)) => reply,
        };

        let result = match rpc_reply {
            Ok(Ok(response)) if response.granted => RequestVoteResult::VoteGranted,
            Ok(Ok(response)) => RequestVoteResult::VoteNotGranted {
                peer_term: response.term,
            },
            Ok(Err(transport_error)) => RequestVoteResult::RetryableFailure(transport_error.to_string()),
            Err(_timeout) => RequestVoteResult::RetryableFailure("Timed out calling RequestVote".into()),
        };

        let callback_input = RequestVoteReplyFromPeer {
            peer_id: peer.id,
            term,
            result,
        };

        if callback
            .notify_request_vote_reply_from_peer(callback_input)
            .await
            .is_err()
        {
            slog::debug!(logger, "Replica exited before vote reply was delivered");
        }
    }

    pub(crate) fn handle_leave(&mut self) {
        slog::info!(self.logger, "Leaving cluster. Election state: {:?}", self.election_state);

        // Membership is static, so a leader steps down and lets the others elect a new one.
        if self.election_state.role() == Role::Leader {
            self.fail_pending_submissions(|| SubmitError::LeadershipLost);
        }
        self.election_state.transition_to_leave();
        self.outbound_rpcs.cancel();
        self.publish_status();
    }

    /// > If RPC request or response contains term T > currentTerm:
    /// > set currentTerm = T, convert to follower (§5.1)
    ///
    /// Returns true if the term increased.
    fn observe_term(&mut self, term: Term, leader: Option<MemberId>) -> Result<bool, io::Error> {
        let increased = self
            .local_state
            .store_term_if_increased(term)
            .map_err(|e| self.fatal(e))?;
        if increased {
            self.become_follower(leader);
            slog::info!(
                self.logger,
                "Observed newer term {:?}. Election state: {:?}",
                term,
                self.election_state
            );
        }

        Ok(increased)
    }

    fn become_follower(&mut self, leader: Option<MemberId>) {
        if self.election_state.role() == Role::Leader {
            self.fail_pending_submissions(|| SubmitError::LeadershipLost);
        }

        if self.cluster_tracker.am_i_voting() {
            self.election_state.transition_to_follower(leader);
        } else {
            self.election_state.transition_to_passive(leader);
        }
    }

    fn fail_pending_submissions(&mut self, error: impl Fn() -> SubmitError) {
        for (_, pending) in mem::take(&mut self.pending_submissions) {
            pending.callback.send(Err(error()));
        }
    }

    /// Storage can't be trusted anymore. Record the fault so the event loop stops.
    fn fatal(&mut self, e: io::Error) -> io::Error {
        slog::crit!(self.logger, "Local storage failure, stopping replica: {}", e);
        if self.fault.is_none() {
            self.fault.replace(e.to_string());
        }
        e
    }

    pub(crate) fn has_faulted(&self) -> bool {
        self.fault.is_some()
    }

    fn current_status(&self) -> ServerStatus {
        ServerStatus {
            role: self.election_state.role(),
            term: self.local_state.current_term().as_u64(),
            leader: self.election_state.leader_id().cloned(),
            commit_index: self.wal.commit_index().map(|i| i.as_u64()).unwrap_or(0),
            last_applied: self.wal.last_applied().map(|i| i.as_u64()).unwrap_or(0),
            fault: self.fault.clone(),
        }
    }

    /// Publish the current status, if anything changed since the last publish.
    pub(crate) fn publish_status(&self) {
        let status = self.current_status();
        self.status.send_if_modified(|published| {
            if *published == status {
                false
            } else {
                *published = status;
                true
            }
        });
    }

    /// Stop every timer and outbound call, and hand back what outlives this run.
    pub(crate) fn shutdown(mut self) -> ReplicaExit {
        self.outbound_rpcs.cancel();
        self.election_state.transition_to_inactive();
        self.fail_pending_submissions(|| SubmitError::ReplicaExited);

        let term = self.local_state.current_term();
        let last_applied = self.wal.last_applied().map(|i| i.as_u64()).unwrap_or(0);
        self.status
            .send_replace(ServerStatus::inactive(term.as_u64(), last_applied, self.fault.clone()));
        slog::info!(self.logger, "Replica stopped at term {:?}", term);

        ReplicaExit {
            dormant: self.wal.into_dormant(),
            term,
            fault: self.fault,
        }
    }
}

enum HandleLeaderTimerError {
    NoLongerLeader,
    PeerConcurrencyThrottle,
    UnknownPeer,
    DiskRead(Index, io::Error),
    UnexpectedMissingLogEntry(Index),
    LeaderStateMissingPeer { leader_state_tracker_peers: Vec<MemberId> },
}

mod leader_timer_handler {
    use crate::protocol::AppendEntriesRequest;
    use crate::replica::election::PeerState;
    use crate::replica::replica::HandleLeaderTimerError;
    use crate::replica::replica_api::AppendEntriesReplyFromPeerDescriptor;
    use crate::replica::write_ahead_log::WriteAheadLog;
    use crate::replica::{MemberId, Term};

    pub(super) fn new_append_entries_request(
        current_term: Term,
        my_id: MemberId,
        peer_id: MemberId,
        peer_state: &mut PeerState,
        wal: &WriteAheadLog,
        max_entries: usize,
    ) -> Result<(AppendEntriesRequest, AppendEntriesReplyFromPeerDescriptor), HandleLeaderTimerError> {
        // Simplicity vs throughput tradeoff. We're just going to allow 1 outstanding request per
        // peer; no pipelining. Entries are still batched.
        if peer_state.has_outstanding_request() {
            return Err(HandleLeaderTimerError::PeerConcurrencyThrottle);
        }

        let (next_index, opt_previous_index) = peer_state.next_and_previous_log_index();
        let opt_previous_log_entry = match opt_previous_index {
            None => None,
            Some(previous_index) => match wal.term_at(previous_index) {
                Ok(Some(term)) => Some((term, previous_index)),
                Ok(None) => return Err(HandleLeaderTimerError::UnexpectedMissingLogEntry(previous_index)),
                Err(e) => return Err(HandleLeaderTimerError::DiskRead(previous_index, e)),
            },
        };

        let new_entries = wal
            .read_batch(next_index, max_entries)
            .map_err(|e| HandleLeaderTimerError::DiskRead(next_index, e))?;

        // Only take a SeqNo once the request is certain to go out.
        let seq_no = peer_state.next_seq_no();
        let descriptor = AppendEntriesReplyFromPeerDescriptor {
            peer_id,
            term: current_term,
            seq_no,
            previous_log_entry_index: opt_previous_index,
            num_log_entries: new_entries.len(),
        };

        let request = AppendEntriesRequest::from_parts(
            current_term,
            my_id,
            opt_previous_log_entry,
            new_entries,
            wal.commit_index(),
        );

        Ok((request, descriptor))
    }
}
