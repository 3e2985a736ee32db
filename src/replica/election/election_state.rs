use crate::actor::WeakActorClient;
use crate::api::Role;
use crate::commitlog::Index;
use crate::replica::election::timers::{ElectionTimerHandle, LeaderTimerHandle};
use crate::replica::election::{LeaderStateTracker, PeerState};
use crate::replica::{Member, MemberId, Term};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

#[derive(Clone)]
pub(crate) struct ElectionConfig {
    pub my_member_id: MemberId,
    pub leader_heartbeat_duration: Duration,
    pub election_min_timeout: Duration,
    pub election_max_timeout: Duration,
}

/// ElectionState is responsible for holding state specific to the role this server currently
/// plays. Its methods are responsible for "what" to do. It is NOT responsible for validating
/// anything specific to logs, terms, peers, etc. or knowing "when" to do something.
///
/// Every transition drops the previous role's timers, so a stale role can't fire into a new one.
pub(crate) struct ElectionState {
    state: State,
    config: ElectionConfig,
    actor_client: WeakActorClient,
    // Each election timer gets a unique id, so a tick that was already queued when we replaced
    // the timer can be recognized and dropped.
    next_timer_id: u64,
}

impl ElectionState {
    pub(crate) fn new_inactive(config: ElectionConfig, actor_client: WeakActorClient) -> Self {
        ElectionState {
            state: State::Inactive,
            config,
            actor_client,
            next_timer_id: 0,
        }
    }

    pub(crate) fn transition_to_join(&mut self) {
        self.state = State::Join;
    }

    pub(crate) fn transition_to_follower(&mut self, leader: Option<MemberId>) {
        let (election_timer, timer_id) = self.new_election_timer();
        self.state = State::Follower(FollowerState {
            leader,
            election_timer,
            timer_id,
        });
    }

    /// Passive members have no election timer. They just follow whoever leads.
    pub(crate) fn transition_to_passive(&mut self, leader: Option<MemberId>) {
        self.state = State::Passive { leader };
    }

    pub(crate) fn transition_to_candidate_and_vote_for_self(&mut self) {
        let (election_timer, timer_id) = self.new_election_timer();
        let mut cs = CandidateState {
            received_votes_from: HashSet::with_capacity(3),
            _election_timer: election_timer,
            timer_id,
        };

        // Vote for self
        cs.add_received_vote(self.config.my_member_id.clone());

        self.state = State::Candidate(cs);
    }

    pub(crate) fn transition_to_leader<'a>(
        &mut self,
        term: Term,
        peers: impl Iterator<Item = &'a Member>,
        latest_log_index: Option<Index>,
    ) {
        let mut peer_state = HashMap::new();
        for peer in peers {
            let leader_timer_handle = LeaderTimerHandle::spawn_timer_task(
                self.config.leader_heartbeat_duration,
                self.actor_client.clone(),
                peer.id.clone(),
                term,
            );
            peer_state.insert(
                peer.id.clone(),
                PeerState::new(leader_timer_handle, peer.is_voting(), latest_log_index),
            );
        }

        self.state = State::Leader(LeaderStateTracker::new(peer_state));
    }

    pub(crate) fn transition_to_leave(&mut self) {
        self.state = State::Leave;
    }

    pub(crate) fn transition_to_inactive(&mut self) {
        self.state = State::Inactive;
    }

    fn new_election_timer(&mut self) -> (ElectionTimerHandle, u64) {
        self.next_timer_id += 1;
        let timer_id = self.next_timer_id;
        let handle = ElectionTimerHandle::spawn_timer_task(
            self.config.election_min_timeout,
            self.config.election_max_timeout,
            self.actor_client.clone(),
            timer_id,
        );

        (handle, timer_id)
    }

    /// True if `timer_id` belongs to the election timer of the current follower or candidate.
    pub(crate) fn is_current_election_timer(&self, timer_id: u64) -> bool {
        match &self.state {
            State::Follower(fs) => fs.timer_id == timer_id,
            State::Candidate(cs) => cs.timer_id == timer_id,
            _ => false,
        }
    }

    pub(crate) fn role(&self) -> Role {
        match &self.state {
            State::Inactive => Role::Inactive,
            State::Join => Role::Join,
            State::Passive { .. } => Role::Passive,
            State::Follower(_) => Role::Follower,
            State::Candidate(_) => Role::Candidate,
            State::Leader(_) => Role::Leader,
            State::Leave => Role::Leave,
        }
    }

    pub(crate) fn leader_id(&self) -> Option<&MemberId> {
        match &self.state {
            State::Leader(_) => Some(&self.config.my_member_id),
            State::Follower(FollowerState { leader, .. }) | State::Passive { leader } => leader.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn reset_timeout_if_follower(&self) {
        if let State::Follower(fs) = &self.state {
            fs.election_timer.reset_timeout();
        }
    }

    pub(crate) fn set_leader_if_unknown(&mut self, new_leader: &MemberId) {
        match &mut self.state {
            State::Follower(FollowerState { leader, .. }) | State::Passive { leader } => {
                if leader.is_none() {
                    leader.replace(new_leader.clone());
                }
            }
            _ => {}
        }
    }

    /// Return number of votes received if candidate, or None if no longer Candidate.
    pub(crate) fn add_vote_if_candidate(&mut self, vote_from: MemberId) -> Option<usize> {
        if let State::Candidate(cs) = &mut self.state {
            Some(cs.add_received_vote(vote_from))
        } else {
            None
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderStateTracker> {
        if let State::Leader(tracker) = &mut self.state {
            Some(tracker)
        } else {
            None
        }
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Follower(FollowerState { leader, .. }) => write!(f, "Follower(Leader={:?})", leader),
            State::Passive { leader } => write!(f, "Passive(Leader={:?})", leader),
            State::Candidate(cs) => write!(f, "Candidate(Votes={})", cs.received_votes_from.len()),
            _ => write!(f, "{:?}", self.role()),
        }
    }
}

enum State {
    Inactive,
    Join,
    Passive { leader: Option<MemberId> },
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(LeaderStateTracker),
    Leave,
}

struct CandidateState {
    received_votes_from: HashSet<MemberId>,
    _election_timer: ElectionTimerHandle,
    timer_id: u64,
}

struct FollowerState {
    leader: Option<MemberId>,
    election_timer: ElectionTimerHandle,
    timer_id: u64,
}

impl CandidateState {
    /// `add_received_vote()` returns the number of unique votes we've received after adding the
    /// provided `vote_from`
    fn add_received_vote(&mut self, vote_from: MemberId) -> usize {
        self.received_votes_from.insert(vote_from);
        self.received_votes_from.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use std::net::SocketAddr;

    fn election_state(client: &ActorClient) -> ElectionState {
        ElectionState::new_inactive(
            ElectionConfig {
                my_member_id: MemberId::new("a"),
                leader_heartbeat_duration: Duration::from_secs(60),
                election_min_timeout: Duration::from_secs(60),
                election_max_timeout: Duration::from_secs(120),
            },
            client.weak(),
        )
    }

    #[tokio::test]
    async fn timer_ids_are_replaced_on_transition() {
        // -- setup --
        let (client, _rx) = ActorClient::new(10);
        let mut state = election_state(&client);
        assert_eq!(state.role(), Role::Inactive);

        // -- execute & verify --
        state.transition_to_join();
        assert_eq!(state.role(), Role::Join);

        state.transition_to_follower(None);
        assert!(state.is_current_election_timer(1));

        state.transition_to_candidate_and_vote_for_self();
        assert!(!state.is_current_election_timer(1));
        assert!(state.is_current_election_timer(2));
        assert_eq!(state.add_vote_if_candidate(MemberId::new("b")), Some(2));
        // Duplicate votes count once.
        assert_eq!(state.add_vote_if_candidate(MemberId::new("b")), Some(2));

        state.transition_to_leave();
        assert!(!state.is_current_election_timer(2));
        assert_eq!(state.add_vote_if_candidate(MemberId::new("c")), None);
    }

    #[tokio::test]
    async fn leader_id_per_role() {
        // -- setup --
        let (client, _rx) = ActorClient::new(10);
        let mut state = election_state(&client);
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        // -- execute & verify --
        state.transition_to_follower(None);
        assert_eq!(state.leader_id(), None);
        state.set_leader_if_unknown(&MemberId::new("b"));
        state.set_leader_if_unknown(&MemberId::new("c"));
        assert_eq!(state.leader_id(), Some(&MemberId::new("b")));

        state.transition_to_passive(Some(MemberId::new("c")));
        assert_eq!(state.role(), Role::Passive);
        assert_eq!(state.leader_id(), Some(&MemberId::new("c")));
        assert!(!state.is_current_election_timer(1));

        let peers = vec![Member::voting(MemberId::new("b"), addr)];
        state.transition_to_leader(Term::new(3), peers.iter(), None);
        assert_eq!(state.role(), Role::Leader);
        assert_eq!(state.leader_id(), Some(&MemberId::new("a")));
        assert!(state.leader_state_mut().is_some());

        state.transition_to_inactive();
        assert_eq!(state.leader_id(), None);
        assert!(state.leader_state_mut().is_none());
    }
}
