use crate::api::{SubmitError, SubmitOutput};
use crate::protocol::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::replica::{
    AppendEntriesError, AppendEntriesReplyFromPeer, ElectionTimerTick, LeaderTimerTick, Replica, ReplicaExit,
    RequestVoteError, RequestVoteReplyFromPeer, SubmitInput,
};
use std::error::Error;
use std::fmt::Debug;
use tokio::sync::{mpsc, oneshot};

// Disk interaction is synchronous, on the actor's own task. The event loop is the
// only place consensus state is mutated, so nothing in the replica needs a lock.
#[derive(Debug)]
pub(crate) enum Event {
    // Leader: Write to disk, buffer the callback until the entry is applied.
    // Others: Redirect, or reject if no leader is known.
    Submit(SubmitInput, Callback<SubmitOutput, SubmitError>),

    // All: Adopt a newer term. Voting members grant the vote if applicable (includes write to disk).
    RequestVote(VoteRequest, Callback<VoteResponse, RequestVoteError>),

    // Candidate: Count the vote. Transition to leader on majority.
    // Others: discard, unless the reply carries a newer term.
    RequestVoteReplyFromPeer(RequestVoteReplyFromPeer),

    // All: Adopt a newer term and leader. Log consistency check, write to disk, commit, apply.
    AppendEntries(AppendEntriesRequest, Callback<AppendEntriesResponse, AppendEntriesError>),

    // Leader: Update replication progress of the peer. Commit and apply if a majority has the entry.
    // Others: discard, unless the reply carries a newer term.
    AppendEntriesReplyFromPeer(AppendEntriesReplyFromPeer),

    // Leader: Send AppendEntries to one peer, with entries the peer is missing (or a heartbeat).
    // Others: discard.
    LeaderTimer(LeaderTimerTick),

    // Follower, Candidate: Start a new election.
    // Others: discard. Also discarded if the tick is from a timer we've since replaced.
    ElectionTimeout(ElectionTimerTick),

    // All: Step down, stop timers and outbound calls, exit the event loop.
    Leave,
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Error>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub(crate) fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("replica event loop has exited")]
pub(crate) struct ActorExited;

/// ActorClient is the owning handle to the replica's event queue. The event loop ends once every
/// ActorClient is dropped.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

/// WeakActorClient doesn't keep the event loop alive. Background tasks (timers, outbound RPCs,
/// the inbound listener) hold this one.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);

        (ActorClient { sender: tx }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn submit(&self, input: SubmitInput) -> Result<SubmitOutput, SubmitError> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Event::Submit(input, Callback(tx))).await.is_err() {
            return Err(SubmitError::ReplicaExited);
        }

        rx.await.unwrap_or(Err(SubmitError::ReplicaExited))
    }

    pub(crate) async fn leave(&self) -> Result<(), ActorExited> {
        self.sender.send(Event::Leave).await.map_err(|_| ActorExited)
    }
}

impl WeakActorClient {
    pub(crate) async fn request_vote(&self, request: VoteRequest) -> Result<VoteResponse, RequestVoteError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::RequestVote(request, Callback(tx)))
            .await
            .map_err(|_| RequestVoteError::ActorExited)?;

        rx.await.unwrap_or(Err(RequestVoteError::ActorExited))
    }

    pub(crate) async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, AppendEntriesError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::AppendEntries(request, Callback(tx)))
            .await
            .map_err(|_| AppendEntriesError::ActorExited)?;

        rx.await.unwrap_or(Err(AppendEntriesError::ActorExited))
    }

    pub(crate) async fn notify_request_vote_reply_from_peer(
        &self,
        reply: RequestVoteReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::RequestVoteReplyFromPeer(reply)).await
    }

    pub(crate) async fn notify_append_entries_reply_from_peer(
        &self,
        reply: AppendEntriesReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::AppendEntriesReplyFromPeer(reply)).await
    }

    pub(crate) async fn leader_timer(&self, tick: LeaderTimerTick) -> Result<(), ActorExited> {
        self.send(Event::LeaderTimer(tick)).await
    }

    pub(crate) async fn election_timeout(&self, tick: ElectionTimerTick) -> Result<(), ActorExited> {
        self.send(Event::ElectionTimeout(tick)).await
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        let sender = self.sender.upgrade().ok_or(ActorExited)?;
        sender.send(event).await.map_err(|_| ActorExited)
    }
}

enum EventLoopStatus {
    Continue,
    Exit,
}

/// ReplicaActor is replica logic in actor model.
pub(crate) struct ReplicaActor {
    receiver: mpsc::Receiver<Event>,
    replica: Replica,
}

impl ReplicaActor {
    pub(crate) fn new(receiver: mpsc::Receiver<Event>, replica: Replica) -> Self {
        ReplicaActor { receiver, replica }
    }

    /// Runs until `Leave`, until every `ActorClient` is dropped, or until local storage fails.
    /// Returns what must outlive this run of the replica.
    pub(crate) async fn run_event_loop(mut self) -> ReplicaExit {
        self.replica.publish_status();

        while let Some(event) = self.receiver.recv().await {
            if let EventLoopStatus::Exit = self.handle_event(event) {
                break;
            }
        }

        // Anything still queued is dropped, which fails its callback.
        self.receiver.close();
        self.replica.shutdown()
    }

    // This must NOT be async. Any long running work must be spawned on another task and come back
    // as an event to this actor.
    fn handle_event(&mut self, event: Event) -> EventLoopStatus {
        match event {
            Event::Submit(input, callback) => {
                self.replica.handle_submit(input, callback);
            }
            Event::RequestVote(request, callback) => {
                let result = self.replica.handle_request_vote(request);
                callback.send(result);
            }
            Event::RequestVoteReplyFromPeer(reply) => {
                self.replica.handle_request_vote_reply_from_peer(reply);
            }
            Event::AppendEntries(request, callback) => {
                let result = self.replica.handle_append_entries(request);
                callback.send(result);
            }
            Event::AppendEntriesReplyFromPeer(reply) => {
                self.replica.handle_append_entries_reply_from_peer(reply);
            }
            Event::LeaderTimer(tick) => {
                self.replica.handle_leader_timer(tick);
            }
            Event::ElectionTimeout(tick) => {
                self.replica.handle_election_timeout(tick);
            }
            Event::Leave => {
                self.replica.handle_leave();
                return EventLoopStatus::Exit;
            }
        }

        if self.replica.has_faulted() {
            return EventLoopStatus::Exit;
        }

        self.replica.publish_status();
        EventLoopStatus::Continue
    }
}
