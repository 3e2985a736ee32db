use crate::protocol::{AppendEntriesRequest, AppendEntriesResponse, RaftMessage, VoteRequest, VoteResponse};
use crate::replica::{Member, MemberId};
use crate::serializer::Serializer;
use crate::transport::{ListenerHandle, RpcHandler, Transport, TransportError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

struct Registration {
    generation: u64,
    handler: Arc<dyn RpcHandler>,
}

#[derive(Default)]
struct NetworkState {
    handlers: HashMap<MemberId, Registration>,
    /// Directed links (from, to) that drop everything.
    blocked: HashSet<(MemberId, MemberId)>,
    next_generation: u64,
}

/// LocalNetwork connects members living in one process. Every message is pushed through the
/// serializer on the way in and out, so it sees exactly what a remote peer would.
///
/// Links can be cut per direction to simulate partitions.
#[derive(Clone)]
pub struct LocalNetwork {
    state: Arc<Mutex<NetworkState>>,
    serializer: Serializer,
}

impl LocalNetwork {
    pub fn new(serializer: Serializer) -> Self {
        LocalNetwork {
            state: Arc::new(Mutex::new(NetworkState::default())),
            serializer,
        }
    }

    /// The transport `me` uses to reach everyone else.
    pub fn transport(&self, me: MemberId) -> Arc<LocalTransport> {
        Arc::new(LocalTransport {
            me,
            network: self.clone(),
        })
    }

    pub fn block(&self, from: &MemberId, to: &MemberId) {
        self.state().blocked.insert((from.clone(), to.clone()));
    }

    pub fn unblock(&self, from: &MemberId, to: &MemberId) {
        self.state().blocked.remove(&(from.clone(), to.clone()));
    }

    /// Cut every link to and from `member`.
    pub fn isolate(&self, member: &MemberId) {
        let mut state = self.state();
        let others: Vec<MemberId> = state.handlers.keys().filter(|id| *id != member).cloned().collect();
        for other in others {
            state.blocked.insert((member.clone(), other.clone()));
            state.blocked.insert((other, member.clone()));
        }
    }

    /// Restore every link to and from `member`.
    pub fn reconnect(&self, member: &MemberId) {
        self.state().blocked.retain(|(from, to)| from != member && to != member);
    }

    pub fn heal(&self) {
        self.state().blocked.clear();
    }

    pub fn is_listening(&self, member: &MemberId) -> bool {
        self.state().handlers.contains_key(member)
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().expect("LocalNetwork mutex guard poison")
    }

    fn register(&self, member: MemberId, handler: Arc<dyn RpcHandler>) -> u64 {
        let mut state = self.state();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.handlers.insert(member, Registration { generation, handler });
        generation
    }

    fn deregister(&self, member: &MemberId, generation: u64) {
        let mut state = self.state();
        // A newer listener for the same member may have replaced ours.
        if matches!(state.handlers.get(member), Some(r) if r.generation == generation) {
            state.handlers.remove(member);
        }
    }

    fn route(&self, from: &MemberId, to: &MemberId) -> Result<Arc<dyn RpcHandler>, TransportError> {
        let state = self.state();
        if state.blocked.contains(&(from.clone(), to.clone())) {
            return Err(TransportError::Unreachable(to.clone()));
        }
        state
            .handlers
            .get(to)
            .map(|r| r.handler.clone())
            .ok_or_else(|| TransportError::Unreachable(to.clone()))
    }

    fn is_blocked(&self, from: &MemberId, to: &MemberId) -> bool {
        self.state().blocked.contains(&(from.clone(), to.clone()))
    }

    fn pass_through(&self, message: RaftMessage) -> Result<RaftMessage, TransportError> {
        let bytes = self
            .serializer
            .encode_message(message)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        self.serializer
            .decode_message(bytes)
            .map_err(|e| TransportError::Codec(e.to_string()))
    }
}

pub struct LocalTransport {
    me: MemberId,
    network: LocalNetwork,
}

impl LocalTransport {
    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    fn reply_path_open(&self, target: &MemberId) -> Result<(), TransportError> {
        if self.network.is_blocked(target, &self.me) {
            Err(TransportError::Unreachable(target.clone()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn request_vote(&self, target: &Member, request: VoteRequest) -> Result<VoteResponse, TransportError> {
        let handler = self.network.route(&self.me, &target.id)?;
        let request = match self.network.pass_through(RaftMessage::VoteRequest(request))? {
            RaftMessage::VoteRequest(request) => request,
            other => return Err(TransportError::Codec(format!("expected vote request, got {:?}", other))),
        };

        let response = handler.handle_request_vote(request).await?;
        self.reply_path_open(&target.id)?;

        match self.network.pass_through(RaftMessage::VoteResponse(response))? {
            RaftMessage::VoteResponse(response) => Ok(response),
            other => Err(TransportError::Codec(format!("expected vote response, got {:?}", other))),
        }
    }

    async fn append_entries(
        &self,
        target: &Member,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, TransportError> {
        let handler = self.network.route(&self.me, &target.id)?;
        let request = match self.network.pass_through(RaftMessage::AppendEntriesRequest(request))? {
            RaftMessage::AppendEntriesRequest(request) => request,
            other => {
                return Err(TransportError::Codec(format!(
                    "expected append entries request, got {:?}",
                    other
                )))
            }
        };

        let response = handler.handle_append_entries(request).await?;
        self.reply_path_open(&target.id)?;

        match self.network.pass_through(RaftMessage::AppendEntriesResponse(response))? {
            RaftMessage::AppendEntriesResponse(response) => Ok(response),
            other => Err(TransportError::Codec(format!(
                "expected append entries response, got {:?}",
                other
            ))),
        }
    }

    async fn listen(&self, local: &Member, handler: Arc<dyn RpcHandler>) -> Result<ListenerHandle, TransportError> {
        let member_id = local.id.clone();
        let generation = self.network.register(member_id.clone(), handler);

        let network = self.network.clone();
        Ok(ListenerHandle::spawn(move |signal| async move {
            signal.await;
            network.deregister(&member_id, generation);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::Term;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        votes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RpcHandler for CountingHandler {
        async fn handle_request_vote(&self, request: VoteRequest) -> Result<VoteResponse, TransportError> {
            self.votes.fetch_add(1, Ordering::SeqCst);
            Ok(VoteResponse {
                term: request.term(),
                granted: true,
            })
        }

        async fn handle_append_entries(
            &self,
            request: AppendEntriesRequest,
        ) -> Result<AppendEntriesResponse, TransportError> {
            Ok(AppendEntriesResponse {
                term: request.term(),
                success: true,
                index: 0,
            })
        }
    }

    fn member(id: &str) -> Member {
        Member::voting(MemberId::new(id), "127.0.0.1:0".parse().unwrap())
    }

    fn vote_request(candidate: &str) -> VoteRequest {
        VoteRequest::new(2, MemberId::new(candidate), 0, 0).unwrap()
    }

    #[tokio::test]
    async fn delivers_and_honors_blocked_links() {
        // -- setup --
        let network = LocalNetwork::new(Serializer::default());
        let a = network.transport(MemberId::new("a"));
        let b = network.transport(MemberId::new("b"));
        let handler = Arc::new(CountingHandler {
            votes: AtomicUsize::new(0),
        });
        let _listener = b.listen(&member("b"), handler.clone()).await.unwrap();

        // -- execute & verify --
        let response = a.request_vote(&member("b"), vote_request("a")).await.unwrap();
        assert_eq!(response.term, Term::new(2));
        assert!(response.granted);

        // Request path cut: handler never sees it.
        network.block(&MemberId::new("a"), &MemberId::new("b"));
        assert_eq!(
            a.request_vote(&member("b"), vote_request("a")).await,
            Err(TransportError::Unreachable(MemberId::new("b")))
        );
        assert_eq!(handler.votes.load(Ordering::SeqCst), 1);

        // Reply path cut: handler runs, caller sees a failure.
        network.heal();
        network.block(&MemberId::new("b"), &MemberId::new("a"));
        assert!(a.request_vote(&member("b"), vote_request("a")).await.is_err());
        assert_eq!(handler.votes.load(Ordering::SeqCst), 2);

        network.reconnect(&MemberId::new("b"));
        assert!(a.request_vote(&member("b"), vote_request("a")).await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_listener_only_removes_its_own_registration() {
        // -- setup --
        let network = LocalNetwork::new(Serializer::default());
        let b = network.transport(MemberId::new("b"));
        let handler = Arc::new(CountingHandler {
            votes: AtomicUsize::new(0),
        });

        // -- execute & verify --
        let first = b.listen(&member("b"), handler.clone()).await.unwrap();
        let second = b.listen(&member("b"), handler.clone()).await.unwrap();
        first.shutdown().await;
        assert!(network.is_listening(&MemberId::new("b")));

        second.shutdown().await;
        assert!(!network.is_listening(&MemberId::new("b")));

        let a = network.transport(MemberId::new("a"));
        assert_eq!(
            a.request_vote(&member("b"), vote_request("a")).await,
            Err(TransportError::Unreachable(MemberId::new("b")))
        );
    }
}
