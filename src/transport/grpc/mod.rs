mod client;
mod server;

use crate::protocol::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::replica::{Member, MemberId};
use crate::transport::{ListenerHandle, RpcHandler, Transport, TransportError};
use client::PeerClient;
use server::InboundService;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// GrpcTransport talks to other members over gRPC, reaching each at its `Member::address`.
pub struct GrpcTransport {
    logger: slog::Logger,
    peers: Mutex<HashMap<MemberId, Arc<PeerClient>>>,
}

impl GrpcTransport {
    pub fn new(logger: slog::Logger) -> Self {
        GrpcTransport {
            logger,
            peers: Mutex::new(HashMap::new()),
        }
    }

    fn peer(&self, member: &Member) -> Arc<PeerClient> {
        let mut peers = self.peers.lock().expect("GrpcTransport mutex guard poison");

        if let Some(client) = peers.get(&member.id) {
            if client.address() == member.address {
                return client.clone();
            }
        }

        let logger = self.logger.new(slog::o!("Peer" => member.id.to_string()));
        let client = Arc::new(PeerClient::new(logger, member.clone()));
        peers.insert(member.id.clone(), client.clone());
        client
    }
}

#[async_trait::async_trait]
impl Transport for GrpcTransport {
    async fn request_vote(&self, target: &Member, request: VoteRequest) -> Result<VoteResponse, TransportError> {
        self.peer(target).request_vote(request).await
    }

    async fn append_entries(
        &self,
        target: &Member,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, TransportError> {
        self.peer(target).append_entries(request).await
    }

    async fn listen(&self, local: &Member, handler: Arc<dyn RpcHandler>) -> Result<ListenerHandle, TransportError> {
        let address = local.address;

        // Surface "address in use" to the caller now, rather than from inside the server task.
        let reserved = TcpListener::bind(address).await.map_err(|e| TransportError::Listen {
            address,
            message: e.to_string(),
        })?;
        drop(reserved);

        let service = InboundService::new(self.logger.clone(), handler);
        Ok(ListenerHandle::spawn(move |signal| service.serve(address, signal)))
    }
}
