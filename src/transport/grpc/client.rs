use crate::grpc::grpc_raft_client::GrpcRaftClient;
use crate::grpc::{proto_append_entries_result, proto_request_vote_result, ProtoAppendEntriesReq, ProtoRequestVoteReq};
use crate::protocol::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::replica::Member;
use crate::transport::TransportError;
use std::sync::Mutex;
use tonic::transport::{Channel, Endpoint};

/// PeerClient is the outbound connection to one member. The channel is opened on first use and
/// dropped after any failure, so the next call reconnects.
pub(super) struct PeerClient {
    logger: slog::Logger,
    member: Member,
    cached: Mutex<Option<GrpcRaftClient<Channel>>>,
}

impl PeerClient {
    pub(super) fn new(logger: slog::Logger, member: Member) -> Self {
        PeerClient {
            logger,
            member,
            cached: Mutex::new(None),
        }
    }

    pub(super) async fn request_vote(&self, request: VoteRequest) -> Result<VoteResponse, TransportError> {
        let mut client = self.client().await?;

        let rpc_request = ProtoRequestVoteReq::from(&request);
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_request);
        let rpc_result = client.request_vote(rpc_request).await;
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_result);

        let rpc_reply = rpc_result.map_err(|status| self.failed(status))?.into_inner();
        match rpc_reply.result {
            Some(proto_request_vote_result::Result::Ok(reply)) => Ok(reply.into()),
            Some(proto_request_vote_result::Result::Err(fault)) => Err(TransportError::ServerFault(fault.message)),
            None => Err(TransportError::Codec("RequestVote reply carries no result".into())),
        }
    }

    pub(super) async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, TransportError> {
        let mut client = self.client().await?;

        let rpc_request = ProtoAppendEntriesReq::from(request);
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_request);
        let rpc_result = client.append_entries(rpc_request).await;
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_result);

        let rpc_reply = rpc_result.map_err(|status| self.failed(status))?.into_inner();
        match rpc_reply.result {
            Some(proto_append_entries_result::Result::Ok(reply)) => Ok(reply.into()),
            Some(proto_append_entries_result::Result::Err(fault)) => Err(TransportError::ServerFault(fault.message)),
            None => Err(TransportError::Codec("AppendEntries reply carries no result".into())),
        }
    }

    pub(super) fn address(&self) -> std::net::SocketAddr {
        self.member.address
    }

    async fn client(&self) -> Result<GrpcRaftClient<Channel>, TransportError> {
        let cached = self.cached.lock().expect("PeerClient mutex guard poison").clone();
        if let Some(client) = cached {
            return Ok(client);
        }

        let url = format!("http://{}", self.member.address);
        slog::debug!(self.logger, "Connecting to {} ...", url);
        let endpoint = Endpoint::from_shared(url).map_err(|e| TransportError::RpcFailed {
            member: self.member.id.clone(),
            message: e.to_string(),
        })?;
        let channel = endpoint.connect().await.map_err(|e| {
            slog::debug!(self.logger, "Connect failed: {:?}", e);
            TransportError::Unreachable(self.member.id.clone())
        })?;

        let client = GrpcRaftClient::new(channel);
        self.cached
            .lock()
            .expect("PeerClient mutex guard poison")
            .replace(client.clone());
        Ok(client)
    }

    fn failed(&self, status: tonic::Status) -> TransportError {
        self.cached.lock().expect("PeerClient mutex guard poison").take();

        TransportError::RpcFailed {
            member: self.member.id.clone(),
            message: status.to_string(),
        }
    }
}
