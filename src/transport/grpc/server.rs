use crate::grpc::grpc_raft_server::{GrpcRaft, GrpcRaftServer};
use crate::grpc::{
    proto_append_entries_result, proto_request_vote_result, ProtoAppendEntriesReq, ProtoAppendEntriesResult,
    ProtoRequestVoteReq, ProtoRequestVoteResult, ProtoServerFault,
};
use crate::protocol::{AppendEntriesRequest, VoteRequest};
use crate::transport::{RpcHandler, ShutdownSignal};
use std::convert::TryFrom;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Adapts the generated gRPC service onto an `RpcHandler`. Malformed messages are refused with
/// `InvalidArgument` and never reach the handler. Handler errors travel inside the reply.
pub(super) struct InboundService {
    logger: slog::Logger,
    handler: Arc<dyn RpcHandler>,
}

fn malformed<E: Display>(e: E) -> Status {
    Status::invalid_argument(format!("malformed request: {}", e))
}

fn fault<E: Display>(e: E) -> ProtoServerFault {
    ProtoServerFault { message: e.to_string() }
}

impl InboundService {
    pub(super) fn new(logger: slog::Logger, handler: Arc<dyn RpcHandler>) -> Self {
        InboundService { logger, handler }
    }

    /// Serves until the signal fires or the server fails.
    pub(super) async fn serve(self, address: SocketAddr, signal: ShutdownSignal) {
        let logger = self.logger.clone();
        slog::info!(logger, "gRPC listener starting"; "Address" => address.to_string());

        let outcome = tonic::transport::Server::builder()
            .add_service(GrpcRaftServer::new(self))
            .serve_with_shutdown(address, signal)
            .await;

        if let Err(e) = outcome {
            slog::error!(logger, "gRPC listener failed: {}", e; "Address" => address.to_string());
        } else {
            slog::info!(logger, "gRPC listener stopped"; "Address" => address.to_string());
        }
    }
}

#[async_trait::async_trait]
impl GrpcRaft for InboundService {
    async fn request_vote(
        &self,
        request: Request<ProtoRequestVoteReq>,
    ) -> Result<Response<ProtoRequestVoteResult>, Status> {
        let proto = request.into_inner();
        slog::debug!(self.logger, "ServerWire - RequestVote {:?}", proto);

        let vote_request = VoteRequest::try_from(proto).map_err(malformed)?;
        let result = self
            .handler
            .handle_request_vote(vote_request)
            .await
            .map_or_else(|e| proto_request_vote_result::Result::Err(fault(e)), |r| {
                proto_request_vote_result::Result::Ok(r.into())
            });

        Ok(Response::new(ProtoRequestVoteResult { result: Some(result) }))
    }

    async fn append_entries(
        &self,
        request: Request<ProtoAppendEntriesReq>,
    ) -> Result<Response<ProtoAppendEntriesResult>, Status> {
        let proto = request.into_inner();
        slog::debug!(self.logger, "ServerWire - AppendEntries {:?}", proto);

        let append_request = AppendEntriesRequest::try_from(proto).map_err(malformed)?;
        let result = self
            .handler
            .handle_append_entries(append_request)
            .await
            .map_or_else(|e| proto_append_entries_result::Result::Err(fault(e)), |r| {
                proto_append_entries_result::Result::Ok(r.into())
            });

        Ok(Response::new(ProtoAppendEntriesResult { result: Some(result) }))
    }
}
