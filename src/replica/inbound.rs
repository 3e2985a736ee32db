use crate::actor::WeakActorClient;
use crate::protocol::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::replica::replica_api::{AppendEntriesError, RequestVoteError};
use crate::transport::{RpcHandler, TransportError};

/// InboundRpcHandler forwards RPCs received by the transport into the replica's event queue.
pub(crate) struct InboundRpcHandler {
    logger: slog::Logger,
    local_replica: WeakActorClient,
}

impl InboundRpcHandler {
    pub(crate) fn new(logger: slog::Logger, local_replica: WeakActorClient) -> Self {
        InboundRpcHandler { logger, local_replica }
    }

    fn convert_request_vote_error(&self, error: RequestVoteError) -> TransportError {
        slog::warn!(self.logger, "Failed to handle RequestVote: {}", error);
        match error {
            RequestVoteError::LocalIoError(_) => TransportError::ServerFault("local storage failure".into()),
            RequestVoteError::ActorExited => TransportError::ServerFault("replica is not running".into()),
        }
    }

    fn convert_append_entries_error(&self, error: AppendEntriesError) -> TransportError {
        slog::warn!(self.logger, "Failed to handle AppendEntries: {}", error);
        match error {
            // Retry in case we're out of date. Not expecting this in practice.
            AppendEntriesError::LeaderNotInCluster(leader) => {
                TransportError::ServerFault(format!("{} is not a voting member of this cluster", leader))
            }
            AppendEntriesError::LocalIoError(_) => TransportError::ServerFault("local storage failure".into()),
            AppendEntriesError::ActorExited => TransportError::ServerFault("replica is not running".into()),
        }
    }
}

#[async_trait::async_trait]
impl RpcHandler for InboundRpcHandler {
    async fn handle_request_vote(&self, request: VoteRequest) -> Result<VoteResponse, TransportError> {
        self.local_replica
            .request_vote(request)
            .await
            .map_err(|e| self.convert_request_vote_error(e))
    }

    async fn handle_append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, TransportError> {
        self.local_replica
            .append_entries(request)
            .await
            .map_err(|e| self.convert_append_entries_error(e))
    }
}
