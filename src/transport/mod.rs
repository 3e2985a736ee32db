//! Point-to-point delivery of raft RPCs between members. Delivery is at-least-once with no
//! ordering guarantee across separate sends; the replica tolerates loss, duplication and delay.
mod grpc;
mod local;
mod shutdown;

use crate::protocol::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::replica::{Member, MemberId};
use std::net::SocketAddr;
use std::sync::Arc;

pub use grpc::GrpcTransport;
pub use local::LocalNetwork;
pub use local::LocalTransport;
pub use shutdown::ListenerHandle;
pub use shutdown::ShutdownSignal;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("member {0} is unreachable")]
    Unreachable(MemberId),
    #[error("RPC to {member} failed: {message}")]
    RpcFailed { member: MemberId, message: String },
    #[error("remote server fault: {0}")]
    ServerFault(String),
    #[error("malformed message: {0}")]
    Codec(String),
    #[error("failed to listen on {address}: {message}")]
    Listen { address: SocketAddr, message: String },
}

/// RpcHandler is the inbound side: whatever a transport receives is handed to it.
#[async_trait::async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn handle_request_vote(&self, request: VoteRequest) -> Result<VoteResponse, TransportError>;

    async fn handle_append_entries(&self, request: AppendEntriesRequest)
        -> Result<AppendEntriesResponse, TransportError>;
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn request_vote(&self, target: &Member, request: VoteRequest) -> Result<VoteResponse, TransportError>;

    async fn append_entries(
        &self,
        target: &Member,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, TransportError>;

    /// Start delivering RPCs addressed to `local` into `handler`, until the returned handle is
    /// shut down or dropped.
    async fn listen(&self, local: &Member, handler: Arc<dyn RpcHandler>) -> Result<ListenerHandle, TransportError>;
}
