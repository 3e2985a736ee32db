mod actor;
mod api;
mod commitlog;
mod protocol;
mod replica;
mod serializer;
mod storage;
mod transport;
mod grpc {
    tonic::include_proto!("raft");
}

pub use api::CommittedEntry;
pub use api::ConfigError;
pub use api::LifecycleError;
pub use api::NoOpStateMachine;
pub use api::RaftConfig;
pub use api::RaftEventListener;
pub use api::RaftOptions;
pub use api::RaftServer;
pub use api::Role;
pub use api::ServerStatus;
pub use api::SharedIoError;
pub use api::StateMachine;
pub use api::StateMachineOutput;
pub use api::SubmitError;
pub use api::SubmitOutput;
pub use commitlog::Entry;
pub use commitlog::FileLog;
pub use commitlog::InMemoryLog;
pub use commitlog::Index;
pub use commitlog::Log;
pub use protocol::AppendEntriesRequest;
pub use protocol::AppendEntriesResponse;
pub use protocol::ProtocolError;
pub use protocol::RaftLogEntry;
pub use protocol::RaftMessage;
pub use protocol::VoteRequest;
pub use protocol::VoteResponse;
pub use replica::Member;
pub use replica::MemberId;
pub use replica::MemberKind;
pub use replica::PersistentLocalState;
pub use replica::Term;
pub use replica::VolatileLocalState;
pub use serializer::Command;
pub use serializer::CommandRegistry;
pub use serializer::DecodedCommand;
pub use serializer::Serializer;
pub use serializer::SerializerError;
pub use storage::DiskStorage;
pub use storage::FileLocalState;
pub use storage::MemoryStorage;
pub use storage::Storage;
pub use storage::StorageHandles;
pub use transport::GrpcTransport;
pub use transport::ListenerHandle;
pub use transport::LocalNetwork;
pub use transport::LocalTransport;
pub use transport::RpcHandler;
pub use transport::ShutdownSignal;
pub use transport::Transport;
pub use transport::TransportError;
