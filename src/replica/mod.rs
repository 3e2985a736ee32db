mod election;
mod inbound;
mod local_state;
mod peers;
mod replica;
mod replica_api;
mod write_ahead_log;

pub use local_state::PersistentLocalState;
pub use local_state::Term;
pub use local_state::VolatileLocalState;
pub use peers::Member;
pub use peers::MemberId;
pub use peers::MemberKind;

pub(crate) use inbound::InboundRpcHandler;
pub(crate) use local_state::{LocalStateRecord, SharedLocalStateRecord};
pub(crate) use peers::ClusterTracker;
pub(crate) use replica::{Replica, ReplicaConfig};
pub(crate) use replica_api::*;
pub(crate) use write_ahead_log::WriteAheadLog;
