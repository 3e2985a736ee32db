//! Messages exchanged between cluster members and the rules every received message must pass.
mod log_entry;
mod messages;

pub use log_entry::RaftLogEntry;
pub use messages::AppendEntriesRequest;
pub use messages::AppendEntriesResponse;
pub use messages::ProtocolError;
pub use messages::RaftMessage;
pub use messages::VoteRequest;
pub use messages::VoteResponse;
