//! The raft-specific commit log that wraps the generic commit log: tracks the latest written
//! entry, the commit index, and feeds committed entries to the state machine.

mod log;

pub(crate) use log::AppliedEntry;
pub(crate) use log::WriteAheadLog;
