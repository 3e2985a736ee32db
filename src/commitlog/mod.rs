mod file_log;
mod in_memory;
mod log;

pub use file_log::FileLog;
pub use in_memory::InMemoryLog;
pub use log::Entry;
pub use log::Index;
pub use log::Log;

pub(crate) use in_memory::SharedLogBuffer;
