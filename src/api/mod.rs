//! This mod is meant to hold most of the code for the library's client-facing API.
mod configuration;
mod event_bus;
mod options;
mod server;
mod state_machine;
mod types;
mod wiring;

pub use configuration::ConfigError;
pub use configuration::RaftConfig;
pub use event_bus::RaftEventListener;
pub use options::RaftOptions;
pub use server::RaftServer;
pub use state_machine::CommittedEntry;
pub use state_machine::NoOpStateMachine;
pub use state_machine::StateMachine;
pub use state_machine::StateMachineOutput;
pub use types::LifecycleError;
pub use types::Role;
pub use types::ServerStatus;
pub use types::SharedIoError;
pub use types::SubmitError;
pub use types::SubmitOutput;
