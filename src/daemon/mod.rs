// Locally managed kernel process

pub mod supervisor;

pub use supervisor::{ManagedProcessSupervisor, ProcessStatus, StartOutcome, StopOutcome};
