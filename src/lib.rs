// Kernel Link - discovery, connection and process lifecycle for kernel servers
// Library exports

pub mod cli;
pub mod config;
pub mod connection;
pub mod daemon;
pub mod errors;
pub mod link;
pub mod logging;
pub mod service;

pub use connection::{Connection, ConnectionManager, ListenerHandle, WeakConnectionManager};
pub use daemon::{ManagedProcessSupervisor, ProcessStatus, StartOutcome, StopOutcome};
pub use errors::{KernelError, Result};
pub use link::KernelLink;
pub use service::{DiscoveryClient, KernelDescriptor, KernelResponder, PortResolver};
