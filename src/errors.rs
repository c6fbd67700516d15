// Error types for discovery, connection, and process supervision
//
// Network and process failures are caught at the boundary of each operation
// and returned as a KernelError. An empty scan and redundant start/stop calls
// are not errors.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    /// The scan socket could not be opened or the query could not be sent
    #[error("Discovery scan failed: {0}")]
    Discovery(#[source] std::io::Error),

    /// Every port query attempt failed; carries the last cause
    #[error("Failed to resolve the control port of {address} after {attempts} attempt(s): {source}")]
    PortResolution {
        address: IpAddr,
        attempts: u32,
        #[source]
        source: Box<KernelError>,
    },

    #[error("Port query timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("Port query failed: {0}")]
    Probe(#[source] std::io::Error),

    #[error("Unexpected reply from {0}")]
    UnexpectedReply(IpAddr),

    #[error("Failed to spawn managed kernel {}: {source}", path.display())]
    ProcessSpawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to terminate managed kernel (pid {pid}): {source}")]
    ProcessTerminate {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Managed kernel exited before it became discoverable (exit code: {code:?})")]
    ManagedProcessExited { code: Option<i32> },

    #[error("Managed kernel '{name}' was not discoverable after {waited:?}")]
    ManagedKernelNotReady { name: String, waited: Duration },

    #[error("Not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection manager has shut down")]
    ConnectionManagerClosed,
}

pub type Result<T> = std::result::Result<T, KernelError>;
