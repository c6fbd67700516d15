// Kernel discovery
//
// Group scans for kernel names, point-to-point control port resolution, and
// the kernel-side responder that answers both

pub mod discovery_client;
pub mod protocol;
pub mod resolver;
pub mod responder;

pub use discovery_client::{DiscoveryClient, KernelDescriptor};
pub use resolver::{PortProbe, PortResolver, UdpPortProbe};
pub use responder::{KernelResponder, ResponderHandle};
