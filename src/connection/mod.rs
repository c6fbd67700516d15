// Kernel connection state
//
// At most one active connection, owned by a single actor task

pub mod manager;

pub use manager::{
    Connection, ConnectionListener, ConnectionManager, ListenerHandle, WeakConnectionManager,
};
