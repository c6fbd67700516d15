// Connection manager
//
// All mutations go through one actor task that owns the current connection,
// so concurrent connect/disconnect calls are serialized and every listener
// observes them in the same order. Reads go through a watch channel and
// never wait on the actor.

use crate::errors::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Commands queued for the actor before senders start waiting
const COMMAND_QUEUE_DEPTH: usize = 32;

/// The control-plane endpoint of the connected kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub address: IpAddr,
    pub port: u16,
}

impl Connection {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Called with the new connection after every connect, and with `None`
/// after every disconnect
pub type ConnectionListener = Arc<dyn Fn(Option<Connection>) + Send + Sync>;

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    listeners: Vec<(u64, ConnectionListener)>,
}

type SharedRegistry = Arc<Mutex<ListenerRegistry>>;

fn lock(registry: &Mutex<ListenerRegistry>) -> MutexGuard<'_, ListenerRegistry> {
    // A listener never runs while the lock is held, so poisoning carries no
    // half-written state
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a listener registered with [`ConnectionManager::add_connection_listener`].
///
/// Dropping the handle leaves the listener registered.
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    registry: Weak<Mutex<ListenerRegistry>>,
}

impl ListenerHandle {
    /// Unregister the listener. Returns false if it was already gone.
    pub fn remove(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = lock(&registry);
        let before = registry.listeners.len();
        registry.listeners.retain(|(id, _)| *id != self.id);
        before != registry.listeners.len()
    }
}

enum Command {
    Connect {
        connection: Connection,
        done: oneshot::Sender<()>,
    },
    Disconnect {
        done: oneshot::Sender<Option<Connection>>,
    },
}

/// Holds at most one active kernel connection and notifies listeners of changes.
///
/// Cheap to clone; all clones share the same state. Must be created inside a
/// tokio runtime. The actor stops once every clone is dropped, so a listener
/// that needs the manager should capture a [`WeakConnectionManager`] instead
/// of a clone.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<Option<Connection>>,
    listeners: SharedRegistry,
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (commands, inbox) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (state_tx, state) = watch::channel(None);
        let listeners = SharedRegistry::default();

        tokio::spawn(run_actor(inbox, state_tx, listeners.clone()));

        Self {
            commands,
            state,
            listeners,
        }
    }

    /// Replace any existing connection with `address:port`.
    ///
    /// Last write wins. Resolves once the state is updated and every
    /// listener has been called.
    pub async fn connect(&self, address: IpAddr, port: u16) -> Result<Connection> {
        let connection = Connection::new(address, port);
        let (done, finished) = oneshot::channel();
        self.send(Command::Connect { connection, done }).await?;
        finished
            .await
            .map_err(|_| KernelError::ConnectionManagerClosed)?;
        Ok(connection)
    }

    /// Clear the connection. Listeners are notified with `None` even when
    /// nothing was connected. Returns the connection that was dropped.
    pub async fn disconnect(&self) -> Result<Option<Connection>> {
        let (done, finished) = oneshot::channel();
        self.send(Command::Disconnect { done }).await?;
        finished
            .await
            .map_err(|_| KernelError::ConnectionManagerClosed)
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn current(&self) -> Option<Connection> {
        *self.state.borrow()
    }

    /// Watch the connection state without registering a callback
    pub fn subscribe(&self) -> watch::Receiver<Option<Connection>> {
        self.state.clone()
    }

    /// Append `listener` to the registry. It sees every connect/disconnect
    /// processed after this call, in order.
    pub fn add_connection_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(Option<Connection>) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.listeners);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(listener)));

        ListenerHandle {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).listeners.len()
    }

    /// A handle that does not keep the actor or the listeners alive
    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            commands: self.commands.downgrade(),
            state: self.state.clone(),
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| KernelError::ConnectionManagerClosed)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-owning [`ConnectionManager`] handle, safe to capture in listeners
#[derive(Clone)]
pub struct WeakConnectionManager {
    commands: mpsc::WeakSender<Command>,
    state: watch::Receiver<Option<Connection>>,
    listeners: Weak<Mutex<ListenerRegistry>>,
}

impl WeakConnectionManager {
    /// `None` once every strong handle is gone
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        Some(ConnectionManager {
            commands: self.commands.upgrade()?,
            state: self.state.clone(),
            listeners: self.listeners.upgrade()?,
        })
    }
}

async fn run_actor(
    mut inbox: mpsc::Receiver<Command>,
    state: watch::Sender<Option<Connection>>,
    listeners: SharedRegistry,
) {
    while let Some(command) = inbox.recv().await {
        match command {
            Command::Connect { connection, done } => {
                let previous = state.send_replace(Some(connection));
                match previous {
                    Some(previous) => info!(%previous, %connection, "Replaced kernel connection"),
                    None => info!(%connection, "Connected to kernel"),
                }
                notify(&listeners, Some(connection));
                let _ = done.send(());
            }
            Command::Disconnect { done } => {
                let previous = state.send_replace(None);
                match previous {
                    Some(previous) => info!(%previous, "Disconnected from kernel"),
                    None => debug!("Disconnect requested with no active connection"),
                }
                notify(&listeners, None);
                let _ = done.send(previous);
            }
        }
    }

    debug!("Connection manager stopped");
}

fn notify(listeners: &SharedRegistry, connection: Option<Connection>) {
    // Snapshot so listeners can add or remove listeners without deadlocking
    let snapshot: Vec<ConnectionListener> = lock(listeners)
        .listeners
        .iter()
        .map(|(_, listener)| listener.clone())
        .collect();

    for listener in snapshot {
        if catch_unwind(AssertUnwindSafe(|| listener(connection))).is_err() {
            warn!("Connection listener panicked");
        }
    }
}
