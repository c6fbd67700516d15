// KernelLink - the consumer-facing API
//
// Bundles discovery, port resolution, the connection manager and the managed
// kernel supervisor behind the configured settings. Every slow step is an
// async fn so callers compose scan -> start -> await ready -> resolve ->
// connect sequentially instead of chaining callbacks.

use crate::config::Settings;
use crate::connection::{Connection, ConnectionManager, ListenerHandle};
use crate::daemon::{ManagedProcessSupervisor, ProcessStatus, StartOutcome, StopOutcome};
use crate::errors::{KernelError, Result};
use crate::service::{DiscoveryClient, KernelDescriptor, PortProbe, PortResolver, UdpPortProbe};
use std::net::IpAddr;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

pub struct KernelLink<P = UdpPortProbe> {
    settings: Settings,
    discovery: DiscoveryClient,
    resolver: PortResolver<P>,
    connections: ConnectionManager,
    supervisor: ManagedProcessSupervisor,
}

impl KernelLink<UdpPortProbe> {
    /// Must be called inside a tokio runtime (the connection manager spawns
    /// its actor task)
    pub fn new(settings: Settings) -> Self {
        Self::with_probe(settings, UdpPortProbe)
    }
}

impl<P: PortProbe> KernelLink<P> {
    pub fn with_probe(settings: Settings, probe: P) -> Self {
        let supervisor = ManagedProcessSupervisor::new(settings.managed.clone());
        Self {
            settings,
            discovery: DiscoveryClient::new(),
            resolver: PortResolver::with_probe(probe),
            connections: ConnectionManager::new(),
            supervisor,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn supervisor(&self) -> &ManagedProcessSupervisor {
        &self.supervisor
    }

    /// Scan the configured group for kernels
    pub async fn scan(&self) -> Result<Vec<KernelDescriptor>> {
        let discovery = &self.settings.discovery;
        self.discovery
            .scan(discovery.group, discovery.port, discovery.scan_timeout())
            .await
    }

    /// Resolve the control port of the kernel at `address`
    pub async fn resolve(&self, address: IpAddr) -> Result<u16> {
        let discovery = &self.settings.discovery;
        self.resolver
            .resolve(
                address,
                discovery.port,
                discovery.resolve_attempt_timeout(),
                discovery.resolve_max_attempts,
            )
            .await
    }

    pub async fn connect(&self, address: IpAddr, port: u16) -> Result<Connection> {
        self.connections.connect(address, port).await
    }

    /// Resolve `kernel`'s control port and connect to it.
    ///
    /// If resolution fails the current connection, if any, is left alone.
    pub async fn connect_to(&self, kernel: &KernelDescriptor) -> Result<Connection> {
        info!(%kernel, "Connecting to kernel");
        let port = self.resolve(kernel.address).await?;
        self.connect(kernel.address, port).await
    }

    pub async fn disconnect(&self) -> Result<Option<Connection>> {
        self.connections.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.connections.is_connected()
    }

    pub fn add_connection_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(Option<Connection>) + Send + Sync + 'static,
    {
        self.connections.add_connection_listener(listener)
    }

    pub async fn start_managed(&self, name: &str) -> Result<StartOutcome> {
        self.supervisor.start(name).await
    }

    pub async fn stop_managed(&self) -> Result<StopOutcome> {
        self.supervisor.stop().await
    }

    pub async fn is_managed_started(&self) -> bool {
        self.supervisor.is_started().await
    }

    /// Wait until the managed kernel called `name` answers a scan.
    ///
    /// Distinguishes a kernel that died (`ManagedProcessExited`) from one that
    /// is alive but not discoverable yet (`ManagedKernelNotReady` once the
    /// ready timeout passes). Loopback replies are preferred when several
    /// kernels share the name.
    pub async fn await_managed_ready(&self, name: &str) -> Result<KernelDescriptor> {
        let managed = &self.settings.managed;
        let waited = managed.ready_timeout();
        let deadline = Instant::now() + waited;

        loop {
            match self.supervisor.status().await {
                ProcessStatus::Running { .. } => {}
                ProcessStatus::Exited { code, .. } => {
                    return Err(KernelError::ManagedProcessExited { code })
                }
                ProcessStatus::NotStarted => {
                    return Err(KernelError::InvalidArgument(
                        "no managed kernel has been started".to_string(),
                    ))
                }
            }

            let mut matches: Vec<KernelDescriptor> = self
                .scan()
                .await?
                .into_iter()
                .filter(|kernel| kernel.name == name)
                .collect();
            matches.sort_by_key(|kernel| !kernel.address.is_loopback());

            if let Some(kernel) = matches.into_iter().next() {
                info!(%kernel, "Managed kernel is discoverable");
                return Ok(kernel);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(KernelError::ManagedKernelNotReady {
                    name: name.to_string(),
                    waited,
                });
            }

            debug!(name, "Managed kernel not discoverable yet");
            sleep(managed.ready_poll_interval().min(deadline - now)).await;
        }
    }
}
