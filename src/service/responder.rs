// Kernel-side discovery responder
//
// Answers name queries (usually sent to a multicast group) and port queries
// (sent point-to-point) on behalf of one kernel. Runs as a tokio task until
// its CancellationToken fires.

use crate::config::constants::MAX_DATAGRAM;
use crate::errors::{KernelError, Result};
use crate::service::protocol::{Query, Reply};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Responder for one advertised kernel
pub struct KernelResponder {
    socket: UdpSocket,
    name: String,
    /// 0 until the control plane is listening; port queries go unanswered meanwhile
    control_port: Arc<AtomicU16>,
}

impl KernelResponder {
    /// Bind to `bind_addr`, joining `group` when it is an IPv4 multicast group.
    ///
    /// `control_port` may be `None` for a kernel that is still starting; set it
    /// later through the handle returned by [`KernelResponder::spawn`].
    pub async fn bind(
        name: impl Into<String>,
        control_port: Option<u16>,
        bind_addr: SocketAddr,
        group: Option<IpAddr>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(KernelError::Discovery)?;

        if let Some(IpAddr::V4(group)) = group {
            if group.is_multicast() {
                socket
                    .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
                    .map_err(KernelError::Discovery)?;
                debug!(%group, "Joined discovery multicast group");
            }
        }

        Ok(Self {
            socket,
            name: name.into(),
            control_port: Arc::new(AtomicU16::new(control_port.unwrap_or(0))),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(KernelError::Discovery)
    }

    /// Start answering queries in a background task
    pub fn spawn(self) -> Result<ResponderHandle> {
        let local_addr = self.local_addr()?;
        let cancel = CancellationToken::new();
        let control_port = self.control_port.clone();

        info!(name = %self.name, %local_addr, "Advertising kernel");
        let task = tokio::spawn(self.run(cancel.clone()));

        Ok(ResponderHandle {
            local_addr,
            control_port,
            cancel,
            task,
        })
    }

    async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, src) = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP errors from earlier replies surface here on some platforms
                        debug!(error = %e, "Discovery receive failed");
                        continue;
                    }
                },
            };

            let reply = match Query::decode(&buf[..len]) {
                Some(Query::NameQuery) => Reply::Name {
                    name: self.name.clone(),
                },
                Some(Query::PortQuery) => match self.control_port.load(Ordering::Acquire) {
                    0 => {
                        debug!(%src, "Port query before control plane is ready, ignoring");
                        continue;
                    }
                    port => Reply::Port { port },
                },
                None => {
                    trace!(%src, len, "Ignoring unrelated datagram");
                    continue;
                }
            };

            if let Err(e) = self.socket.send_to(&reply.encode(), src).await {
                warn!(%src, error = %e, "Failed to answer discovery query");
            }
        }

        info!(name = %self.name, "Stopped advertising kernel");
    }
}

/// Handle to a running responder
pub struct ResponderHandle {
    local_addr: SocketAddr,
    control_port: Arc<AtomicU16>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ResponderHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Publish the control port once the kernel is accepting connections
    pub fn set_control_port(&self, port: u16) {
        self.control_port.store(port, Ordering::Release);
    }

    /// Stop answering and wait for the task to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Discovery responder task ended abnormally");
        }
    }
}
