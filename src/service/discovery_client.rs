// Discovery client
//
// Finds kernels on the local network with a single group query

use crate::config::constants::MAX_DATAGRAM;
use crate::errors::{KernelError, Result};
use crate::service::protocol::{Query, Reply};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace};

/// A kernel that answered a scan
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelDescriptor {
    /// Name the kernel advertises (not unique)
    pub name: String,
    /// Source address of the reply
    pub address: IpAddr,
}

impl fmt::Display for KernelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Client for discovering kernels
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryClient;

impl DiscoveryClient {
    pub fn new() -> Self {
        Self
    }

    /// Send one name query to `group:port` and collect replies until `timeout`
    /// elapses.
    ///
    /// Finding nothing is not an error: the result is simply empty. Only a
    /// failure to open the socket or send the query is reported. One socket
    /// is opened per call and closed on return.
    pub async fn scan(
        &self,
        group: IpAddr,
        port: u16,
        timeout: Duration,
    ) -> Result<Vec<KernelDescriptor>> {
        let deadline = Instant::now() + timeout;
        let socket = open_query_socket(group)
            .await
            .map_err(KernelError::Discovery)?;

        let target = SocketAddr::new(group, port);
        socket
            .send_to(&Query::NameQuery.encode(), target)
            .await
            .map_err(KernelError::Discovery)?;
        debug!(%target, ?timeout, "Sent kernel name query");

        let mut found = Vec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Ok((len, src))) => match Reply::decode(&buf[..len]) {
                    Some(Reply::Name { name }) => {
                        debug!(%name, address = %src.ip(), "Kernel answered scan");
                        found.push(KernelDescriptor {
                            name,
                            address: src.ip(),
                        });
                    }
                    _ => trace!(%src, len, "Ignoring unrelated datagram during scan"),
                },
                // Some platforms surface ICMP unreachable from one peer here
                Ok(Err(e)) => debug!(error = %e, "Receive failed during scan, still listening"),
            }
        }

        info!(count = found.len(), %target, "Kernel scan finished");
        Ok(found)
    }
}

/// Bind an ephemeral UDP socket suited to reaching `target`
pub(crate) async fn open_query_socket(target: IpAddr) -> std::io::Result<UdpSocket> {
    let bind: SocketAddr = match target {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind).await?;

    if let IpAddr::V4(v4) = target {
        if v4.is_broadcast() {
            socket.set_broadcast(true)?;
        }
        if v4.is_multicast() {
            socket.set_multicast_loop_v4(true)?;
        }
    }

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_display() {
        let descriptor = KernelDescriptor {
            name: "kernel-a".to_string(),
            address: "10.0.0.5".parse().unwrap(),
        };
        assert_eq!(descriptor.to_string(), "kernel-a (10.0.0.5)");
    }

    #[tokio::test]
    async fn test_scan_with_no_responders_is_empty() {
        // Bind a socket that never answers so the query has somewhere to go
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();

        let start = std::time::Instant::now();
        let kernels = DiscoveryClient::new()
            .scan("127.0.0.1".parse().unwrap(), port, Duration::from_millis(100))
            .await
            .unwrap();

        assert!(kernels.is_empty());
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_scan_to_dead_port_still_waits_out_the_timeout() {
        let dead = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = dead.local_addr().unwrap().port();
        drop(dead);

        let start = std::time::Instant::now();
        let kernels = DiscoveryClient::new()
            .scan("127.0.0.1".parse().unwrap(), port, Duration::from_millis(200))
            .await
            .unwrap();

        assert!(kernels.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_zero_timeout_returns_immediately() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();

        let kernels = DiscoveryClient::new()
            .scan("127.0.0.1".parse().unwrap(), port, Duration::ZERO)
            .await
            .unwrap();
        assert!(kernels.is_empty());
    }

    #[tokio::test]
    async fn test_scan_collects_replies_and_skips_garbage() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = responder.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (len, src) = responder.recv_from(&mut buf).await.unwrap();
            assert_eq!(Query::decode(&buf[..len]), Some(Query::NameQuery));
            responder.send_to(b"not json", src).await.unwrap();
            for name in ["kernel-a", "kernel-a"] {
                let reply = Reply::Name {
                    name: name.to_string(),
                };
                responder.send_to(&reply.encode(), src).await.unwrap();
            }
        });

        let kernels = DiscoveryClient::new()
            .scan("127.0.0.1".parse().unwrap(), port, Duration::from_millis(300))
            .await
            .unwrap();

        // Duplicates are kept as-is
        assert_eq!(kernels.len(), 2);
        assert!(kernels.iter().all(|k| k.name == "kernel-a"));
        assert!(kernels.iter().all(|k| k.address.is_loopback()));
    }
}
