// Control port resolution
//
// A kernel that was just started may not be answering yet, so resolution is
// a fixed-interval poll: up to `max_attempts` queries, each owning a slot of
// `per_attempt_timeout`. No backoff.

use crate::config::constants::MAX_DATAGRAM;
use crate::errors::{KernelError, Result};
use crate::service::discovery_client::open_query_socket;
use crate::service::protocol::{Query, Reply};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// One point-to-point "which port are you listening on" query
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Ask `target` for its control port, giving up after `timeout`
    async fn query_port(&self, target: SocketAddr, timeout: Duration) -> Result<u16>;
}

/// PortProbe over the UDP discovery protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpPortProbe;

#[async_trait]
impl PortProbe for UdpPortProbe {
    async fn query_port(&self, target: SocketAddr, timeout: Duration) -> Result<u16> {
        tokio::time::timeout(timeout, exchange_port_query(target))
            .await
            .map_err(|_| KernelError::ProbeTimeout(timeout))?
    }
}

async fn exchange_port_query(target: SocketAddr) -> Result<u16> {
    let socket = open_query_socket(target.ip())
        .await
        .map_err(KernelError::Probe)?;
    socket.connect(target).await.map_err(KernelError::Probe)?;
    socket
        .send(&Query::PortQuery.encode())
        .await
        .map_err(KernelError::Probe)?;

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let len = socket.recv(&mut buf).await.map_err(KernelError::Probe)?;
        match Reply::decode(&buf[..len]) {
            Some(Reply::Port { port: 0 }) => return Err(KernelError::UnexpectedReply(target.ip())),
            Some(Reply::Port { port }) => return Ok(port),
            // Name replies and noise: keep listening until the deadline
            _ => continue,
        }
    }
}

/// Resolves a kernel's control port with a bounded number of attempts
#[derive(Debug, Clone, Default)]
pub struct PortResolver<P = UdpPortProbe> {
    probe: P,
}

impl PortResolver<UdpPortProbe> {
    pub fn new() -> Self {
        Self {
            probe: UdpPortProbe,
        }
    }
}

impl<P: PortProbe> PortResolver<P> {
    pub fn with_probe(probe: P) -> Self {
        Self { probe }
    }

    /// Resolve the control port of the kernel at `address`.
    ///
    /// Returns the first port reported. After `max_attempts` failed attempts
    /// the error carries the most recent cause. Every attempt occupies its
    /// full `per_attempt_timeout` slot, even when it fails early, so the total
    /// time on failure is `max_attempts * per_attempt_timeout`.
    pub async fn resolve(
        &self,
        address: IpAddr,
        discovery_port: u16,
        per_attempt_timeout: Duration,
        max_attempts: u32,
    ) -> Result<u16> {
        if max_attempts == 0 {
            return Err(KernelError::InvalidArgument(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let target = SocketAddr::new(address, discovery_port);
        let mut last_error = KernelError::ProbeTimeout(per_attempt_timeout);

        for attempt in 1..=max_attempts {
            let slot_end = Instant::now() + per_attempt_timeout;

            match self.probe.query_port(target, per_attempt_timeout).await {
                Ok(port) => {
                    info!(%address, port, attempt, "Resolved kernel control port");
                    return Ok(port);
                }
                Err(e) => {
                    debug!(%target, attempt, max_attempts, error = %e, "Port query attempt failed");
                    last_error = e;
                }
            }

            sleep_until(slot_end).await;
        }

        warn!(%address, attempts = max_attempts, error = %last_error, "Giving up on port resolution");
        Err(KernelError::PortResolution {
            address,
            attempts: max_attempts,
            source: Box::new(last_error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails `failures` times, then answers with `port`
    struct FlakyProbe {
        calls: Arc<AtomicU32>,
        failures: u32,
        port: u16,
    }

    #[async_trait]
    impl PortProbe for FlakyProbe {
        async fn query_port(&self, target: SocketAddr, timeout: Duration) -> Result<u16> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                tokio::time::sleep(timeout).await;
                Err(KernelError::UnexpectedReply(target.ip()))
            } else {
                Ok(self.port)
            }
        }
    }

    fn flaky(failures: u32, port: u16) -> (PortResolver<FlakyProbe>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let resolver = PortResolver::with_probe(FlakyProbe {
            calls: calls.clone(),
            failures,
            port,
        });
        (resolver, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_wins() {
        let (resolver, calls) = flaky(2, 1234);
        let port = resolver
            .resolve("10.0.0.5".parse().unwrap(), 1776, Duration::from_millis(1000), 10)
            .await
            .unwrap();
        assert_eq!(port, 1234);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_exactly_max_attempts() {
        let (resolver, calls) = flaky(u32::MAX, 1234);
        let start = Instant::now();
        let err = resolver
            .resolve("10.0.0.5".parse().unwrap(), 5555, Duration::from_millis(1000), 3)
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(3100));
        match err {
            KernelError::PortResolution {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, KernelError::UnexpectedReply(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_rejected() {
        let (resolver, calls) = flaky(0, 1);
        let err = resolver
            .resolve("127.0.0.1".parse().unwrap(), 1776, Duration::from_millis(10), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_udp_probe_reads_port_reply() {
        let kernel = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = kernel.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (len, src) = kernel.recv_from(&mut buf).await.unwrap();
            assert_eq!(Query::decode(&buf[..len]), Some(Query::PortQuery));
            let name = Reply::Name {
                name: "noise".to_string(),
            };
            kernel.send_to(&name.encode(), src).await.unwrap();
            kernel
                .send_to(&Reply::Port { port: 4321 }.encode(), src)
                .await
                .unwrap();
        });

        let port = UdpPortProbe
            .query_port(target, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(port, 4321);
    }

    #[tokio::test]
    async fn test_udp_probe_times_out_on_silence() {
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = silent.local_addr().unwrap();

        let err = UdpPortProbe
            .query_port(target, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::ProbeTimeout(_)));
    }
}
