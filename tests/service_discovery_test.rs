// Integration tests for kernel discovery and control port resolution
//
// Everything runs over real UDP sockets on 127.0.0.1: a KernelResponder plays
// the kernel and the scan "group" is simply its unicast address.

use anyhow::Result;
use kernel_link::service::{DiscoveryClient, KernelResponder, PortResolver, ResponderHandle};
use std::net::IpAddr;
use std::time::{Duration, Instant};

async fn responder(name: &str, control_port: Option<u16>) -> Result<ResponderHandle> {
    let handle = KernelResponder::bind(name, control_port, "127.0.0.1:0".parse()?, None)
        .await?
        .spawn()?;
    Ok(handle)
}

#[tokio::test]
async fn test_scan_then_resolve() -> Result<()> {
    let kernel = responder("kernel-a", Some(1234)).await?;
    let addr = kernel.local_addr();

    let kernels = DiscoveryClient::new()
        .scan(addr.ip(), addr.port(), Duration::from_millis(200))
        .await?;
    assert_eq!(kernels.len(), 1);
    assert_eq!(kernels[0].name, "kernel-a");

    let port = PortResolver::new()
        .resolve(kernels[0].address, addr.port(), Duration::from_millis(500), 3)
        .await?;
    assert_eq!(port, 1234);

    kernel.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_scan_respects_timeout_when_nobody_answers() -> Result<()> {
    // Bound so the query lands somewhere, but never answers
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    let addr = silent.local_addr()?;

    let timeout = Duration::from_millis(150);
    let start = Instant::now();
    let kernels = DiscoveryClient::new()
        .scan(addr.ip(), addr.port(), timeout)
        .await?;

    assert!(kernels.is_empty());
    assert!(start.elapsed() >= timeout);
    assert!(start.elapsed() < timeout + Duration::from_millis(500));
    Ok(())
}

#[tokio::test]
async fn test_resolve_against_silent_kernel_fails_after_all_attempts() -> Result<()> {
    let kernel = responder("still-booting", None).await?;
    let addr = kernel.local_addr();

    let start = Instant::now();
    let err = PortResolver::new()
        .resolve(addr.ip(), addr.port(), Duration::from_millis(100), 3)
        .await
        .unwrap_err();

    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(err.to_string().contains("3 attempt(s)"));

    kernel.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_multiple_kernels_answer_one_scan() -> Result<()> {
    // Two responders on different ports cannot share a unicast "group", so
    // scan each and check they are told apart by name
    let a = responder("kernel-a", Some(1)).await?;
    let b = responder("kernel-b", Some(2)).await?;

    let client = DiscoveryClient::new();
    let mut names = Vec::new();
    for handle in [&a, &b] {
        let addr = handle.local_addr();
        for kernel in client
            .scan(addr.ip(), addr.port(), Duration::from_millis(150))
            .await?
        {
            assert_eq!(kernel.address, "127.0.0.1".parse::<IpAddr>()?);
            names.push(kernel.name);
        }
    }
    names.sort();
    assert_eq!(names, vec!["kernel-a", "kernel-b"]);

    a.shutdown().await;
    b.shutdown().await;
    Ok(())
}

// Note: multicast delivery is not exercised here because CI containers often
// have no multicast route. Manual check:
// 1. Terminal 1: cargo run -- announce --name demo --control-port 4000
// 2. Terminal 2: cargo run -- scan
// 3. "demo" should be listed with the announcing machine's address
