// Command handlers

use anyhow::{Context, Result};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

use super::{default_kernel_name, Commands};
use crate::config::{render_settings, Settings};
use crate::service::{KernelDescriptor, KernelResponder};
use crate::KernelLink;

pub async fn run_command(command: Commands, settings: Settings) -> Result<()> {
    match command {
        Commands::Scan => scan(settings).await,
        Commands::Resolve { address } => {
            let link = KernelLink::new(settings);
            let port = link.resolve(address).await?;
            println!("{}", SocketAddr::new(address, port));
            Ok(())
        }
        Commands::Connect { address } => connect(settings, address).await,
        Commands::Announce { name, control_port } => {
            announce(settings, name.unwrap_or_else(default_kernel_name), control_port).await
        }
        Commands::Managed { name, executable } => {
            managed(settings, name.unwrap_or_else(default_kernel_name), executable).await
        }
        Commands::Config => {
            print!("{}", render_settings(&settings)?);
            Ok(())
        }
    }
}

/// One line per kernel, or a note when nothing answered
pub fn format_kernels(kernels: &[KernelDescriptor]) -> String {
    if kernels.is_empty() {
        return "No kernels found".to_string();
    }

    let width = kernels.iter().map(|k| k.name.len()).max().unwrap_or(0);
    kernels
        .iter()
        .map(|k| format!("{:<width$}  {}", k.name, k.address, width = width))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn scan(settings: Settings) -> Result<()> {
    let link = KernelLink::new(settings);
    let kernels = link.scan().await?;
    println!("{}", format_kernels(&kernels));
    Ok(())
}

async fn connect(settings: Settings, address: std::net::IpAddr) -> Result<()> {
    let link = KernelLink::new(settings);
    link.add_connection_listener(|connection| match connection {
        Some(connection) => println!("Connected to {}", connection),
        None => println!("Not connected"),
    });

    let port = link.resolve(address).await?;
    link.connect(address, port).await?;

    wait_for_ctrl_c().await?;
    link.disconnect().await?;
    Ok(())
}

async fn announce(settings: Settings, name: String, control_port: u16) -> Result<()> {
    let discovery = &settings.discovery;
    let bind: SocketAddr = if discovery.group.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, discovery.port).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, discovery.port).into()
    };

    let handle = KernelResponder::bind(name.clone(), Some(control_port), bind, Some(discovery.group))
        .await
        .with_context(|| format!("Failed to bind discovery responder on {}", bind))?
        .spawn()?;

    println!("Announcing {} (control port {}) on {}", name, control_port, handle.local_addr());
    wait_for_ctrl_c().await?;
    handle.shutdown().await;
    Ok(())
}

async fn managed(settings: Settings, name: String, executable: Option<PathBuf>) -> Result<()> {
    let mut settings = settings;
    if executable.is_some() {
        settings.managed.executable = executable;
    }

    let link = KernelLink::new(settings);
    link.add_connection_listener(|connection| match connection {
        Some(connection) => println!("Connected to {}", connection),
        None => println!("Not connected"),
    });

    link.start_managed(&name).await?;

    // Whatever happens while connecting, do not leave the kernel running
    let session = async {
        let kernel = link.await_managed_ready(&name).await?;
        link.connect_to(&kernel).await?;
        wait_for_ctrl_c().await?;
        link.disconnect().await?;
        anyhow::Ok(())
    }
    .await;

    let stopped = link.stop_managed().await;
    session?;
    stopped?;
    Ok(())
}

async fn wait_for_ctrl_c() -> Result<()> {
    println!("Press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}
