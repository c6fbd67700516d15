// CLI module
// Argument parsing and command handlers for the kernel-link binary

mod commands;

pub use commands::{format_kernels, run_command};

use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "kernel-link")]
#[command(
    author,
    version,
    about = "Discover kernel servers on the local network and connect to them"
)]
pub struct Cli {
    /// Configuration file (defaults to ~/.kernel-link/config.toml if present)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG still wins when set)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List kernels answering on the discovery group
    Scan,

    /// Resolve the control port of the kernel at ADDRESS
    Resolve {
        address: IpAddr,
    },

    /// Resolve and connect to the kernel at ADDRESS, hold until Ctrl-C
    Connect {
        address: IpAddr,
    },

    /// Answer discovery queries as a kernel until Ctrl-C
    Announce {
        /// Advertised name (defaults to kernel-<hostname>)
        #[arg(short = 'n', long = "name")]
        name: Option<String>,

        /// Control-plane port reported to resolvers
        #[arg(short = 'p', long = "control-port")]
        control_port: u16,
    },

    /// Start a managed kernel, connect to it, and stop it on Ctrl-C
    Managed {
        /// Kernel name (defaults to kernel-<hostname>)
        #[arg(short = 'n', long = "name")]
        name: Option<String>,

        /// Kernel executable, overriding managed.executable
        #[arg(short = 'e', long = "executable")]
        executable: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Default kernel name derived from the hostname
pub fn default_kernel_name() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("kernel-{}", hostname)
}
