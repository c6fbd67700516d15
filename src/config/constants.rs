// Project-wide constants
//
// Centralised here so port numbers and timing defaults have one source of
// truth. Import via `use crate::config::constants::*;`.

use std::net::{IpAddr, Ipv4Addr};

/// Default multicast group kernels listen on for name queries.
pub const DEFAULT_DISCOVERY_GROUP: IpAddr = IpAddr::V4(Ipv4Addr::new(239, 255, 42, 99));

/// Default UDP port for both name queries and port queries.
pub const DEFAULT_DISCOVERY_PORT: u16 = 1776;

/// How long a scan collects replies.
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 1000;

/// Upper bound on a single port query attempt.
pub const DEFAULT_RESOLVE_ATTEMPT_TIMEOUT_MS: u64 = 1000;

/// Number of port query attempts before giving up.
///
/// A freshly started kernel needs a few seconds before it answers, so this is
/// a polling budget rather than a retry-on-glitch count.
pub const DEFAULT_RESOLVE_MAX_ATTEMPTS: u32 = 10;

/// Grace period between asking the managed kernel to stop and killing it.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 10_000;

/// How long to wait for a managed kernel to show up in a scan.
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 15_000;

/// Pause between readiness scans.
pub const DEFAULT_READY_POLL_INTERVAL_MS: u64 = 2000;

/// Placeholder substituted with the kernel name in args and stdin lines.
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Environment variable prefix for configuration overrides
/// (e.g. `KERNEL_LINK__DISCOVERY__PORT=1800`).
pub const ENV_PREFIX: &str = "KERNEL_LINK";

/// Directory under the home directory holding `config.toml`.
pub const CONFIG_DIR_NAME: &str = ".kernel-link";

/// Largest datagram the discovery protocol ever needs to read.
pub const MAX_DATAGRAM: usize = 2048;
