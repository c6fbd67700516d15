// Configuration structs

use super::constants::*;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Network discovery and port resolution settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Multicast group (or broadcast/unicast address) for name queries
    pub group: IpAddr,
    /// UDP port kernels answer discovery and port queries on
    pub port: u16,
    pub scan_timeout_ms: u64,
    pub resolve_attempt_timeout_ms: u64,
    pub resolve_max_attempts: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_DISCOVERY_GROUP,
            port: DEFAULT_DISCOVERY_PORT,
            scan_timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
            resolve_attempt_timeout_ms: DEFAULT_RESOLVE_ATTEMPT_TIMEOUT_MS,
            resolve_max_attempts: DEFAULT_RESOLVE_MAX_ATTEMPTS,
        }
    }
}

impl DiscoveryConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn resolve_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_attempt_timeout_ms)
    }
}

/// Locally managed kernel process settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedConfig {
    /// Kernel executable. Unset means managed kernels are unavailable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,

    /// Arguments passed to the executable; `{name}` is replaced by the kernel name
    pub args: Vec<String>,

    /// Lines written to the kernel's stdin right after it starts
    pub startup_input: Vec<String>,

    /// Lines written to the kernel's stdin when asking it to stop
    pub shutdown_input: Vec<String>,

    pub stop_timeout_ms: u64,
    pub ready_timeout_ms: u64,
    pub ready_poll_interval_ms: u64,
}

impl Default for ManagedConfig {
    fn default() -> Self {
        Self {
            executable: None,
            args: vec!["--name".to_string(), NAME_PLACEHOLDER.to_string()],
            startup_input: Vec::new(),
            shutdown_input: Vec::new(),
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            ready_poll_interval_ms: DEFAULT_READY_POLL_INTERVAL_MS,
        }
    }
}

impl ManagedConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set (e.g. "info", "kernel_link=debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level settings, one section per component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub discovery: DiscoveryConfig,
    pub managed: ManagedConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Validate configuration and return helpful errors
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.discovery.port == 0 {
            anyhow::bail!("discovery.port must be greater than 0");
        }

        if self.discovery.resolve_max_attempts == 0 {
            anyhow::bail!("discovery.resolve_max_attempts must be at least 1");
        }

        if self.discovery.resolve_attempt_timeout_ms == 0 {
            anyhow::bail!("discovery.resolve_attempt_timeout_ms must be greater than 0");
        }

        if self.managed.ready_poll_interval_ms == 0 {
            anyhow::bail!("managed.ready_poll_interval_ms must be greater than 0");
        }

        if let Some(ref path) = self.managed.executable {
            if path.as_os_str().is_empty() {
                anyhow::bail!("managed.executable must not be empty (remove it to disable managed kernels)");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.discovery.port, DEFAULT_DISCOVERY_PORT);
        assert_eq!(settings.discovery.resolve_max_attempts, 10);
        assert_eq!(settings.managed.executable, None);
        assert_eq!(settings.managed.args, vec!["--name", "{name}"]);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut settings = Settings::default();
        settings.discovery.resolve_max_attempts = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("resolve_max_attempts"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [discovery]
            port = 1800

            [managed]
            executable = "/opt/kernel/bin/kernel"
            "#,
        )
        .unwrap();

        assert_eq!(settings.discovery.port, 1800);
        assert_eq!(settings.discovery.group, DEFAULT_DISCOVERY_GROUP);
        assert_eq!(
            settings.managed.executable,
            Some(PathBuf::from("/opt/kernel/bin/kernel"))
        );
        assert_eq!(settings.managed.stop_timeout(), Duration::from_secs(10));
        assert_eq!(settings.logging.level, "info");
    }
}
