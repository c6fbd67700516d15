// Configuration module
// Public interface for configuration loading

pub mod constants;
mod loader;
mod settings;

pub use loader::{default_config_path, load_settings, render_settings};
pub use settings::{DiscoveryConfig, LoggingConfig, ManagedConfig, Settings};
