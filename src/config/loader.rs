// Configuration loader
// Layers built-in defaults, ~/.kernel-link/config.toml (or an explicit file),
// and KERNEL_LINK__SECTION__KEY environment overrides

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use std::path::{Path, PathBuf};

use super::constants::{CONFIG_DIR_NAME, ENV_PREFIX};
use super::settings::Settings;

/// Default location of the user config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join("config.toml"))
}

/// Load settings from the default file (if present) and the environment.
///
/// An explicit `path` must exist; the default path is optional.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let env = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true);

    match path {
        Some(path) => build_settings(Some((path, true)), env),
        None => {
            let default_path = default_config_path();
            build_settings(default_path.as_deref().map(|p| (p, false)), env)
        }
    }
}

fn build_settings(file: Option<(&Path, bool)>, env: Environment) -> Result<Settings> {
    let mut builder = ConfigBuilder::builder().add_source(
        ConfigBuilder::try_from(&Settings::default())
            .context("Failed to build default configuration")?,
    );

    if let Some((path, required)) = file {
        tracing::debug!(path = %path.display(), required, "Reading configuration file");
        builder = builder.add_source(File::from(path).required(required));
    }

    let settings: Settings = builder
        .add_source(env)
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    settings
        .validate()
        .context("Configuration validation failed")?;

    Ok(settings)
}

/// Render settings as TOML (used by `kernel-link config`)
pub fn render_settings(settings: &Settings) -> Result<String> {
    toml::to_string_pretty(settings).context("Failed to render configuration as TOML")
}
