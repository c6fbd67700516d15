// Kernel Link - command line entry point

use anyhow::Result;
use clap::Parser;

use kernel_link::cli::{run_command, Cli};
use kernel_link::config::load_settings;
use kernel_link::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref())?;

    let level = if cli.verbose {
        "info,kernel_link=debug".to_string()
    } else {
        settings.logging.level.clone()
    };
    init_logging(&level);

    run_command(cli.command, settings).await
}
