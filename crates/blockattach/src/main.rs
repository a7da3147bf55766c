//! blockattach CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use blockattach::cli::{Cli, LogFormat};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output
    let level = if cli.debug {
        "blockattach=debug"
    } else {
        "blockattach=info"
    };
    let filter = EnvFilter::from_default_env().add_directive(level.parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }

    // Execute command
    cli.execute().await
}
