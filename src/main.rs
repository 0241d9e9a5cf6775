//! sluse - prefork HTTP/1.1 static file server
//!
//! # Usage
//! ```bash
//! sluse                 # read server.conf, or run on defaults
//! sluse /etc/sluse.conf # read an explicit configuration file
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sluse::config::Config;
use sluse::master::Master;

/// Prefork HTTP/1.1 static file server with bounded overload behavior
#[derive(Parser, Debug)]
#[command(name = "sluse")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (defaults to server.conf)
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging();
    tracing::info!("sluse v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => Config::load_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_default().context("failed to load server.conf")?,
    };

    let master = Master::new(config).context("initialization failed")?;
    master.run().context("server terminated abnormally")?;

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
