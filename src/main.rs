//! The ringsync hook entrypoint.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use structopt::StructOpt;
use tracing_subscriber::prelude::*;

use ringsync::cli::RingSync;
use ringsync::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Stdout carries cluster messages, so logs go to stderr.
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .with_ansi(false),
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cli = RingSync::from_args();
    let cfg = Arc::new(Config::new()?);
    tracing::debug!(
        swift_conf_dir = %cfg.swift_conf_dir,
        www_dir = %cfg.www_dir,
        broker_address = %cfg.broker_address,
        "starting ringsync",
    );
    let res = tokio::task::spawn_blocking(move || cli.run(cfg))
        .await
        .context("error joining ringsync task")?;

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    res
}
