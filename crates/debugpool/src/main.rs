//! # debugpool
//!
//! Pool administration and interactive debugger sessions on shared
//! MSP430 debug adapters.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use debugpool::{interact, Cli};
use debugpool_core::Config;
use debugpool_manager::DevicePool;
use debugpool_session::{PtyLauncher, SessionDriver};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    // Initialize logging on stderr; stdout carries session output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("debugpool v{} starting", env!("CARGO_PKG_VERSION"));

    let pool = DevicePool::open(&config).context("opening device pool")?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if !cli.wants_session() {
        cli.administer(&pool, &mut out)?;
        out.flush()?;
        return Ok(());
    }

    let launcher = PtyLauncher::from_settings(&config.debugger);
    let driver = SessionDriver::new(Arc::new(pool), Arc::new(launcher), &config);
    let mut session = driver.start_session().context("starting debugger session")?;

    interact(&mut session, std::io::stdin().lock(), &mut out)?;

    tracing::info!("debugpool shutting down");
    Ok(())
}
