use anyhow::Context;
use clap::Parser;
use std::io;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feeledgerd::config::{Args, Config};
use feeledgerd::state::AppState;
use feeledgerd::{db, http, ipc};

fn main() -> anyhow::Result<()> {
    let config = Config::load(Args::parse())?;
    init_logging(&config.log_level);

    let conn = db::open_db(&config.db_path)?;
    info!(
        db = %config.db_path.display(),
        rescale_policy = %config.ledger.rescale_policy,
        "fee ledger database ready"
    );
    let state = AppState::new(conn, config.ledger.clone());

    if config.stdio {
        // stdout carries protocol responses; logs stay on stderr.
        let stdin = io::stdin();
        let stdout = io::stdout();
        return ipc::serve_stdio(&state, stdin.lock(), stdout.lock());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(http::serve(state, config.listen))
}

/// `RUST_LOG`, when set, takes precedence over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
