use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use podmerge::config::Config;
use podmerge::server;
use podmerge::storage::Database;
use podmerge::sync::SyncEngine;

#[derive(Parser, Debug)]
#[command(
    name = "podmerge",
    about = "Merges multiple podcast RSS sources into one deduplicated feed"
)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Path to the SQLite database file
    #[arg(long, default_value = "podmerge.db")]
    database: PathBuf,

    /// Address to serve the merged feeds on
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Run a single sync pass and exit instead of serving
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config =
        Config::load(&args.config).with_context(|| format!("in {}", args.config.display()))?;

    let db_path = args
        .database
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("invalid UTF-8 in database path"))?;
    let db = Database::open(db_path)
        .await
        .context("failed to open database")?;

    // Seed configured feeds; existing sync state (episodes,
    // last_build_date) is preserved across restarts.
    for (name, feed_config) in &config.feeds {
        db.upsert_feed(&feed_config.to_feed(name))
            .await
            .with_context(|| format!("failed to seed feed {name:?}"))?;
        tracing::info!(feed = %name, "feed configured");
    }

    let client = reqwest::Client::builder()
        .user_agent(concat!("podmerge/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let engine = Arc::new(SyncEngine::new(db.clone(), client));

    // Initial pass so the serving state is populated before the first tick
    engine.sync_all().await;
    if args.once {
        return Ok(());
    }

    let interval = Duration::from_secs(config.poll_interval_secs);
    let scheduler = tokio::spawn({
        let engine = engine.clone();
        async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the immediate first tick; initial pass already ran
            loop {
                ticker.tick().await;
                engine.sync_all().await;
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(addr = %args.bind, "serving merged feeds");
    axum::serve(listener, server::router(db))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // An interrupted cycle is equivalent to a skipped one; nothing
    // partial was committed.
    scheduler.abort();
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to listen for shutdown signal");
    }
}
