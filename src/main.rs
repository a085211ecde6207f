//! ==============================================================================
//! main.rs - tag-sync entry point
//! ==============================================================================
//!
//! purpose:
//!     command line front end for the sync engine. three subcommands:
//!
//!         init      authorize against the tag api and store the access token
//!         run       poll forever, storing only readings newer than the watermarks
//!         backfill  resync one calendar day, ignoring watermarks
//!
//! exit codes:
//!     0  success
//!     1  runtime failure (fetch, store, state backend, abort policy)
//!     2  usage or configuration error
//!
//! relationships:
//!     - config.rs: tag-sync.toml schema
//!     - auth.rs: oauth handshake for `init` (and `run` without a token)
//!     - poller.rs / backfill.rs: the two drivers of engine.rs
//!     - watermark/: ledger + token, persisted through the configured backend
//!
//! architecture:
//!
//!     ┌──────────────┐    ┌─────────────┐    ┌──────────────┐
//!     │ tag api      │───>│ sync engine │───>│ opentsdb     │
//!     │ (tags/)      │    │ (engine.rs) │    │ (sink.rs)    │
//!     └──────────────┘    └──────┬──────┘    └──────────────┘
//!                                │
//!                         ┌──────┴──────┐
//!                         │ watermarks  │ -> file or redis
//!                         └─────────────┘
//!
//! ==============================================================================

mod auth;
mod backfill;
mod config;
mod domain;
mod engine;
mod error;
mod normalize;
mod poller;
mod sink;
mod tags;
mod watermark;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, TagSyncConfig};
use crate::poller::Poller;
use crate::sink::OpenTsdbSink;
use crate::tags::WirelessTagClient;
use crate::watermark::WatermarkStore;

#[derive(Parser)]
#[command(name = "tag-sync", version, about = "Sync wireless tag readings into OpenTSDB")]
struct Cli {
    /// path to the toml config file
    #[arg(short, long, global = true, default_value = "tag-sync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Authorize against the tag api and store the access token
    Init,
    /// Poll continuously, storing only new readings
    Run,
    /// Fetch and store every reading for one day, ignoring watermarks
    Backfill {
        /// day to resync, YYYY-MM-DD
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
    },
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    // clap prints usage and exits 2 on its own
    let cli = Cli::parse();

    let config = match TagSyncConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            init_tracing("info");
            error!("{e:#}");
            return ExitCode::from(2);
        }
    };
    init_tracing(&config.logging.level);
    config.log_summary();

    match execute(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// configuration problems exit 2, everything else is a runtime failure
fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ConfigError>().is_some() {
        2
    } else {
        1
    }
}

/// RUST_LOG wins over the configured level
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn execute(command: Command, config: &TagSyncConfig) -> Result<()> {
    if matches!(command, Command::Init) {
        config.require_oauth()?;
    }
    let backend = config
        .state
        .backend()
        .map_err(|e| ConfigError(format!("[state] {e}")))?;
    let mut store = WatermarkStore::load_or_create(backend)
        .await
        .context("loading watermark state")?;
    info!(backend = %store.describe_backend(), empty = store.ledger().is_empty(), "state loaded");

    match command {
        Command::Init => init(config, &mut store).await,
        Command::Run => run(config, &mut store).await,
        Command::Backfill { date } => run_backfill(config, &mut store, date).await,
    }
}

// ==============================================================================
// subcommands
// ==============================================================================

async fn init(config: &TagSyncConfig, store: &mut WatermarkStore) -> Result<()> {
    let token = auth::acquire_credential(config).await?;
    store.set_access_token(token.clone());
    store.persist().await.context("saving access token")?;
    info!(backend = %store.describe_backend(), "access token saved");

    // sanity check the token against the api
    let client = WirelessTagClient::new(config.api.base_url.clone(), token);
    let managers = client.get_tag_managers().await.context("listing tag managers")?;
    for manager in &managers {
        info!(name = %manager.name, mac = %manager.mac, online = manager.online, "tag manager");
    }
    info!(count = managers.len(), "init complete");
    Ok(())
}

async fn run(config: &TagSyncConfig, store: &mut WatermarkStore) -> Result<()> {
    let token = match store.access_token().map(str::to_string) {
        Some(token) => token,
        None => {
            info!("no access token stored, starting authorization");
            let token = auth::acquire_credential(config).await?;
            store.set_access_token(token.clone());
            store.persist().await.context("saving access token")?;
            token
        }
    };

    let source = WirelessTagClient::new(config.api.base_url.clone(), token);
    let sink = OpenTsdbSink::new(
        &config.opentsdb.host,
        config.opentsdb.port,
        &config.opentsdb.metrics_prefix,
    );

    let mut poller = Poller::new(
        &source,
        &sink,
        store,
        config.query_stats.clone(),
        config.convert_to_f,
        config.on_error,
        config.poll_interval(),
    );
    poller.run().await?;
    Ok(())
}

async fn run_backfill(config: &TagSyncConfig, store: &mut WatermarkStore, date: NaiveDate) -> Result<()> {
    let token = store
        .access_token()
        .ok_or_else(|| anyhow!("no access token stored, run `tag-sync init` first"))?
        .to_string();

    let source = WirelessTagClient::new(config.api.base_url.clone(), token);
    let sink = OpenTsdbSink::new(
        &config.opentsdb.host,
        config.opentsdb.port,
        &config.opentsdb.metrics_prefix,
    );

    let report = backfill::backfill(&source, &sink, &config.query_stats, config.convert_to_f, date).await?;
    let total: usize = report.iter().map(|(_, stored)| stored).sum();
    info!(%date, stored = total, "backfill complete");

    store.persist().await.context("saving state")?;
    Ok(())
}
