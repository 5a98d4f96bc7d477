// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # toolgate
//!
//! Thin operator CLI around the gateway core. This binary is *not* the
//! model-facing JSON-RPC server, the bearer/JWT HTTP listener, or the rate
//! limiter — those are external collaborators the core's design names but
//! does not implement. `toolgate` exists so the library in `gateway-core`
//! is demonstrable and operable from a terminal: load configuration, run a
//! sync, watch interval sync in the foreground, or print the health
//! snapshot.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::GatewayManifest;
use gateway_core::application::SyncService;
use gateway_core::infrastructure::{CatalogStore, UpstreamManager};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "toolgate")]
#[command(version, about = "Operator CLI for the tool gateway", long_about = None)]
struct Cli {
    /// Path to the gateway config manifest (overrides discovery)
    #[arg(short, long, global = true, env = "TOOLGATE_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "TOOLGATE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Bind address for the Prometheus metrics exporter; omit to disable it
    #[arg(long, global = true, env = "TOOLGATE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run syncAllServers once and print a summary per server
    Sync,
    /// Run startIntervalSync in the foreground until signaled
    Serve,
    /// Print the current health snapshot as JSON
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let manifest = GatewayManifest::load(cli.config.clone())?;
    init_logging(cli.log_level.as_deref().unwrap_or(&manifest.spec.observability.log_level))?;
    if let Some(addr) = cli.metrics_addr {
        install_metrics(addr)?;
    }

    let catalog = Arc::new(CatalogStore::open(&manifest.spec.catalog.db_path).await?);
    catalog.upsert_servers(&manifest.spec.upstreams).await?;
    let upstream = Arc::new(UpstreamManager::new(manifest.spec.upstreams.clone())?);

    let result = match cli.command {
        Commands::Sync => run_sync(catalog.clone(), upstream.clone(), &manifest).await,
        Commands::Serve => run_serve(catalog.clone(), upstream.clone(), &manifest).await,
        Commands::Health => run_health(&upstream),
    };

    upstream.close_all().await;
    catalog.close().await;
    result
}

async fn run_sync(
    catalog: Arc<CatalogStore>,
    upstream: Arc<UpstreamManager>,
    manifest: &GatewayManifest,
) -> Result<()> {
    let service = SyncService::new(catalog, upstream, &manifest.spec.catalog.snapshot_dir)
        .context("preparing snapshot directory")?;
    let results = service.sync_all_servers().await;
    let mut had_failure = false;
    for (server_id, outcome) in results {
        match outcome {
            Ok(summary) => println!(
                "{server_id}: ok  hash={}  tools={}",
                summary.snapshot_hash, summary.tool_count
            ),
            Err(e) => {
                had_failure = true;
                println!("{server_id}: FAILED  {e}");
            }
        }
    }
    if had_failure {
        anyhow::bail!("one or more servers failed to sync");
    }
    Ok(())
}

async fn run_serve(
    catalog: Arc<CatalogStore>,
    upstream: Arc<UpstreamManager>,
    manifest: &GatewayManifest,
) -> Result<()> {
    let service = Arc::new(
        SyncService::new(catalog, upstream, &manifest.spec.catalog.snapshot_dir)
            .context("preparing snapshot directory")?,
    );
    info!(interval_seconds = manifest.spec.sync.interval_seconds, "serve.start");
    let handle = service.start_interval_sync(manifest.spec.sync.interval_seconds);
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("serve.shutdown");
    handle.abort();
    Ok(())
}

fn run_health(upstream: &UpstreamManager) -> Result<()> {
    let snapshot = upstream.get_health_snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("building log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

fn install_metrics(addr: SocketAddr) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing prometheus metrics exporter")?;
    info!(%addr, "metrics.exporter.installed");
    Ok(())
}
