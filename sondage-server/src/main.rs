// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Ingest daemon for the sondage telemetry aggregator.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warp::Filter;

use sondage::{Aggregator, AggregatorConfig, DedupPolicy, SubmitReceipt};

mod routes;

#[derive(Parser)]
#[command(name = "sondage-server", version, about = "Telemetry ingest daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP ingest daemon.
    Serve(ServeArgs),
    /// Push captured submission files through the aggregator.
    Replay(ReplayArgs),
}

#[derive(Args)]
struct StateArgs {
    /// Directory holding window checkpoints.
    #[arg(long, default_value = "/var/db/sondage")]
    data_dir: PathBuf,

    /// Merged submissions between checkpoint writes.
    #[arg(long, default_value_t = AggregatorConfig::DEFAULT_FLUSH_EVERY)]
    flush_every: u32,

    /// Count every daily submission instead of deduplicating by identifier.
    #[arg(long)]
    no_daily_dedup: bool,

    /// Count every monthly submission instead of deduplicating by identifier.
    #[arg(long)]
    no_monthly_dedup: bool,

    /// Skip the monthly window entirely.
    #[arg(long)]
    no_monthly: bool,

    /// Event field holding the submission identifier.
    #[arg(long, default_value = "uuid")]
    id_field: String,
}

#[derive(Args)]
struct ServeArgs {
    #[command(flatten)]
    state: StateArgs,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on.
    #[arg(long, default_value_t = 8082)]
    port: u16,

    /// Request header carrying the submitter's country code.
    #[arg(long, default_value = "X-Country-Code")]
    country_header: String,
}

#[derive(Args)]
struct ReplayArgs {
    #[command(flatten)]
    state: StateArgs,

    /// Country code attributed to replayed submissions.
    #[arg(long, default_value = "LOCALTEST")]
    country: String,

    /// Submission files, one JSON object each.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn build_aggregator(args: &StateArgs) -> anyhow::Result<Aggregator> {
    let mut config = AggregatorConfig::new(&args.data_dir)
        .flush_every(args.flush_every)
        .monthly_window(!args.no_monthly)
        .id_field(args.id_field.clone());
    if args.no_daily_dedup {
        config = config.daily_dedup(DedupPolicy::Disabled);
    }
    if args.no_monthly_dedup {
        config = config.monthly_dedup(DedupPolicy::Disabled);
    }
    config
        .initialize()
        .with_context(|| format!("could not load state from {}", args.data_dir.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Replay(args) => replay(args),
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let aggregator = Arc::new(build_aggregator(&args.state)?);
    let routes = routes::routes(Arc::clone(&aggregator), args.country_header)
        .recover(routes::handle_rejection);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn({
        let aggregator = Arc::clone(&aggregator);
        async move {
            termination_signal().await;
            info!("termination signal received");
            aggregator.shutdown();
            let _ = shutdown_tx.send(());
        }
    });

    let addr = SocketAddr::new(args.bind, args.port);
    let (bound, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        let _ = shutdown_rx.await;
    });
    info!(address = %bound, "listening for submissions");
    server.await;
    // The drain window can admit submissions after the signal-time
    // checkpoint.
    aggregator.flush();
    Ok(())
}

async fn termination_signal() {
    let interrupt = async {
        tokio::signal::ctrl_c()
            .await
            .expect("could not install interrupt handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("could not install termination handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

fn replay(args: ReplayArgs) -> anyhow::Result<()> {
    let aggregator = build_aggregator(&args.state)?;
    let mut merged = 0usize;
    let mut skipped = 0usize;
    for path in &args.files {
        match replay_file(&aggregator, path, &args.country) {
            Ok(receipt) if receipt.merged_any() => merged += 1,
            Ok(_) => {
                skipped += 1;
                info!(file = %path.display(), "already counted in every window");
            }
            Err(err) => {
                skipped += 1;
                warn!(file = %path.display(), "skipping file: {err:#}");
            }
        }
    }
    aggregator.flush();
    info!(merged, skipped, "replay complete");
    Ok(())
}

fn replay_file(
    aggregator: &Aggregator,
    path: &Path,
    country: &str,
) -> anyhow::Result<SubmitReceipt> {
    let bytes =
        std::fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
    let event: Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(aggregator.submit(&event, country)?)
}
