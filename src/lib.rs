pub mod aggregation;
pub mod cli;
pub mod clock;
pub mod config;
pub mod db;
pub mod history;
pub mod input;
pub mod recorder;
pub mod store;
pub mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;

use cli::{Cli, Command};
use clock::{Clock, SystemClock};
use config::TrackerConfig;
use db::Database;
use history::{lookback_from_secs, render_table, HistoryQuery, HistorySummary};
use input::{EventSource, JsonLinesSource};
use recorder::{Recorder, RecorderSettings};
use store::{BucketStore, MemoryStore};

pub fn run() -> Result<()> {
    utils::init_logging();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run_cli(cli))
}

pub async fn run_cli(cli: Cli) -> Result<()> {
    let mut config = TrackerConfig::load_optional(cli.config.as_deref())?;
    if let Some(db_path) = cli.db {
        config.db_path = Some(db_path);
    }

    match cli.command {
        Command::Record {
            duration,
            input,
            dry_run,
        } => {
            record(
                &config,
                duration.map(std::time::Duration::from_secs),
                &input,
                dry_run,
            )
            .await
        }
        Command::History {
            lookback_secs,
            json,
        } => print_history(&config, lookback_secs, json).await,
    }
}

async fn record(
    config: &TrackerConfig,
    duration: Option<std::time::Duration>,
    input: &str,
    dry_run: bool,
) -> Result<()> {
    let store: Arc<dyn BucketStore> = if dry_run {
        info!("Dry run: buckets are kept in memory only");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(Database::new(config.resolved_db_path())?)
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (mut recorder, sender) = Recorder::start(store, clock, RecorderSettings::from(config));

    let mut live = recorder.subscribe();
    let live_view = tokio::spawn(async move {
        loop {
            match live.recv().await {
                Ok(notification) => debug!(
                    "Flushed {} buckets at {}",
                    notification.buckets.len(),
                    notification.flushed_at.to_rfc3339()
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Live view skipped {skipped} flush notifications")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut source: Box<dyn EventSource> = if input == "-" {
        Box::new(JsonLinesSource::stdin())
    } else {
        Box::new(JsonLinesSource::file(input))
    };
    let source_name = source.name().to_string();
    source
        .start(sender)
        .with_context(|| format!("failed to register input source {source_name}"))?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            info!("Interrupted, shutting down");
        }
        _ = sleep_for(duration) => info!("Run duration elapsed"),
        _ = recorder.wait() => info!("Input source {source_name} finished"),
    }

    source.stop()?;
    let report = recorder.stop().await?;
    if let Err(err) = live_view.await {
        warn!("Live view task failed: {err}");
    }

    let summary = HistorySummary {
        totals: report.totals,
        ..HistorySummary::default()
    };
    info!(
        "Recorded {} events ({} moves debounced), {} buckets written in {} flushes ({} failed)",
        report.events_recorded,
        report.moves_debounced,
        report.buckets_written,
        report.flushes,
        report.failed_flushes
    );
    for line in summary.render().lines() {
        info!("{line}");
    }
    Ok(())
}

async fn sleep_for(duration: Option<std::time::Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

async fn print_history(config: &TrackerConfig, lookback_secs: Option<i64>, json: bool) -> Result<()> {
    let database = Database::new(config.resolved_db_path())?;
    let query = HistoryQuery::new(Arc::new(database), Arc::new(SystemClock));

    let lookback = lookback_from_secs(lookback_secs.unwrap_or(config.history_lookback_secs))?;
    let buckets = query.recent(lookback).await?;
    let summary = HistorySummary::from_buckets(&buckets);

    if json {
        let payload = serde_json::json!({
            "buckets": buckets,
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print!("{}", render_table(&buckets));
        println!("{}", summary.render());
    }
    Ok(())
}
