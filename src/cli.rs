use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Local keyboard and pointer activity recorder.
///
/// Aggregates input events into one-second buckets and stores them in SQLite.
#[derive(Parser, Debug)]
#[command(name = "activity-tracker", version, about)]
pub struct Cli {
    /// JSON config file; CLI flags override its values.
    #[arg(long, global = true, env = "ACTIVITY_TRACKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite store location.
    #[arg(long, global = true, env = "ACTIVITY_TRACKER_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record input events until the duration ends, Ctrl-C, or input ends.
    Record {
        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<u64>,

        /// Newline-delimited JSON events; `-` reads stdin.
        #[arg(long, default_value = "-")]
        input: String,

        /// Keep everything in memory instead of writing the store.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Print recent buckets and totals from the store.
    History {
        /// Window to show, counted back from now.
        #[arg(long)]
        lookback_secs: Option<i64>,

        /// Emit JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
