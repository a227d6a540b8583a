use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;

/// Incrementally import historical 1-minute OHLC candles into a sqlite3
/// database, resuming from the latest stored record on every invocation.
///
/// Exit status: 0 when every selected product caught up, 1 when any product
/// failed or the run could not start, 2 for usage errors.
#[derive(Parser)]
#[command(name = "ohlc-import", version)]
pub struct Cli {
    /// sqlite3 db file path
    pub db_file: PathBuf,

    /// Process candles since given date, YYYY-MM-DD format
    #[arg(short, long)]
    pub start_date: Option<NaiveDate>,

    /// Which product to update (default: all configured products)
    #[arg(short, long)]
    pub product: Option<String>,

    /// Loglevel: error|warn|info|debug|trace
    #[arg(short, long, default_value = "info")]
    pub loglevel: log::LevelFilter,
}
