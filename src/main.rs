use std::process::ExitCode;

use clap::Parser;
use log::{debug, error};

use ohlc_import::cli::Cli;
use ohlc_import::error::Result;
use ohlc_import::fetch::{CandleFetcher, HttpCandleSource};
use ohlc_import::limiter::RateLimiter;
use ohlc_import::products;
use ohlc_import::run::{run, RunReport};
use ohlc_import::store::CandleStore;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.loglevel)
        .format_timestamp_millis()
        .init();

    match execute(cli).await {
        Ok(report) if report.all_done() => ExitCode::SUCCESS,
        Ok(report) => {
            error!("{} product(s) failed to sync", report.failed_count());
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<RunReport> {
    let selected = products::select(cli.product.as_deref())?;

    debug!("Database: {}", cli.db_file.display());
    let mut store = CandleStore::open(&cli.db_file)?;

    let source = HttpCandleSource::new()?;
    let fetcher = CandleFetcher::new(source, RateLimiter::default());

    // Window end for the whole run; fixed up front so the sync terminates
    // even while new candles keep arriving.
    let run_started = chrono::Utc::now().timestamp();

    Ok(run(&mut store, &fetcher, &selected, cli.start_date, run_started).await)
}
