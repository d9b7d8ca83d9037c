use anyhow::Result;
use clap::{Parser, Subcommand};
use index_backtest::commands::{constituents, run};
use index_backtest::config::DEFAULT_MAX_RETRIES;
use log::info;
use std::env;
use std::path::PathBuf;

const PROVIDER_URL_ENV: &str = "MARKET_DATA_URL";
const DEFAULT_PROVIDER_URL: &str = "http://localhost:8080";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "index-backtest")]
#[command(about = "Monte Carlo backtests of top-scored index members against the index")]
struct Cli {
    /// Base URL of the market data API (defaults to $MARKET_DATA_URL)
    #[arg(long = "provider-url", global = true, value_name = "URL")]
    provider_url: Option<String>,
    /// Per-request timeout in seconds
    #[arg(long = "timeout", global = true, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    timeout_secs: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest campaign and print the report as JSON
    Run {
        /// JSON array of {instrument_id, score, name?} rows
        #[arg(long = "scores", value_name = "PATH")]
        scores: PathBuf,
        /// JSON object of campaign settings (INDEX_ID, NUM_TRIALS, ...)
        #[arg(long = "settings", value_name = "PATH")]
        settings: Option<PathBuf>,
        /// Write the report here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Benchmark index identifier
        #[arg(long)]
        index_id: Option<String>,
        /// Earliest trial start, YYYYMMDD or YYYY-MM-DD
        #[arg(long)]
        reference_date: Option<String>,
        /// Top-scored assets held per trial
        #[arg(long)]
        num_assets: Option<usize>,
        #[arg(long)]
        num_trials: Option<usize>,
        #[arg(long)]
        holding_years: Option<u32>,
        /// Campaign seed; random when omitted
        #[arg(long)]
        seed: Option<u64>,
        /// Attempts per provider call
        #[arg(long)]
        max_retries: Option<usize>,
        /// Trials running at once
        #[arg(long)]
        concurrency: Option<usize>,
        /// Start dates are drawn from [reference, reference + N months)
        #[arg(long)]
        month_interval: Option<u32>,
        /// Hold every available asset when fewer than --num-assets are eligible
        #[arg(long)]
        allow_fewer: bool,
        /// Stop launching trials after the first failure
        #[arg(long)]
        fail_fast: bool,
        /// Show a progress bar
        #[arg(long)]
        progress: bool,
    },
    /// Print index constituents on a date
    Constituents {
        /// Index identifier
        index_id: String,
        /// YYYYMMDD or YYYY-MM-DD
        date: String,
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let provider_url = cli
        .provider_url
        .or_else(|| env::var(PROVIDER_URL_ENV).ok())
        .unwrap_or_else(|| DEFAULT_PROVIDER_URL.to_string());

    info!("Starting index-backtest. Past performance does not predict future returns.");

    match cli.command {
        Commands::Run {
            scores,
            settings,
            output,
            index_id,
            reference_date,
            num_assets,
            num_trials,
            holding_years,
            seed,
            max_retries,
            concurrency,
            month_interval,
            allow_fewer,
            fail_fast,
            progress,
        } => {
            let options = run::RunOptions {
                settings_file: settings,
                scores_file: scores,
                provider_url,
                request_timeout_secs: cli.timeout_secs,
                output,
                index_id,
                reference_date,
                num_assets,
                num_trials,
                holding_years,
                seed,
                max_retries,
                concurrency,
                month_interval,
                allow_fewer,
                fail_fast,
                progress,
            };
            run::run(&options)?;
        }
        Commands::Constituents {
            index_id,
            date,
            max_retries,
        } => {
            constituents::run(
                &provider_url,
                cli.timeout_secs,
                &index_id,
                &date,
                max_retries,
            )?;
        }
    }

    Ok(())
}
