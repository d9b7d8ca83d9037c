use crate::campaign::BacktestCampaign;
use crate::config::CampaignConfig;
use crate::market_data_client::HttpMarketDataProvider;
use crate::report::{JsonReportWriter, LogReportSink, ReportSink};
use crate::scores::load_scored_assets;
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Flags for the `run` subcommand. Every `Some` value overrides the matching
/// key from the settings file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub settings_file: Option<PathBuf>,
    pub scores_file: PathBuf,
    pub provider_url: String,
    pub request_timeout_secs: u64,
    pub output: Option<PathBuf>,
    pub index_id: Option<String>,
    pub reference_date: Option<String>,
    pub num_assets: Option<usize>,
    pub num_trials: Option<usize>,
    pub holding_years: Option<u32>,
    pub seed: Option<u64>,
    pub max_retries: Option<usize>,
    pub concurrency: Option<usize>,
    pub month_interval: Option<u32>,
    pub allow_fewer: bool,
    pub fail_fast: bool,
    pub progress: bool,
}

pub fn run(options: &RunOptions) -> Result<()> {
    let config = resolve_config(options)?;
    let scored_assets = load_scored_assets(&options.scores_file)?;
    let provider = HttpMarketDataProvider::new(
        &options.provider_url,
        Some(Duration::from_secs(options.request_timeout_secs)),
    )?;
    info!("Using market data provider at {}", options.provider_url);

    let campaign = BacktestCampaign::new(config.clone(), Arc::new(provider), scored_assets)
        .context("invalid campaign configuration")?;
    let report = campaign
        .run(config.num_trials, config.holding_years)
        .context("campaign aborted")?;

    LogReportSink.consume(&report)?;
    match &options.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            JsonReportWriter::new(BufWriter::new(file)).consume(&report)?;
            info!("Campaign report written to {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            JsonReportWriter::new(stdout.lock()).consume(&report)?;
        }
    }

    if config.fail_fast && !report.failures.is_empty() {
        return Err(anyhow!(
            "campaign stopped after {} failed trial(s)",
            report.failures.len()
        ));
    }
    if report.summary.is_empty() {
        warn!("Campaign produced no completed trials");
    }
    Ok(())
}

/// Settings file first, then flag overrides, then validation.
pub fn resolve_config(options: &RunOptions) -> Result<CampaignConfig> {
    let mut settings = match &options.settings_file {
        Some(path) => load_settings_file(path)?,
        None => HashMap::new(),
    };
    apply_overrides(&mut settings, options);
    CampaignConfig::from_settings_map(&settings).context("invalid campaign settings")
}

/// Reads a JSON object of upper-snake keys. Scalars are stringified; nulls are
/// treated as unset.
pub fn load_settings_file(path: &Path) -> Result<HashMap<String, String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings from {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse settings from {}", path.display()))?;
    let Value::Object(entries) = value else {
        return Err(anyhow!(
            "settings file {} must contain a JSON object",
            path.display()
        ));
    };

    let mut settings = HashMap::with_capacity(entries.len());
    for (key, value) in entries {
        let text = match value {
            Value::Null => continue,
            Value::String(text) => text,
            Value::Bool(flag) => flag.to_string(),
            Value::Number(number) => number.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(anyhow!(
                    "setting {} in {} must be a string, number or boolean",
                    key,
                    path.display()
                ))
            }
        };
        settings.insert(key, text);
    }
    Ok(settings)
}

fn apply_overrides(settings: &mut HashMap<String, String>, options: &RunOptions) {
    let mut set = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            settings.insert(key.to_string(), value);
        }
    };
    set("INDEX_ID", options.index_id.clone());
    set("REFERENCE_DATE", options.reference_date.clone());
    set("NUM_ASSETS", options.num_assets.map(|v| v.to_string()));
    set("NUM_TRIALS", options.num_trials.map(|v| v.to_string()));
    set("HOLDING_YEARS", options.holding_years.map(|v| v.to_string()));
    set("RANDOM_SEED", options.seed.map(|v| v.to_string()));
    set("MAX_RETRIES", options.max_retries.map(|v| v.to_string()));
    set("CONCURRENCY_LIMIT", options.concurrency.map(|v| v.to_string()));
    set("MONTH_INTERVAL", options.month_interval.map(|v| v.to_string()));
    if options.allow_fewer {
        set("SELECTION_POLICY", Some("allow_fewer".to_string()));
    }
    if options.fail_fast {
        set("FAIL_FAST", Some("true".to_string()));
    }
    if options.progress {
        set("SHOW_PROGRESS", Some("true".to_string()));
    }
}
