use crate::dates::check_window_bounds;
use crate::error::{BacktestError, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_INDEX_ID: &str = ".SPX";
pub const DEFAULT_REFERENCE_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2016, 1, 1) {
    Some(date) => date,
    None => panic!("invalid default reference date"),
};
pub const DEFAULT_NUM_ASSETS: usize = 10;
pub const DEFAULT_NUM_TRIALS: usize = 100;
pub const DEFAULT_HOLDING_YEARS: u32 = 3;
pub const DEFAULT_MONTH_INTERVAL: u32 = 6;
pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// What to do when the scored-asset table holds fewer than `num_assets` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SelectionPolicy {
    /// Fail the selection with `InsufficientAssets`.
    #[default]
    Strict,
    /// Proceed with every available asset.
    AllowFewer,
}

impl SelectionPolicy {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "allow_fewer" | "allow-fewer" | "fewer" => Ok(Self::AllowFewer),
            other => Err(BacktestError::InvalidConfig(format!(
                "SELECTION_POLICY must be STRICT or ALLOW_FEWER (value: {})",
                other
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::AllowFewer => "allow fewer",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignConfig {
    pub index_id: String,
    pub reference_date: NaiveDate,
    pub num_assets: usize,
    pub num_trials: usize,
    pub holding_years: u32,
    pub random_seed: Option<u64>,
    pub max_retries: usize,
    pub concurrency_limit: usize,

    // Sampling window after the reference date
    pub month_interval: u32,

    // Gateway limits
    pub max_in_flight_requests: usize,
    pub retry_base_delay_ms: u64,

    pub selection_policy: SelectionPolicy,
    pub fail_fast: bool,
    pub show_progress: bool,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let concurrency_limit = num_cpus::get().max(1);
        Self {
            index_id: DEFAULT_INDEX_ID.to_string(),
            reference_date: DEFAULT_REFERENCE_DATE,
            num_assets: DEFAULT_NUM_ASSETS,
            num_trials: DEFAULT_NUM_TRIALS,
            holding_years: DEFAULT_HOLDING_YEARS,
            random_seed: None,
            max_retries: DEFAULT_MAX_RETRIES,
            concurrency_limit,
            month_interval: DEFAULT_MONTH_INTERVAL,
            max_in_flight_requests: concurrency_limit,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            selection_policy: SelectionPolicy::Strict,
            fail_fast: false,
            show_progress: false,
        }
    }
}

impl CampaignConfig {
    /// Builds a config from upper-snake settings keys. Missing keys keep
    /// their defaults; present keys must parse.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let index_id = optional_setting(settings, "INDEX_ID")
            .map(str::to_string)
            .unwrap_or(defaults.index_id);
        let reference_date = match optional_setting(settings, "REFERENCE_DATE") {
            Some(raw) => parse_reference_date(raw)?,
            None => defaults.reference_date,
        };
        let num_assets = setting_usize_or(settings, "NUM_ASSETS", defaults.num_assets, 1)?;
        let num_trials = setting_usize_or(settings, "NUM_TRIALS", defaults.num_trials, 1)?;
        let holding_years =
            setting_usize_or(settings, "HOLDING_YEARS", defaults.holding_years as usize, 1)?;
        let random_seed = match optional_setting(settings, "RANDOM_SEED") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                BacktestError::InvalidConfig(format!(
                    "Setting RANDOM_SEED must be a non-negative integer (value: {})",
                    raw
                ))
            })?),
            None => None,
        };
        let max_retries = setting_usize_or(settings, "MAX_RETRIES", defaults.max_retries, 1)?;
        let concurrency_limit =
            setting_usize_or(settings, "CONCURRENCY_LIMIT", defaults.concurrency_limit, 1)?;
        let month_interval = setting_usize_or(
            settings,
            "MONTH_INTERVAL",
            defaults.month_interval as usize,
            1,
        )?;
        let max_in_flight_requests = setting_usize_or(
            settings,
            "MAX_IN_FLIGHT_REQUESTS",
            concurrency_limit,
            1,
        )?;
        let retry_base_delay_ms = setting_usize_or(
            settings,
            "RETRY_BASE_DELAY_MS",
            defaults.retry_base_delay_ms as usize,
            0,
        )? as u64;
        let selection_policy = match optional_setting(settings, "SELECTION_POLICY") {
            Some(raw) => SelectionPolicy::parse(raw)?,
            None => defaults.selection_policy,
        };
        let fail_fast = setting_bool_or(settings, "FAIL_FAST", defaults.fail_fast)?;
        let show_progress = setting_bool_or(settings, "SHOW_PROGRESS", defaults.show_progress)?;

        let config = Self {
            index_id,
            reference_date,
            num_assets,
            num_trials,
            holding_years: to_u32("HOLDING_YEARS", holding_years)?,
            random_seed,
            max_retries,
            concurrency_limit,
            month_interval: to_u32("MONTH_INTERVAL", month_interval)?,
            max_in_flight_requests,
            retry_base_delay_ms,
            selection_policy,
            fail_fast,
            show_progress,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field a campaign relies on before any trial runs.
    pub fn validate(&self) -> Result<()> {
        if self.index_id.trim().is_empty() {
            return Err(BacktestError::InvalidConfig(
                "index_id must not be empty".to_string(),
            ));
        }
        if self.num_assets == 0 {
            return Err(BacktestError::InvalidConfig(
                "num_assets must be >= 1".to_string(),
            ));
        }
        check_window_bounds(self.reference_date, self.month_interval, self.holding_years)?;
        if self.max_retries == 0 {
            return Err(BacktestError::InvalidConfig(
                "max_retries must be >= 1".to_string(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(BacktestError::InvalidConfig(
                "concurrency_limit must be >= 1".to_string(),
            ));
        }
        if self.max_in_flight_requests == 0 {
            return Err(BacktestError::InvalidConfig(
                "max_in_flight_requests must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Accepts `YYYYMMDD` (the provider's format) or `YYYY-MM-DD`.
pub fn parse_reference_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .map_err(|_| {
            BacktestError::InvalidConfig(format!(
                "Reference date must be in YYYYMMDD or YYYY-MM-DD format (value: {})",
                raw
            ))
        })
}

pub fn format_provider_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_usize_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw.parse::<f64>().map_err(|_| {
        BacktestError::InvalidConfig(format!("Setting {} must be a number (value: {})", key, raw))
    })?;
    if !value.is_finite() {
        return Err(BacktestError::InvalidConfig(format!(
            "Setting {} must be finite (value: {})",
            key, raw
        )));
    }
    if value.fract() != 0.0 {
        return Err(BacktestError::InvalidConfig(format!(
            "Setting {} must be an integer (value: {})",
            key, raw
        )));
    }
    if value < min as f64 {
        return Err(BacktestError::InvalidConfig(format!(
            "Setting {} must be >= {} (value: {})",
            key, min, raw
        )));
    }
    Ok(value as usize)
}

fn setting_bool_or(settings: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BacktestError::InvalidConfig(format!(
            "Setting {} must be a boolean (value: {})",
            key, raw
        ))),
    }
}

fn to_u32(key: &str, value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        BacktestError::InvalidConfig(format!("Setting {} is too large (value: {})", key, value))
    })
}
