use chrono::NaiveDate;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BacktestError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BacktestError {
    /// A date range or period that cannot produce a valid window.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The provider kept answering with empty or error responses.
    #[error(
        "Data unavailable for [{}] on {date} after {attempts} attempt(s){}",
        .instruments.join(", "),
        .last_error.as_deref().map(|e| format!(": {e}")).unwrap_or_default()
    )]
    DataUnavailable {
        instruments: Vec<String>,
        date: NaiveDate,
        attempts: usize,
        last_error: Option<String>,
    },

    #[error("Missing close price for {instrument_id} on {date}")]
    MissingPrice {
        instrument_id: String,
        date: NaiveDate,
    },

    #[error("Invalid close price {price} for {instrument_id} on {date}")]
    InvalidPrice {
        instrument_id: String,
        date: NaiveDate,
        price: f64,
    },

    #[error("Allocation references {0} but no performance record exists for it")]
    UnknownInstrument(String),

    #[error("Requested {requested} assets but only {available} are available")]
    InsufficientAssets { requested: usize, available: usize },

    #[error("Asset selection is empty")]
    EmptySelection,
}

impl BacktestError {
    /// Configuration problems abort a campaign before any trial runs.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            BacktestError::InvalidRange(_) | BacktestError::InvalidConfig(_)
        )
    }
}
