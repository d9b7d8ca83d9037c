use crate::error::{BacktestError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// One row of the externally computed ranking table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredAsset {
    pub instrument_id: String,
    pub score: f64,
    #[serde(default)]
    pub name: Option<String>,
}

impl ScoredAsset {
    pub fn new(instrument_id: impl Into<String>, score: f64) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            score,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Top-K scored assets in descending score order. Built by `select_top`
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetSelection {
    assets: Vec<ScoredAsset>,
}

impl AssetSelection {
    pub(crate) fn new(assets: Vec<ScoredAsset>) -> Self {
        Self { assets }
    }

    pub fn assets(&self) -> &[ScoredAsset] {
        &self.assets
    }

    pub fn instrument_ids(&self) -> Vec<String> {
        self.assets
            .iter()
            .map(|asset| asset.instrument_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub holding_years: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetPerformance {
    pub instrument_id: String,
    pub start_price: f64,
    pub end_price: f64,
    pub simple_return_pct: f64,
    pub log_return_pct: f64,
}

/// Instrument weights as fractions of the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationMap {
    weights: BTreeMap<String, f64>,
}

impl AllocationMap {
    /// Builds an allocation, rejecting negative or non-finite weights and
    /// weights that do not sum to one.
    pub fn from_weights<I, S>(weights: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (instrument_id, weight) in weights {
            let instrument_id = instrument_id.into();
            if !weight.is_finite() || weight < 0.0 {
                return Err(BacktestError::InvalidConfig(format!(
                    "weight for {} must be a finite non-negative number (value: {})",
                    instrument_id, weight
                )));
            }
            *map.entry(instrument_id).or_insert(0.0) += weight;
        }
        if map.is_empty() {
            return Err(BacktestError::EmptySelection);
        }

        let total: f64 = map.values().sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(BacktestError::InvalidConfig(format!(
                "allocation weights must sum to 1 (sum: {})",
                total
            )));
        }

        Ok(Self { weights: map })
    }

    pub fn weight(&self, instrument_id: &str) -> Option<f64> {
        self.weights.get(instrument_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights
            .iter()
            .map(|(instrument_id, weight)| (instrument_id.as_str(), *weight))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.weights.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constituent {
    pub instrument_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Close prices for a set of instruments on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSnapshot {
    pub as_of: NaiveDate,
    pub prices: HashMap<String, f64>,
}

impl PriceSnapshot {
    pub fn price(&self, instrument_id: &str) -> Option<f64> {
        self.prices.get(instrument_id).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialResult {
    pub trial_index: usize,
    pub seed: u64,
    pub strategy: String,
    pub selection: AssetSelection,
    pub window: DateWindow,
    pub asset_performance: Vec<AssetPerformance>,
    pub index_performance: AssetPerformance,
    pub portfolio_return_pct: f64,
    pub allocation: AllocationMap,
}

impl TrialResult {
    pub fn summary_row(&self) -> SummaryRow {
        SummaryRow {
            trial_index: self.trial_index,
            index_return_pct: self.index_performance.simple_return_pct,
            portfolio_return_pct: self.portfolio_return_pct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SummaryRow {
    pub trial_index: usize,
    pub index_return_pct: f64,
    pub portfolio_return_pct: f64,
}

impl SummaryRow {
    pub fn alpha_pct(&self) -> f64 {
        self.portfolio_return_pct - self.index_return_pct
    }
}
