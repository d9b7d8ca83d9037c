use crate::config::SelectionPolicy;
use crate::error::{BacktestError, Result};
use crate::models::{AllocationMap, AssetPerformance, AssetSelection, ScoredAsset};
use log::warn;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Turns a selection into portfolio weights.
pub trait AllocationStrategy {
    fn name(&self) -> &str;
    fn compute_allocation(&self, selection: &AssetSelection) -> Result<AllocationMap>;
}

/// Every selected instrument gets `1 / n` of the portfolio.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualWeight;

impl AllocationStrategy for EqualWeight {
    fn name(&self) -> &str {
        "equal_weight"
    }

    fn compute_allocation(&self, selection: &AssetSelection) -> Result<AllocationMap> {
        equal_weight(selection)
    }
}

pub struct PortfolioModel {
    strategy: Box<dyn AllocationStrategy + Send + Sync>,
}

impl Default for PortfolioModel {
    fn default() -> Self {
        Self::new(Box::new(EqualWeight))
    }
}

impl PortfolioModel {
    pub fn new(strategy: Box<dyn AllocationStrategy + Send + Sync>) -> Self {
        Self { strategy }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn allocate(&self, selection: &AssetSelection) -> Result<AllocationMap> {
        self.strategy.compute_allocation(selection)
    }

    /// Allocation plus the weighted return it produces.
    pub fn evaluate(
        &self,
        selection: &AssetSelection,
        performances: &[AssetPerformance],
    ) -> Result<(AllocationMap, f64)> {
        let allocation = self.allocate(selection)?;
        let portfolio_return_pct = portfolio_return(&allocation, performances)?;
        Ok((allocation, portfolio_return_pct))
    }
}

/// Top `k` assets by descending score. The sort is stable, so tied assets
/// keep their table order; NaN scores sort last.
pub fn select_top(
    scored_assets: &[ScoredAsset],
    k: usize,
    policy: SelectionPolicy,
) -> Result<AssetSelection> {
    if k == 0 {
        return Err(BacktestError::EmptySelection);
    }
    if scored_assets.len() < k {
        match policy {
            SelectionPolicy::Strict => {
                return Err(BacktestError::InsufficientAssets {
                    requested: k,
                    available: scored_assets.len(),
                })
            }
            SelectionPolicy::AllowFewer => {
                if scored_assets.is_empty() {
                    return Err(BacktestError::EmptySelection);
                }
                warn!(
                    "Requested {} assets but only {} are available; proceeding with fewer",
                    k,
                    scored_assets.len()
                );
            }
        }
    }

    let mut ranked: Vec<&ScoredAsset> = scored_assets.iter().collect();
    ranked.sort_by(|a, b| compare_scores_desc(a.score, b.score));

    Ok(AssetSelection::new(
        ranked.into_iter().take(k).cloned().collect(),
    ))
}

fn compare_scores_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

pub fn equal_weight(selection: &AssetSelection) -> Result<AllocationMap> {
    if selection.is_empty() {
        return Err(BacktestError::EmptySelection);
    }
    let weight = 1.0 / selection.len() as f64;
    AllocationMap::from_weights(
        selection
            .assets()
            .iter()
            .map(|asset| (asset.instrument_id.clone(), weight)),
    )
}

/// Weighted sum of simple returns, in percent.
pub fn portfolio_return(
    allocation: &AllocationMap,
    performances: &[AssetPerformance],
) -> Result<f64> {
    let by_instrument: HashMap<&str, &AssetPerformance> = performances
        .iter()
        .map(|performance| (performance.instrument_id.as_str(), performance))
        .collect();

    let mut total = 0.0;
    for (instrument_id, weight) in allocation.iter() {
        let performance = by_instrument
            .get(instrument_id)
            .ok_or_else(|| BacktestError::UnknownInstrument(instrument_id.to_string()))?;
        total += (performance.simple_return_pct / 100.0) * weight;
    }
    Ok(total * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(scores: &[(&str, f64)]) -> Vec<ScoredAsset> {
        scores
            .iter()
            .map(|(id, score)| ScoredAsset::new(*id, *score))
            .collect()
    }

    fn performance(instrument_id: &str, simple_return_pct: f64) -> AssetPerformance {
        AssetPerformance {
            instrument_id: instrument_id.to_string(),
            start_price: 100.0,
            end_price: 100.0 + simple_return_pct,
            simple_return_pct,
            log_return_pct: (1.0 + simple_return_pct / 100.0).ln() * 100.0,
        }
    }

    #[test]
    fn selects_in_descending_score_order() {
        let assets = table(&[("E", 1.0), ("B", 4.0), ("A", 5.0), ("D", 2.0), ("C", 3.0)]);
        let selection = select_top(&assets, 3, SelectionPolicy::Strict).unwrap();
        assert_eq!(selection.instrument_ids(), vec!["A", "B", "C"]);
        assert_eq!(select_top(&assets, 3, SelectionPolicy::Strict).unwrap(), selection);
    }

    #[test]
    fn ties_keep_table_order() {
        let assets = table(&[("X", 5.0), ("Y", 5.0), ("Z", 3.0), ("W", 2.0), ("V", 1.0)]);
        let selection = select_top(&assets, 3, SelectionPolicy::Strict).unwrap();
        assert_eq!(selection.instrument_ids(), vec!["X", "Y", "Z"]);

        let swapped = table(&[("Y", 5.0), ("X", 5.0), ("Z", 3.0), ("W", 2.0), ("V", 1.0)]);
        let selection = select_top(&swapped, 3, SelectionPolicy::Strict).unwrap();
        assert_eq!(selection.instrument_ids(), vec!["Y", "X", "Z"]);
    }

    #[test]
    fn nan_scores_rank_last() {
        let assets = table(&[("N", f64::NAN), ("A", 1.0), ("B", 2.0)]);
        let selection = select_top(&assets, 2, SelectionPolicy::Strict).unwrap();
        assert_eq!(selection.instrument_ids(), vec!["B", "A"]);
    }

    #[test]
    fn strict_policy_rejects_short_tables() {
        let assets = table(&[("A", 1.0), ("B", 2.0)]);
        assert_eq!(
            select_top(&assets, 3, SelectionPolicy::Strict).unwrap_err(),
            BacktestError::InsufficientAssets {
                requested: 3,
                available: 2
            }
        );
    }

    #[test]
    fn allow_fewer_policy_returns_everything_available() {
        let assets = table(&[("A", 1.0), ("B", 2.0)]);
        let selection = select_top(&assets, 3, SelectionPolicy::AllowFewer).unwrap();
        assert_eq!(selection.instrument_ids(), vec!["B", "A"]);
        assert_eq!(
            select_top(&[], 3, SelectionPolicy::AllowFewer).unwrap_err(),
            BacktestError::EmptySelection
        );
    }

    #[test]
    fn zero_assets_requested_is_empty_selection() {
        let assets = table(&[("A", 1.0)]);
        assert_eq!(
            select_top(&assets, 0, SelectionPolicy::Strict).unwrap_err(),
            BacktestError::EmptySelection
        );
    }

    #[test]
    fn equal_weight_splits_evenly() {
        let assets = table(&[("A", 4.0), ("B", 3.0), ("C", 2.0), ("D", 1.0)]);
        let selection = select_top(&assets, 4, SelectionPolicy::Strict).unwrap();
        let allocation = equal_weight(&selection).unwrap();
        assert_eq!(allocation.len(), 4);
        for (_, weight) in allocation.iter() {
            assert_eq!(weight, 0.25);
        }
        assert!((allocation.total_weight() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn equal_weight_rejects_empty_selection() {
        let selection = AssetSelection::new(Vec::new());
        assert_eq!(
            equal_weight(&selection).unwrap_err(),
            BacktestError::EmptySelection
        );
    }

    #[test]
    fn portfolio_return_weights_simple_returns() {
        let allocation = AllocationMap::from_weights([("A", 0.5), ("B", 0.5)]).unwrap();
        let performances = vec![performance("A", 10.0), performance("B", -4.0)];
        let result = portfolio_return(&allocation, &performances).unwrap();
        assert!((result - 3.0).abs() < 1e-9);
    }

    #[test]
    fn portfolio_return_ignores_unallocated_performance() {
        let allocation = AllocationMap::from_weights([("A", 1.0)]).unwrap();
        let performances = vec![performance("A", 7.5), performance("Z", 90.0)];
        let result = portfolio_return(&allocation, &performances).unwrap();
        assert!((result - 7.5).abs() < 1e-9);
    }

    #[test]
    fn portfolio_return_requires_every_allocated_instrument() {
        let allocation = AllocationMap::from_weights([("A", 0.5), ("B", 0.5)]).unwrap();
        let performances = vec![performance("A", 10.0)];
        assert_eq!(
            portfolio_return(&allocation, &performances).unwrap_err(),
            BacktestError::UnknownInstrument("B".to_string())
        );
    }

    #[test]
    fn model_uses_its_strategy() {
        let model = PortfolioModel::default();
        assert_eq!(model.strategy_name(), "equal_weight");

        let assets = table(&[("A", 2.0), ("B", 1.0)]);
        let selection = select_top(&assets, 2, SelectionPolicy::Strict).unwrap();
        let performances = vec![performance("A", 10.0), performance("B", -10.0)];
        let (allocation, result) = model.evaluate(&selection, &performances).unwrap();
        assert_eq!(allocation.weight("A"), Some(0.5));
        assert!(result.abs() < 1e-9);
    }
}
