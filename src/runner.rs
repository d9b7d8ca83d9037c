use crate::config::CampaignConfig;
use crate::dates::DateSampler;
use crate::error::{BacktestError, Result};
use crate::gateway::MarketDataGateway;
use crate::models::{ScoredAsset, TrialResult};
use crate::performance::PerformanceCalculator;
use crate::portfolio::{select_top, PortfolioModel};
use log::{debug, warn};
use serde::{Serialize, Serializer};
use std::result::Result as StdResult;

/// Progress of a single trial. `Failed` is reachable from every state before
/// `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrialState {
    Init,
    AssetsSelected,
    DatesSampled,
    PerformanceFetched,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialFailure {
    pub trial_index: usize,
    pub seed: u64,
    /// Last state the trial reached before the error.
    pub failed_in: TrialState,
    #[serde(serialize_with = "serialize_error")]
    pub error: BacktestError,
}

fn serialize_error<S: Serializer>(
    error: &BacktestError,
    serializer: S,
) -> StdResult<S::Ok, S::Error> {
    serializer.collect_str(error)
}

pub type TrialOutcome = StdResult<TrialResult, TrialFailure>;

/// Runs one trial against shared, read-only campaign inputs.
pub struct TrialRunner<'a> {
    gateway: &'a MarketDataGateway,
    scored_assets: &'a [ScoredAsset],
    portfolio: &'a PortfolioModel,
    config: &'a CampaignConfig,
    holding_years: u32,
}

impl<'a> TrialRunner<'a> {
    pub fn new(
        gateway: &'a MarketDataGateway,
        scored_assets: &'a [ScoredAsset],
        portfolio: &'a PortfolioModel,
        config: &'a CampaignConfig,
        holding_years: u32,
    ) -> Self {
        Self {
            gateway,
            scored_assets,
            portfolio,
            config,
            holding_years,
        }
    }

    pub fn run(&self, trial_index: usize, seed: u64) -> TrialOutcome {
        let mut state = TrialState::Init;
        match self.execute(trial_index, seed, &mut state) {
            Ok(result) => Ok(result),
            Err(error) => {
                let failed_in = state;
                transition(trial_index, &mut state, TrialState::Failed);
                warn!(
                    "Trial {} failed after reaching {:?}: {}",
                    trial_index, failed_in, error
                );
                Err(TrialFailure {
                    trial_index,
                    seed,
                    failed_in,
                    error,
                })
            }
        }
    }

    fn execute(
        &self,
        trial_index: usize,
        seed: u64,
        state: &mut TrialState,
    ) -> Result<TrialResult> {
        let selection = select_top(
            self.scored_assets,
            self.config.num_assets,
            self.config.selection_policy,
        )?;
        transition(trial_index, state, TrialState::AssetsSelected);

        let month_interval = i32::try_from(self.config.month_interval).map_err(|_| {
            BacktestError::InvalidRange(format!(
                "month_interval {} is too large",
                self.config.month_interval
            ))
        })?;
        let mut sampler = DateSampler::seeded(seed);
        let window = sampler.sample_window(
            self.config.reference_date,
            month_interval,
            self.holding_years,
        )?;
        transition(trial_index, state, TrialState::DatesSampled);

        let instrument_ids = selection.instrument_ids();
        let start_prices = self.gateway.fetch_close_price(&instrument_ids, window.start)?;
        let end_prices = self.gateway.fetch_close_price(&instrument_ids, window.end)?;
        let asset_performance =
            PerformanceCalculator::compute(&start_prices, &end_prices, &instrument_ids)?;

        let index_ids = vec![self.config.index_id.clone()];
        let index_start = self.gateway.fetch_close_price(&index_ids, window.start)?;
        let index_end = self.gateway.fetch_close_price(&index_ids, window.end)?;
        let index_performance =
            PerformanceCalculator::compute_one(&index_start, &index_end, &self.config.index_id)?;
        transition(trial_index, state, TrialState::PerformanceFetched);

        let (allocation, portfolio_return_pct) =
            self.portfolio.evaluate(&selection, &asset_performance)?;
        transition(trial_index, state, TrialState::Completed);

        debug!(
            "Trial {} ({} - {}): portfolio {:.2}%, index {:.2}%",
            trial_index,
            window.start,
            window.end,
            portfolio_return_pct,
            index_performance.simple_return_pct
        );

        Ok(TrialResult {
            trial_index,
            seed,
            strategy: self.portfolio.strategy_name().to_string(),
            selection,
            window,
            asset_performance,
            index_performance,
            portfolio_return_pct,
            allocation,
        })
    }
}

fn transition(trial_index: usize, state: &mut TrialState, next: TrialState) {
    debug!("Trial {}: {:?} -> {:?}", trial_index, state, next);
    *state = next;
}
