use crate::campaign_status::CampaignStatus;
use crate::config::CampaignConfig;
use crate::dates::check_window_bounds;
use crate::error::Result;
use crate::gateway::{MarketDataGateway, MarketDataProvider};
use crate::models::{ScoredAsset, TrialResult};
use crate::portfolio::PortfolioModel;
use crate::retry::RetryPolicy;
use crate::runner::{TrialFailure, TrialOutcome, TrialRunner};
use crate::summary::CampaignSummary;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Stops a campaign from launching further trials. Trials already running
/// finish normally.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub index_id: String,
    pub base_seed: u64,
    pub requested_trials: usize,
    pub summary: CampaignSummary,
    pub results: Vec<TrialResult>,
    pub failures: Vec<TrialFailure>,
    /// Trials never started because the campaign was cancelled.
    pub skipped_trials: usize,
    pub cancelled: bool,
}

struct TrialTask {
    trial_index: usize,
    seed: u64,
}

pub struct BacktestCampaign {
    config: CampaignConfig,
    gateway: MarketDataGateway,
    scored_assets: Vec<ScoredAsset>,
    portfolio: PortfolioModel,
    status: CampaignStatus,
    cancel: CancellationToken,
}

impl BacktestCampaign {
    /// Fails with the configuration error before anything touches the
    /// provider.
    pub fn new(
        config: CampaignConfig,
        provider: Arc<dyn MarketDataProvider>,
        scored_assets: Vec<ScoredAsset>,
    ) -> Result<Self> {
        config.validate()?;
        let policy = RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
        );
        let gateway = MarketDataGateway::new(provider, policy, config.max_in_flight_requests);
        Ok(Self {
            config,
            gateway,
            scored_assets,
            portfolio: PortfolioModel::default(),
            status: CampaignStatus::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_portfolio_model(mut self, portfolio: PortfolioModel) -> Self {
        self.portfolio = portfolio;
        self
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    pub fn gateway(&self) -> &MarketDataGateway {
        &self.gateway
    }

    pub fn status(&self) -> CampaignStatus {
        self.status.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs `num_trials` independent trials. Trial failures are collected in
    /// the report; only configuration and universe errors abort the run.
    /// A fail-fast stop ends this run only; the campaign can run again.
    pub fn run(&self, num_trials: usize, holding_years: u32) -> Result<CampaignReport> {
        check_window_bounds(
            self.config.reference_date,
            self.config.month_interval,
            holding_years,
        )?;

        let base_seed = self.config.random_seed.unwrap_or_else(rand::random);
        info!(
            "Starting campaign on {}: {} trials, {} assets, {}-year holding period, reference {} (+{}m), seed {}",
            self.config.index_id,
            num_trials,
            self.config.num_assets,
            holding_years,
            self.config.reference_date,
            self.config.month_interval,
            base_seed
        );

        self.status.start(num_trials);
        self.status.set_phase("Loading index constituents");
        let universe = self.restrict_to_constituents()?;

        self.status.set_phase("Running trials");
        let runner = TrialRunner::new(
            &self.gateway,
            &universe,
            &self.portfolio,
            &self.config,
            holding_years,
        );
        let started = Instant::now();
        let halted = CancellationToken::new();
        let slots = self.execute_trials(&runner, num_trials, base_seed, &halted);

        let mut summary = CampaignSummary::with_capacity(num_trials);
        let mut results = Vec::with_capacity(num_trials);
        let mut failures = Vec::new();
        let mut skipped_trials = 0;
        for slot in slots {
            match slot {
                Some(Ok(result)) => {
                    summary.push(result.summary_row());
                    results.push(result);
                }
                Some(Err(failure)) => failures.push(failure),
                None => skipped_trials += 1,
            }
        }

        let cancelled = self.cancel.is_cancelled() || halted.is_cancelled();
        self.status.set_phase(if cancelled { "Cancelled" } else { "Completed" });
        let stats = self.gateway.stats();
        info!(
            "Campaign finished in {:.1}s: {} completed, {} failed, {} skipped ({} provider calls, {} retries)",
            started.elapsed().as_secs_f64(),
            results.len(),
            failures.len(),
            skipped_trials,
            stats.attempts,
            stats.retries
        );

        Ok(CampaignReport {
            index_id: self.config.index_id.clone(),
            base_seed,
            requested_trials: num_trials,
            summary,
            results,
            failures,
            skipped_trials,
            cancelled,
        })
    }

    /// Keeps only scored assets that are members of the index on the
    /// reference date.
    fn restrict_to_constituents(&self) -> Result<Vec<ScoredAsset>> {
        let constituents = self
            .gateway
            .fetch_constituents(&self.config.index_id, self.config.reference_date)?;
        let members: HashSet<&str> = constituents
            .iter()
            .map(|constituent| constituent.instrument_id.as_str())
            .collect();

        let (universe, dropped): (Vec<ScoredAsset>, Vec<ScoredAsset>) = self
            .scored_assets
            .iter()
            .cloned()
            .partition(|asset| members.contains(asset.instrument_id.as_str()));

        if !dropped.is_empty() {
            warn!(
                "Dropping {} scored asset(s) not in {} on {}: {}",
                dropped.len(),
                self.config.index_id,
                self.config.reference_date,
                dropped
                    .iter()
                    .map(|asset| asset.instrument_id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        info!(
            "{} has {} constituents; {} scored assets eligible",
            self.config.index_id,
            constituents.len(),
            universe.len()
        );
        Ok(universe)
    }

    fn execute_trials(
        &self,
        runner: &TrialRunner<'_>,
        num_trials: usize,
        base_seed: u64,
        halted: &CancellationToken,
    ) -> Vec<Option<TrialOutcome>> {
        let mut slots: Vec<Option<TrialOutcome>> = (0..num_trials).map(|_| None).collect();
        if num_trials == 0 {
            return slots;
        }

        let num_workers = num_trials.min(self.config.concurrency_limit).max(1);
        info!("Using {} worker threads", num_workers);

        let (tx, rx): (Sender<TrialTask>, Receiver<TrialTask>) = bounded(num_workers);
        let (result_tx, result_rx): (Sender<TrialOutcome>, Receiver<TrialOutcome>) = unbounded();

        let pb = if self.config.show_progress {
            let pb = ProgressBar::new(num_trials as u64);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        thread::scope(|scope| {
            for _worker_id in 0..num_workers {
                let rx = rx.clone();
                let result_tx = result_tx.clone();
                let cancel = &self.cancel;
                scope.spawn(move || {
                    while let Ok(task) = rx.recv() {
                        if cancel.is_cancelled() || halted.is_cancelled() {
                            continue;
                        }
                        let outcome = runner.run(task.trial_index, task.seed);
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(rx);
            drop(result_tx);

            let cancel = &self.cancel;
            let status = &self.status;
            scope.spawn(move || {
                for trial_index in 0..num_trials {
                    if cancel.is_cancelled() || halted.is_cancelled() {
                        info!(
                            "Cancellation requested; not launching trials {}..{}",
                            trial_index, num_trials
                        );
                        break;
                    }
                    let task = TrialTask {
                        trial_index,
                        seed: trial_seed(base_seed, trial_index),
                    };
                    if tx.send(task).is_err() {
                        break;
                    }
                    status.record_dispatch();
                }
            });

            while let Ok(outcome) = result_rx.recv() {
                let trial_index = match &outcome {
                    Ok(result) => result.trial_index,
                    Err(failure) => failure.trial_index,
                };
                self.status.record_outcome(outcome.is_ok());
                if outcome.is_err() && self.config.fail_fast && !halted.is_cancelled() {
                    warn!(
                        "Trial {} failed in fail-fast mode; stopping the campaign",
                        trial_index
                    );
                    halted.cancel();
                }
                pb.inc(1);
                slots[trial_index] = Some(outcome);
            }
        });

        let snapshot = self.status.snapshot();
        if snapshot.failed_trials > 0 {
            pb.finish_with_message("Campaign completed with failed trials");
        } else {
            pb.finish_with_message("Campaign completed");
        }
        slots
    }
}

/// Per-trial seed, a SplitMix64 step over the campaign seed and trial index,
/// so a trial's dates do not depend on which worker ran it.
pub fn trial_seed(base_seed: u64, trial_index: usize) -> u64 {
    let step = (trial_index as u64)
        .wrapping_add(1)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut z = base_seed.wrapping_add(step);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
