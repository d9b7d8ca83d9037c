use crate::models::SummaryRow;
use serde::Serialize;
use statrs::statistics::{Data, Median, Statistics};

/// Per-trial (index, portfolio) returns in trial order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CampaignSummary {
    rows: Vec<SummaryRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStatistics {
    pub trials: usize,
    pub mean_index_return_pct: f64,
    pub mean_portfolio_return_pct: f64,
    pub mean_alpha_pct: f64,
    pub median_alpha_pct: f64,
    /// Sample standard deviation; needs at least two trials.
    pub alpha_std_dev_pct: Option<f64>,
    /// Fraction of trials where the portfolio beat the index.
    pub outperformance_rate: f64,
}

impl CampaignSummary {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, row: SummaryRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// (index_return_pct, portfolio_return_pct) pairs.
    pub fn pairs(&self) -> Vec<(f64, f64)> {
        self.rows
            .iter()
            .map(|row| (row.index_return_pct, row.portfolio_return_pct))
            .collect()
    }

    pub fn statistics(&self) -> Option<SummaryStatistics> {
        if self.rows.is_empty() {
            return None;
        }

        let index_returns: Vec<f64> = self.rows.iter().map(|row| row.index_return_pct).collect();
        let portfolio_returns: Vec<f64> = self
            .rows
            .iter()
            .map(|row| row.portfolio_return_pct)
            .collect();
        let alphas: Vec<f64> = self.rows.iter().map(SummaryRow::alpha_pct).collect();
        let outperforming = alphas.iter().filter(|alpha| **alpha > 0.0).count();

        let alpha_std_dev_pct = if alphas.len() > 1 {
            Some(alphas.iter().std_dev())
        } else {
            None
        };

        Some(SummaryStatistics {
            trials: self.rows.len(),
            mean_index_return_pct: index_returns.iter().mean(),
            mean_portfolio_return_pct: portfolio_returns.iter().mean(),
            mean_alpha_pct: alphas.iter().mean(),
            median_alpha_pct: Data::new(alphas.clone()).median(),
            alpha_std_dev_pct,
            outperformance_rate: outperforming as f64 / self.rows.len() as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(trial_index: usize, index_return_pct: f64, portfolio_return_pct: f64) -> SummaryRow {
        SummaryRow {
            trial_index,
            index_return_pct,
            portfolio_return_pct,
        }
    }

    #[test]
    fn empty_summary_has_no_statistics() {
        assert!(CampaignSummary::default().statistics().is_none());
    }

    #[test]
    fn statistics_over_alpha() {
        let mut summary = CampaignSummary::with_capacity(4);
        summary.push(row(0, 10.0, 12.0));
        summary.push(row(1, 20.0, 18.0));
        summary.push(row(2, -5.0, 1.0));
        summary.push(row(3, 0.0, 4.0));

        let stats = summary.statistics().unwrap();

        assert_eq!(stats.trials, 4);
        assert!((stats.mean_index_return_pct - 6.25).abs() < 1e-9);
        assert!((stats.mean_portfolio_return_pct - 8.75).abs() < 1e-9);
        // alphas: 2, -2, 6, 4
        assert!((stats.mean_alpha_pct - 2.5).abs() < 1e-9);
        assert!((stats.median_alpha_pct - 3.0).abs() < 1e-9);
        let expected_std = ((0.25 + 20.25 + 12.25 + 2.25) / 3.0_f64).sqrt();
        assert!((stats.alpha_std_dev_pct.unwrap() - expected_std).abs() < 1e-9);
        assert!((stats.outperformance_rate - 0.75).abs() < 1e-12);
    }

    #[test]
    fn single_trial_has_no_dispersion() {
        let mut summary = CampaignSummary::default();
        summary.push(row(0, 1.0, 2.0));
        let stats = summary.statistics().unwrap();
        assert_eq!(stats.alpha_std_dev_pct, None);
        assert_eq!(summary.pairs(), vec![(1.0, 2.0)]);
    }
}
