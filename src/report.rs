use crate::campaign::CampaignReport;
use anyhow::{Context, Result};
use log::{info, warn};
use std::io::Write;

/// Downstream consumer of a finished campaign (exporters, chart renderers).
pub trait ReportSink {
    fn consume(&mut self, report: &CampaignReport) -> Result<()>;
}

/// Writes the full report as pretty JSON.
pub struct JsonReportWriter<W: Write> {
    writer: W,
}

impl<W: Write> JsonReportWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for JsonReportWriter<W> {
    fn consume(&mut self, report: &CampaignReport) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, report)
            .context("failed to serialize campaign report")?;
        self.writer
            .write_all(b"\n")
            .and_then(|_| self.writer.flush())
            .context("failed to write campaign report")
    }
}

/// Logs the headline statistics.
#[derive(Default)]
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn consume(&mut self, report: &CampaignReport) -> Result<()> {
        for failure in &report.failures {
            warn!(
                "Trial {} (seed {}) failed in {:?}: {}",
                failure.trial_index, failure.seed, failure.failed_in, failure.error
            );
        }

        let Some(stats) = report.summary.statistics() else {
            warn!(
                "No completed trials for {} ({} failed, {} skipped)",
                report.index_id,
                report.failures.len(),
                report.skipped_trials
            );
            return Ok(());
        };

        info!(
            "{}: {}/{} trials completed. Mean index return {:.2}%, mean portfolio return {:.2}%",
            report.index_id,
            stats.trials,
            report.requested_trials,
            stats.mean_index_return_pct,
            stats.mean_portfolio_return_pct
        );
        info!(
            "Alpha: mean {:.2}%, median {:.2}%, std dev {}, portfolio beat the index in {:.0}% of trials",
            stats.mean_alpha_pct,
            stats.median_alpha_pct,
            stats
                .alpha_std_dev_pct
                .map(|value| format!("{:.2}%", value))
                .unwrap_or_else(|| "n/a".to_string()),
            stats.outperformance_rate * 100.0
        );
        Ok(())
    }
}
