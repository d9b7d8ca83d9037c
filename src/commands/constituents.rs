use crate::config::parse_reference_date;
use crate::gateway::MarketDataGateway;
use crate::market_data_client::HttpMarketDataProvider;
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use log::info;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

/// Prints the members of `index_id` on `date` as a JSON array.
pub fn run(
    provider_url: &str,
    request_timeout_secs: u64,
    index_id: &str,
    date: &str,
    max_retries: usize,
) -> Result<()> {
    let as_of = parse_reference_date(date)?;
    let provider = HttpMarketDataProvider::new(
        provider_url,
        Some(Duration::from_secs(request_timeout_secs)),
    )?;
    let policy = RetryPolicy::new(max_retries, RetryPolicy::default().base_delay);
    let gateway = MarketDataGateway::new(Arc::new(provider), policy, 1);

    let constituents = gateway
        .fetch_constituents(index_id, as_of)
        .with_context(|| format!("failed to load constituents of {} on {}", index_id, as_of))?;
    info!(
        "{} had {} constituents on {}",
        index_id,
        constituents.len(),
        as_of
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &constituents)
        .context("failed to serialize constituents")?;
    out.write_all(b"\n")?;
    Ok(())
}
