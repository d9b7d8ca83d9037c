use crate::error::{BacktestError, Result};
use crate::models::{AssetPerformance, PriceSnapshot};

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Simple and log percentage returns between two snapshots, in
    /// `instrument_ids` order. Every instrument must be priced in both.
    pub fn compute(
        start_prices: &PriceSnapshot,
        end_prices: &PriceSnapshot,
        instrument_ids: &[String],
    ) -> Result<Vec<AssetPerformance>> {
        instrument_ids
            .iter()
            .map(|instrument_id| Self::compute_one(start_prices, end_prices, instrument_id))
            .collect()
    }

    pub fn compute_one(
        start_prices: &PriceSnapshot,
        end_prices: &PriceSnapshot,
        instrument_id: &str,
    ) -> Result<AssetPerformance> {
        let start_price = Self::checked_price(start_prices, instrument_id)?;
        let end_price = Self::checked_price(end_prices, instrument_id)?;
        let ratio = end_price / start_price;

        Ok(AssetPerformance {
            instrument_id: instrument_id.to_string(),
            start_price,
            end_price,
            simple_return_pct: (ratio - 1.0) * 100.0,
            log_return_pct: ratio.ln() * 100.0,
        })
    }

    fn checked_price(snapshot: &PriceSnapshot, instrument_id: &str) -> Result<f64> {
        let price = snapshot
            .price(instrument_id)
            .ok_or_else(|| BacktestError::MissingPrice {
                instrument_id: instrument_id.to_string(),
                date: snapshot.as_of,
            })?;
        // A zero end price would make the log return -inf.
        if !price.is_finite() || price <= 0.0 {
            return Err(BacktestError::InvalidPrice {
                instrument_id: instrument_id.to_string(),
                date: snapshot.as_of,
                price,
            });
        }
        Ok(price)
    }
}
