use crate::config::format_provider_date;
use crate::gateway::{ConstituentsResponse, MarketDataProvider, PriceResponse};
use crate::models::Constituent;
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

const MARKET_DATA_API_KEY_ENV: &str = "MARKET_DATA_API_KEY";
const MAX_ERROR_BODY_CHARS: usize = 2048;

#[derive(Deserialize)]
struct ConstituentsPayload {
    #[serde(default)]
    constituents: Vec<Constituent>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct PricesPayload {
    #[serde(default)]
    prices: HashMap<String, Option<f64>>,
    #[serde(default)]
    error: Option<String>,
}

/// `MarketDataProvider` over a JSON HTTP API:
/// `GET /constituents?index=..&date=YYYYMMDD` and
/// `GET /prices?instruments=A,B&date=YYYYMMDD`.
pub struct HttpMarketDataProvider {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpMarketDataProvider {
    /// Reads the bearer key from `MARKET_DATA_API_KEY` when set.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(anyhow!("market data base URL must not be empty"));
        }
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key: None,
        }
        .with_api_key(env::var(MARKET_DATA_API_KEY_ENV).ok()))
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }

    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.get(&url).query(query);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .with_context(|| format!("request to {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(anyhow!("{} returned {}: {}", url, status, body));
        }
        response
            .json::<T>()
            .with_context(|| format!("failed to decode response from {}", url))
    }
}

impl MarketDataProvider for HttpMarketDataProvider {
    fn constituents(&self, index_id: &str, as_of: NaiveDate) -> Result<ConstituentsResponse> {
        let payload: ConstituentsPayload = self.get(
            "/constituents",
            &[
                ("index", index_id.to_string()),
                ("date", format_provider_date(as_of)),
            ],
        )?;
        Ok(ConstituentsResponse {
            constituents: payload.constituents,
            error: payload.error,
        })
    }

    /// Null prices are dropped so they surface as missing downstream.
    fn close_prices(&self, instrument_ids: &[String], as_of: NaiveDate) -> Result<PriceResponse> {
        let payload: PricesPayload = self.get(
            "/prices",
            &[
                ("instruments", instrument_ids.join(",")),
                ("date", format_provider_date(as_of)),
            ],
        )?;
        Ok(PriceResponse {
            prices: payload
                .prices
                .into_iter()
                .filter_map(|(instrument_id, price)| price.map(|price| (instrument_id, price)))
                .collect(),
            error: payload.error,
        })
    }
}
