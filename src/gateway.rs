use crate::error::{BacktestError, Result};
use crate::models::{Constituent, PriceSnapshot};
use crate::retry::RetryPolicy;
use chrono::NaiveDate;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Raw answer to a constituents query. `error` mirrors the provider's own
/// per-call error indicator.
#[derive(Debug, Clone, Default)]
pub struct ConstituentsResponse {
    pub constituents: Vec<Constituent>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PriceResponse {
    pub prices: HashMap<String, f64>,
    pub error: Option<String>,
}

/// The external market data service. Transport failures are returned as
/// errors; provider-level failures come back in the response.
pub trait MarketDataProvider: Send + Sync {
    fn constituents(
        &self,
        index_id: &str,
        as_of: NaiveDate,
    ) -> anyhow::Result<ConstituentsResponse>;

    fn close_prices(
        &self,
        instrument_ids: &[String],
        as_of: NaiveDate,
    ) -> anyhow::Result<PriceResponse>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStatsSnapshot {
    pub attempts: usize,
    pub retries: usize,
    pub exhausted: usize,
}

#[derive(Default)]
struct GatewayStats {
    attempts: AtomicUsize,
    retries: AtomicUsize,
    exhausted: AtomicUsize,
}

/// Counting semaphore built on a bounded channel pre-filled with tokens.
#[derive(Clone)]
struct RequestPermits {
    give: Sender<()>,
    take: Receiver<()>,
}

impl RequestPermits {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (give, take) = bounded(capacity);
        for _ in 0..capacity {
            let _ = give.send(());
        }
        Self { give, take }
    }

    fn acquire(&self) -> Permit<'_> {
        // Both ends live in `self`, so the channel never disconnects here.
        let _ = self.take.recv();
        Permit { permits: self }
    }
}

struct Permit<'a> {
    permits: &'a RequestPermits,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.permits.give.send(());
    }
}

enum Attempt<T> {
    Ready(T),
    Retry(String),
}

/// Retry-tolerant front for a `MarketDataProvider`, shared by every trial of
/// a campaign.
pub struct MarketDataGateway {
    provider: Arc<dyn MarketDataProvider>,
    policy: RetryPolicy,
    permits: RequestPermits,
    stats: GatewayStats,
}

impl MarketDataGateway {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        policy: RetryPolicy,
        max_in_flight: usize,
    ) -> Self {
        Self {
            provider,
            policy,
            permits: RequestPermits::new(max_in_flight),
            stats: GatewayStats::default(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn stats(&self) -> GatewayStatsSnapshot {
        GatewayStatsSnapshot {
            attempts: self.stats.attempts.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            exhausted: self.stats.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Index members on `as_of`. A response with one row or fewer is treated
    /// as empty.
    pub fn fetch_constituents(
        &self,
        index_id: &str,
        as_of: NaiveDate,
    ) -> Result<Vec<Constituent>> {
        let instruments = vec![index_id.to_string()];
        self.with_retry("constituents", &instruments, as_of, || {
            match self.provider.constituents(index_id, as_of) {
                Err(err) => Attempt::Retry(format!("{:#}", err)),
                Ok(response) => match response.error {
                    Some(error) => Attempt::Retry(error),
                    None if response.constituents.len() <= 1 => Attempt::Retry(format!(
                        "{} constituent row(s) returned",
                        response.constituents.len()
                    )),
                    None => Attempt::Ready(response.constituents),
                },
            }
        })
    }

    /// Close prices on `as_of`. A non-empty answer without an error flag is
    /// returned as-is, even if some instruments are missing from it.
    pub fn fetch_close_price(
        &self,
        instrument_ids: &[String],
        as_of: NaiveDate,
    ) -> Result<PriceSnapshot> {
        if instrument_ids.is_empty() {
            return Err(BacktestError::EmptySelection);
        }
        self.with_retry("close prices", instrument_ids, as_of, || {
            match self.provider.close_prices(instrument_ids, as_of) {
                Err(err) => Attempt::Retry(format!("{:#}", err)),
                Ok(response) => match response.error {
                    Some(error) => Attempt::Retry(error),
                    None if response.prices.is_empty() => {
                        Attempt::Retry("empty price response".to_string())
                    }
                    None => Attempt::Ready(PriceSnapshot {
                        as_of,
                        prices: response.prices,
                    }),
                },
            }
        })
    }

    fn with_retry<T, F>(
        &self,
        label: &str,
        instruments: &[String],
        as_of: NaiveDate,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Attempt<T>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.stats.retries.fetch_add(1, Ordering::Relaxed);
            }
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let outcome = {
                let _permit = self.permits.acquire();
                call()
            };

            match outcome {
                Attempt::Ready(value) => {
                    debug!(
                        "Fetched {} for [{}] on {} (attempt {}/{})",
                        label,
                        instruments.join(", "),
                        as_of,
                        attempt,
                        max_attempts
                    );
                    return Ok(value);
                }
                Attempt::Retry(reason) => {
                    if attempt < max_attempts {
                        let delay = self.policy.delay_after(attempt);
                        warn!(
                            "Attempt {}/{} for {} of [{}] on {} failed: {}. Retrying in {}ms.",
                            attempt,
                            max_attempts,
                            label,
                            instruments.join(", "),
                            as_of,
                            reason,
                            delay.as_millis()
                        );
                        if !delay.is_zero() {
                            thread::sleep(delay);
                        }
                    } else {
                        warn!(
                            "Attempt {}/{} for {} of [{}] on {} failed: {}. Giving up.",
                            attempt,
                            max_attempts,
                            label,
                            instruments.join(", "),
                            as_of,
                            reason
                        );
                    }
                    last_error = Some(reason);
                }
            }
        }

        self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
        Err(BacktestError::DataUnavailable {
            instruments: instruments.to_vec(),
            date: as_of,
            attempts: max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Plays back a fixed script of responses, then repeats the last one.
    struct ScriptedProvider {
        prices: Mutex<Vec<anyhow::Result<PriceResponse>>>,
        constituents: Mutex<Vec<ConstituentsResponse>>,
        price_calls: AtomicUsize,
        constituent_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn with_prices(script: Vec<anyhow::Result<PriceResponse>>) -> Self {
            Self {
                prices: Mutex::new(script),
                constituents: Mutex::new(Vec::new()),
                price_calls: AtomicUsize::new(0),
                constituent_calls: AtomicUsize::new(0),
            }
        }

        fn with_constituents(script: Vec<ConstituentsResponse>) -> Self {
            Self {
                prices: Mutex::new(Vec::new()),
                constituents: Mutex::new(script),
                price_calls: AtomicUsize::new(0),
                constituent_calls: AtomicUsize::new(0),
            }
        }
    }

    impl MarketDataProvider for ScriptedProvider {
        fn constituents(
            &self,
            _index_id: &str,
            _as_of: NaiveDate,
        ) -> anyhow::Result<ConstituentsResponse> {
            self.constituent_calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.constituents.lock().unwrap();
            if script.len() > 1 {
                Ok(script.remove(0))
            } else {
                Ok(script.first().cloned().unwrap_or_default())
            }
        }

        fn close_prices(
            &self,
            _instrument_ids: &[String],
            _as_of: NaiveDate,
        ) -> anyhow::Result<PriceResponse> {
            self.price_calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.prices.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                match script.first() {
                    Some(Ok(response)) => Ok(response.clone()),
                    Some(Err(err)) => Err(anyhow::anyhow!("{}", err)),
                    None => Ok(PriceResponse::default()),
                }
            }
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 5, 2).unwrap()
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn prices(entries: &[(&str, f64)]) -> PriceResponse {
        PriceResponse {
            prices: entries
                .iter()
                .map(|(id, price)| (id.to_string(), *price))
                .collect(),
            error: None,
        }
    }

    fn errored(message: &str) -> PriceResponse {
        PriceResponse {
            prices: HashMap::new(),
            error: Some(message.to_string()),
        }
    }

    #[test]
    fn exhausts_exactly_max_retries_on_persistent_errors() {
        for max_retries in [1, 3, 5] {
            let provider = Arc::new(ScriptedProvider::with_prices(vec![Ok(errored("busy"))]));
            let gateway =
                MarketDataGateway::new(provider.clone(), RetryPolicy::immediate(max_retries), 2);

            let err = gateway
                .fetch_close_price(&ids(&["AAA.N"]), date())
                .unwrap_err();

            match err {
                BacktestError::DataUnavailable {
                    instruments,
                    date: failed_date,
                    attempts,
                    last_error,
                } => {
                    assert_eq!(instruments, ids(&["AAA.N"]));
                    assert_eq!(failed_date, date());
                    assert_eq!(attempts, max_retries);
                    assert_eq!(last_error.as_deref(), Some("busy"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
            assert_eq!(provider.price_calls.load(Ordering::SeqCst), max_retries);
            let stats = gateway.stats();
            assert_eq!(stats.attempts, max_retries);
            assert_eq!(stats.retries, max_retries - 1);
            assert_eq!(stats.exhausted, 1);
        }
    }

    #[test]
    fn recovers_after_empty_error_and_transport_failures() {
        let provider = Arc::new(ScriptedProvider::with_prices(vec![
            Ok(PriceResponse::default()),
            Err(anyhow::anyhow!("connection reset")),
            Ok(prices(&[("AAA.N", 101.5)])),
        ]));
        let gateway = MarketDataGateway::new(provider.clone(), RetryPolicy::immediate(3), 1);

        let snapshot = gateway.fetch_close_price(&ids(&["AAA.N"]), date()).unwrap();

        assert_eq!(snapshot.as_of, date());
        assert_eq!(snapshot.price("AAA.N"), Some(101.5));
        assert_eq!(provider.price_calls.load(Ordering::SeqCst), 3);
        assert_eq!(gateway.stats().retries, 2);
        assert_eq!(gateway.stats().exhausted, 0);
    }

    #[test]
    fn partial_price_response_is_returned_without_retry() {
        let provider = Arc::new(ScriptedProvider::with_prices(vec![Ok(prices(&[(
            "AAA.N", 10.0,
        )]))]));
        let gateway = MarketDataGateway::new(provider.clone(), RetryPolicy::immediate(3), 1);

        let snapshot = gateway
            .fetch_close_price(&ids(&["AAA.N", "BBB.N"]), date())
            .unwrap();

        assert_eq!(snapshot.price("BBB.N"), None);
        assert_eq!(provider.price_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_row_constituent_response_counts_as_empty() {
        let single = ConstituentsResponse {
            constituents: vec![Constituent {
                instrument_id: "AAA.N".to_string(),
                name: None,
            }],
            error: None,
        };
        let full = ConstituentsResponse {
            constituents: vec![
                Constituent {
                    instrument_id: "AAA.N".to_string(),
                    name: Some("Alpha".to_string()),
                },
                Constituent {
                    instrument_id: "BBB.N".to_string(),
                    name: Some("Beta".to_string()),
                },
            ],
            error: None,
        };
        let provider = Arc::new(ScriptedProvider::with_constituents(vec![single, full]));
        let gateway = MarketDataGateway::new(provider.clone(), RetryPolicy::immediate(3), 1);

        let constituents = gateway.fetch_constituents(".SPX", date()).unwrap();

        assert_eq!(constituents.len(), 2);
        assert_eq!(provider.constituent_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn constituents_fail_after_bound() {
        let provider = Arc::new(ScriptedProvider::with_constituents(Vec::new()));
        let gateway = MarketDataGateway::new(provider.clone(), RetryPolicy::immediate(2), 1);

        let err = gateway.fetch_constituents(".SPX", date()).unwrap_err();

        assert!(matches!(err, BacktestError::DataUnavailable { attempts: 2, .. }));
        assert_eq!(provider.constituent_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_instrument_list_is_rejected_without_calling_provider() {
        let provider = Arc::new(ScriptedProvider::with_prices(Vec::new()));
        let gateway = MarketDataGateway::new(provider.clone(), RetryPolicy::immediate(3), 1);

        assert_eq!(
            gateway.fetch_close_price(&[], date()).unwrap_err(),
            BacktestError::EmptySelection
        );
        assert_eq!(provider.price_calls.load(Ordering::SeqCst), 0);
    }

    struct SlowProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MarketDataProvider for SlowProvider {
        fn constituents(
            &self,
            _index_id: &str,
            _as_of: NaiveDate,
        ) -> anyhow::Result<ConstituentsResponse> {
            Ok(ConstituentsResponse::default())
        }

        fn close_prices(
            &self,
            instrument_ids: &[String],
            _as_of: NaiveDate,
        ) -> anyhow::Result<PriceResponse> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(PriceResponse {
                prices: instrument_ids.iter().map(|id| (id.clone(), 1.0)).collect(),
                error: None,
            })
        }
    }

    #[test]
    fn in_flight_requests_respect_the_cap() {
        let provider = Arc::new(SlowProvider {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let gateway = MarketDataGateway::new(provider.clone(), RetryPolicy::immediate(1), 2);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    gateway
                        .fetch_close_price(&ids(&["AAA.N"]), date())
                        .unwrap();
                });
            }
        });

        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gateway.stats().attempts, 8);
    }
}
