use crate::error::{BacktestError, Result};
use crate::models::DateWindow;
use chrono::{Months, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Draws trial windows. Generic over the RNG so callers can seed it.
pub struct DateSampler<R: Rng> {
    rng: R,
}

impl DateSampler<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> DateSampler<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Uniform draw from `[reference_date, reference_date + month_interval months)`.
    pub fn sample_start(
        &mut self,
        reference_date: NaiveDate,
        month_interval: i32,
    ) -> Result<NaiveDate> {
        if month_interval <= 0 {
            return Err(BacktestError::InvalidRange(format!(
                "month_interval must be > 0 (value: {})",
                month_interval
            )));
        }
        let upper = reference_date
            .checked_add_months(Months::new(month_interval as u32))
            .ok_or_else(|| {
                BacktestError::InvalidRange(format!(
                    "{} + {} months is out of the supported date range",
                    reference_date, month_interval
                ))
            })?;
        let days_between = (upper - reference_date).num_days();
        if days_between <= 0 {
            return Err(BacktestError::InvalidRange(format!(
                "sampling window starting {} has no days",
                reference_date
            )));
        }

        let offset = self.rng.gen_range(0..days_between);
        Ok(reference_date + chrono::Duration::days(offset))
    }

    pub fn sample_window(
        &mut self,
        reference_date: NaiveDate,
        month_interval: i32,
        holding_years: u32,
    ) -> Result<DateWindow> {
        let start = self.sample_start(reference_date, month_interval)?;
        let end = compute_end(start, holding_years)?;
        Ok(DateWindow {
            start,
            end,
            holding_years,
        })
    }
}

/// Same month and day `holding_years` later. Feb 29 lands on Feb 28 when the
/// target year is not a leap year.
pub fn compute_end(start_date: NaiveDate, holding_years: u32) -> Result<NaiveDate> {
    let months = holding_years.checked_mul(12).ok_or_else(|| {
        BacktestError::InvalidRange(format!(
            "holding period of {} years is too long",
            holding_years
        ))
    })?;
    start_date
        .checked_add_months(Months::new(months))
        .ok_or_else(|| {
            BacktestError::InvalidRange(format!(
                "{} + {} years is out of the supported date range",
                start_date, holding_years
            ))
        })
}

/// Checks that every window a sampler can draw from `reference_date` stays
/// inside the calendar: the sampling upper bound and the last possible start
/// plus `holding_years`. Returns the month interval as the sampler takes it.
pub fn check_window_bounds(
    reference_date: NaiveDate,
    month_interval: u32,
    holding_years: u32,
) -> Result<i32> {
    let months = i32::try_from(month_interval).map_err(|_| {
        BacktestError::InvalidRange(format!("month_interval {} is too large", month_interval))
    })?;
    if months <= 0 {
        return Err(BacktestError::InvalidRange(
            "month_interval must be >= 1".to_string(),
        ));
    }
    if holding_years == 0 {
        return Err(BacktestError::InvalidRange(
            "holding_years must be >= 1".to_string(),
        ));
    }

    let upper = reference_date
        .checked_add_months(Months::new(month_interval))
        .ok_or_else(|| {
            BacktestError::InvalidRange(format!(
                "{} + {} months is out of the supported date range",
                reference_date, month_interval
            ))
        })?;
    let last_start = upper.pred_opt().unwrap_or(reference_date);
    compute_end(last_start, holding_years)?;
    Ok(months)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn window_bounds_accept_ordinary_campaigns() {
        assert_eq!(check_window_bounds(date(2016, 1, 1), 6, 3).unwrap(), 6);
    }

    #[test]
    fn window_bounds_reject_calendar_overflow() {
        for (months, years) in [(0, 3), (6, 0), (4_000_000, 3), (6, 300_000), (u32::MAX, 1)] {
            assert!(
                matches!(
                    check_window_bounds(date(2016, 1, 1), months, years),
                    Err(BacktestError::InvalidRange(_))
                ),
                "{} months / {} years should be rejected",
                months,
                years
            );
        }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn sampled_starts_stay_inside_the_window() {
        let mut sampler = DateSampler::seeded(7);
        for (reference, months) in [
            (date(2016, 1, 1), 6),
            (date(2016, 1, 31), 1),
            (date(2019, 12, 15), 3),
            (date(2020, 2, 29), 12),
        ] {
            let upper = reference.checked_add_months(Months::new(months as u32)).unwrap();
            for _ in 0..2_000 {
                let start = sampler.sample_start(reference, months).unwrap();
                assert!(start >= reference, "{} before {}", start, reference);
                assert!(start < upper, "{} not before {}", start, upper);
            }
        }
    }

    #[test]
    fn one_month_window_reaches_both_ends() {
        let reference = date(2021, 2, 1);
        let mut sampler = DateSampler::seeded(11);
        let draws: Vec<NaiveDate> = (0..5_000)
            .map(|_| sampler.sample_start(reference, 1).unwrap())
            .collect();
        assert!(draws.contains(&reference));
        assert!(draws.contains(&date(2021, 2, 28)));
        assert!(!draws.contains(&date(2021, 3, 1)));
    }

    #[test]
    fn same_seed_gives_same_sequence() {
        let reference = date(2016, 1, 1);
        let mut first = DateSampler::seeded(99);
        let mut second = DateSampler::seeded(99);
        for _ in 0..50 {
            assert_eq!(
                first.sample_start(reference, 6).unwrap(),
                second.sample_start(reference, 6).unwrap()
            );
        }
    }

    #[test]
    fn rejects_non_positive_month_interval() {
        let mut sampler = DateSampler::seeded(1);
        for months in [0, -3] {
            assert!(matches!(
                sampler.sample_start(date(2016, 1, 1), months),
                Err(BacktestError::InvalidRange(_))
            ));
        }
    }

    #[test]
    fn end_date_is_whole_calendar_years_later() {
        let mut start = date(2010, 1, 1);
        while start < date(2014, 1, 1) {
            let end = compute_end(start, 3).unwrap();
            assert_eq!(end.year(), start.year() + 3);
            assert_eq!(end.month(), start.month());
            if start.month() == 2 && start.day() == 29 {
                assert_eq!(end.day(), 28);
            } else {
                assert_eq!(end.day(), start.day());
            }
            start = start.succ_opt().unwrap();
        }
    }

    #[test]
    fn leap_day_clamps_to_feb_28() {
        assert_eq!(compute_end(date(2016, 2, 29), 1).unwrap(), date(2017, 2, 28));
        assert_eq!(compute_end(date(2016, 2, 29), 3).unwrap(), date(2019, 2, 28));
        assert_eq!(compute_end(date(2016, 2, 29), 4).unwrap(), date(2020, 2, 29));
    }

    #[test]
    fn zero_years_is_identity() {
        assert_eq!(compute_end(date(2018, 7, 4), 0).unwrap(), date(2018, 7, 4));
    }

    #[test]
    fn window_combines_start_and_end() {
        let mut sampler = DateSampler::seeded(3);
        let window = sampler.sample_window(date(2016, 1, 1), 6, 3).unwrap();
        assert_eq!(window.holding_years, 3);
        assert_eq!(window.end, compute_end(window.start, 3).unwrap());
    }
}
