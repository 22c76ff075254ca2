use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::features::is_adoption_outcome;
use crate::models::{CanonicalRecord, ForecastPoint, SeriesPoint};

pub const MIN_SERIES_POINTS: usize = 10;
pub const FORECAST_PERIODS: usize = 180;

const MIN_MONTHLY_POINTS: usize = 6;
const ACCURACY_WINDOW_MONTHS: usize = 24;
const INTERVAL_Z: f64 = 1.96;
const TREND_EPS: f64 = 1e-6;

/// Builds the daily activity series the forecaster trains on: one event per
/// intake arrival plus one per adoption outcome, merged by date.
pub fn build_activity_series(
    intake: &[CanonicalRecord],
    outcome: &[CanonicalRecord],
) -> Vec<SeriesPoint> {
    let mut counts: BTreeMap<NaiveDate, f64> = BTreeMap::new();

    for record in intake {
        *counts.entry(record.datetime.date_naive()).or_insert(0.0) += 1.0;
    }
    for record in outcome {
        if is_adoption_outcome(&record.outcome_type) {
            *counts.entry(record.datetime.date_naive()).or_insert(0.0) += 1.0;
        }
    }

    counts
        .into_iter()
        .map(|(date, count)| SeriesPoint { date, count })
        .collect()
}

/// Fitted seasonal model: linear trend with multiplicative weekly and yearly
/// factors. Weekly and yearly seasonality on, daily off; multiplicative mode
/// suits series whose variance scales with the level.
///
/// Replaced wholesale on retrain; prediction calls are read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastModel {
    pub slope: f64,
    pub intercept: f64,
    pub weekday_factors: [f64; 7],
    pub month_factors: [f64; 12],
    pub residual_sigma: f64,
    pub origin: NaiveDate,
    pub last_observed: NaiveDate,
    pub history: Vec<SeriesPoint>,
    pub trained_at: DateTime<Utc>,
}

impl ForecastModel {
    pub fn fit(series: &[SeriesPoint]) -> Result<Self, PipelineError> {
        if series.len() < MIN_SERIES_POINTS {
            return Err(PipelineError::InsufficientData {
                stage: "forecasting",
                have: series.len(),
                need: MIN_SERIES_POINTS,
            });
        }

        let mut points = series.to_vec();
        points.sort_by_key(|p| p.date);
        let origin = points[0].date;
        let last_observed = points[points.len() - 1].date;

        let xs: Vec<f64> = points
            .iter()
            .map(|p| (p.date - origin).num_days() as f64)
            .collect();
        let ys: Vec<f64> = points.iter().map(|p| p.count).collect();
        let n = points.len() as f64;

        let x_mean = xs.iter().sum::<f64>() / n;
        let y_mean = ys.iter().sum::<f64>() / n;
        let sxx: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
        if sxx <= f64::EPSILON {
            return Err(PipelineError::TrainingFailure(
                "degenerate time axis".to_string(),
            ));
        }
        let sxy: f64 = xs
            .iter()
            .zip(&ys)
            .map(|(x, y)| (x - x_mean) * (y - y_mean))
            .sum();
        let slope = sxy / sxx;
        let intercept = y_mean - slope * x_mean;
        let trend = |x: f64| intercept + slope * x;

        // Weekly factors: mean ratio of observed to trend per weekday.
        let mut weekday_sums = [0.0f64; 7];
        let mut weekday_counts = [0usize; 7];
        for (point, &x) in points.iter().zip(&xs) {
            let level = trend(x);
            if level > TREND_EPS {
                let dow = point.date.weekday().num_days_from_monday() as usize;
                weekday_sums[dow] += point.count / level;
                weekday_counts[dow] += 1;
            }
        }
        let weekday_factors = seasonal_factors(&weekday_sums, &weekday_counts);

        // Yearly factors per calendar month, on top of trend and weekly.
        let mut month_sums = [0.0f64; 12];
        let mut month_counts = [0usize; 12];
        for (point, &x) in points.iter().zip(&xs) {
            let dow = point.date.weekday().num_days_from_monday() as usize;
            let level = trend(x) * weekday_factors[dow];
            if level.abs() > TREND_EPS {
                let month = point.date.month0() as usize;
                month_sums[month] += point.count / level;
                month_counts[month] += 1;
            }
        }
        let month_factors = seasonal_factors(&month_sums, &month_counts);

        let residual_sq: f64 = points
            .iter()
            .zip(&xs)
            .map(|(point, &x)| {
                let dow = point.date.weekday().num_days_from_monday() as usize;
                let month = point.date.month0() as usize;
                let fitted = trend(x) * weekday_factors[dow] * month_factors[month];
                (point.count - fitted).powi(2)
            })
            .sum();
        let residual_sigma = (residual_sq / n).sqrt();

        let model = Self {
            slope,
            intercept,
            weekday_factors,
            month_factors,
            residual_sigma,
            origin,
            last_observed,
            history: points,
            trained_at: Utc::now(),
        };

        if !model.is_finite() {
            return Err(PipelineError::TrainingFailure(
                "non-finite model parameters".to_string(),
            ));
        }
        Ok(model)
    }

    fn is_finite(&self) -> bool {
        self.slope.is_finite()
            && self.intercept.is_finite()
            && self.residual_sigma.is_finite()
            && self.weekday_factors.iter().all(|f| f.is_finite())
            && self.month_factors.iter().all(|f| f.is_finite())
    }

    pub fn predict_value(&self, date: NaiveDate) -> f64 {
        let x = (date - self.origin).num_days() as f64;
        let trend = self.intercept + self.slope * x;
        let weekly = self.weekday_factors[date.weekday().num_days_from_monday() as usize];
        let yearly = self.month_factors[date.month0() as usize];
        trend * weekly * yearly
    }

    /// Forward forecast of `periods` daily points strictly after the last
    /// observed date, with a symmetric interval around each prediction.
    pub fn forecast(&self, periods: usize) -> Vec<ForecastPoint> {
        let band = INTERVAL_Z * self.residual_sigma;
        (1..=periods as i64)
            .map(|offset| {
                let date = self.last_observed + Duration::days(offset);
                let predicted_value = self.predict_value(date);
                ForecastPoint {
                    date,
                    predicted_value,
                    lower_bound: predicted_value - band,
                    upper_bound: predicted_value + band,
                }
            })
            .collect()
    }

    /// Advisory accuracy: in-sample sMAPE over the fitted history resampled
    /// to monthly means, most recent 24 months at most. Anything that keeps
    /// the estimate from being computed yields 0.0 rather than an error.
    pub fn accuracy_estimate(&self) -> f64 {
        let mut monthly: BTreeMap<(i32, u32), (f64, usize)> = BTreeMap::new();
        for point in &self.history {
            let entry = monthly
                .entry((point.date.year(), point.date.month()))
                .or_insert((0.0, 0));
            entry.0 += point.count;
            entry.1 += 1;
        }
        if monthly.len() < MIN_MONTHLY_POINTS {
            return 0.0;
        }

        let samples: Vec<(NaiveDate, f64)> = monthly
            .into_iter()
            .filter_map(|((year, month), (sum, count))| {
                month_end(year, month).map(|date| (date, sum / count as f64))
            })
            .collect();
        if samples.len() < MIN_MONTHLY_POINTS {
            return 0.0;
        }

        let window = samples.len().min(ACCURACY_WINDOW_MONTHS);
        let recent = &samples[samples.len() - window..];
        let smape = recent
            .iter()
            .map(|(date, actual)| {
                let predicted = self.predict_value(*date);
                let denom = (actual.abs() + predicted.abs()).max(1e-9);
                2.0 * (predicted - actual).abs() / denom
            })
            .sum::<f64>()
            / recent.len() as f64;

        if !smape.is_finite() {
            return 0.0;
        }
        (1.0 - smape).clamp(0.0, 0.99)
    }
}

fn seasonal_factors<const N: usize>(sums: &[f64; N], counts: &[usize; N]) -> [f64; N] {
    let mut factors = [1.0f64; N];
    for i in 0..N {
        if counts[i] > 0 {
            let factor = sums[i] / counts[i] as f64;
            if factor.is_finite() {
                factors[i] = factor;
            }
        }
    }
    factors
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).map(|first| first - Duration::days(1))
}
