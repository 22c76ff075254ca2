use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Months, NaiveDate, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::cluster;
use crate::config::Config;
use crate::error::PipelineError;
use crate::features::{self, is_adoption_outcome};
use crate::forecast::{self, ForecastModel, FORECAST_PERIODS};
use crate::model_store::ModelStore;
use crate::models::{
    CanonicalRecord, ClusterSummary, DataSource, DataStatus, FeatureRecord, ForecastPoint,
    HotspotsResponse, MonthlyTrendPoint, TrendSeries, TrendsResponse,
};
use crate::schema;
use crate::store::{RecordKind, Store};

const PREDICTION_TRENDS: &str = "adoption_trends";
const PREDICTION_HOTSPOTS: &str = "high_risk_areas";

const HEURISTIC_MONTHS: usize = 12;
const HEURISTIC_WINDOW: usize = 6;
const HEURISTIC_GROWTH: f64 = 1.05;
const CANNED_BASE: f64 = 150.0;

/// Per-request decision layer: serve the trained model, regenerate it, or
/// degrade to a tagged heuristic/canned response.
///
/// The active model lives behind a read-write lock and is handed out as an
/// immutable snapshot, so readers never observe a partial swap; a duplicate
/// retrain trigger while one is in flight is a no-op.
pub struct Engine {
    store: Store,
    model_store: ModelStore,
    staleness_window: chrono::Duration,
    fit_timeout: Duration,
    active_model: RwLock<Option<Arc<ForecastModel>>>,
    training: Mutex<()>,
    hotspot_cache: Mutex<HotspotCache>,
}

pub struct TrainOutcome {
    pub series_points: usize,
    pub accuracy: f64,
    pub forecast: Vec<ForecastPoint>,
}

impl Engine {
    pub fn new(store: Store, model_store: ModelStore, config: &Config) -> Self {
        Self {
            store,
            model_store,
            staleness_window: chrono::Duration::minutes(config.staleness_window_minutes),
            fit_timeout: Duration::from_secs(config.fit_timeout_secs),
            active_model: RwLock::new(None),
            training: Mutex::new(()),
            hotspot_cache: Mutex::new(HotspotCache::new(Duration::from_secs(
                config.cache_ttl_secs,
            ))),
        }
    }

    /// Restores a previously persisted model into the active slot.
    pub async fn load_persisted_model(&self) {
        match self.model_store.load() {
            Ok(Some(model)) => {
                info!(trained_at = %model.trained_at, "loaded persisted forecast model");
                *self.active_model.write().await = Some(Arc::new(model));
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to load persisted model"),
        }
    }

    /// Adoption trend predictions: trained model when possible, trailing
    /// average heuristic when data is thin, canned values as the last tier.
    pub async fn trends(&self) -> anyhow::Result<TrendsResponse> {
        let (intake, outcome) = self.fetch_canonical().await?;
        if intake.is_empty() && outcome.is_empty() {
            return Ok(no_data_trends());
        }

        match self.ensure_model(&intake, &outcome).await {
            Ok(model) => Ok(TrendsResponse {
                prediction_type: PREDICTION_TRENDS,
                forecast: TrendSeries::Daily(model.forecast(FORECAST_PERIODS)),
                accuracy: model.accuracy_estimate(),
                data_source: DataSource::TrainedModel,
                model_status: "seasonal_forecast_model".to_string(),
                message: None,
            }),
            Err(err) => {
                warn!(error = %err, "forecast model unavailable, degrading to heuristic trends");
                Ok(heuristic_trends(&outcome, Utc::now().date_naive()))
            }
        }
    }

    /// Fast-path trend endpoint: forecasts adoptions from outcome data alone,
    /// skipping model training entirely.
    pub async fn quick_trends(&self) -> anyhow::Result<TrendsResponse> {
        let outcome = self.fetch_stream(RecordKind::Outcome).await?;
        if outcome.is_empty() {
            return Ok(no_data_trends());
        }
        Ok(heuristic_trends(&outcome, Utc::now().date_naive()))
    }

    /// Forces a retrain and returns the fresh forward forecast.
    pub async fn retrain(&self) -> anyhow::Result<TrainOutcome> {
        let (intake, outcome) = self.fetch_canonical().await?;
        if intake.is_empty() && outcome.is_empty() {
            return Err(PipelineError::NoData.into());
        }

        let _guard = self.training.lock().await;
        let model = self.fit_and_swap(&intake, &outcome).await?;
        Ok(TrainOutcome {
            series_points: model.history.len(),
            accuracy: model.accuracy_estimate(),
            forecast: model.forecast(FORECAST_PERIODS),
        })
    }

    /// Hotspot clustering with a fingerprint-keyed, TTL-bounded cache.
    pub async fn hotspots(&self) -> anyhow::Result<HotspotsResponse> {
        let outcome_raw = self.store.fetch(RecordKind::Outcome).await?;
        if outcome_raw.is_empty() {
            return Ok(no_data_hotspots());
        }

        let canonical: Vec<CanonicalRecord> = outcome_raw.iter().map(schema::normalize).collect();
        let fingerprint = data_fingerprint(&canonical);
        let records = features::derive_features(canonical);

        let mut cache = self.hotspot_cache.lock().await;
        Ok(cached_hotspots(&mut cache, &fingerprint, Instant::now(), || {
            compute_hotspots(&records)
        }))
    }

    /// Offline elbow analysis over the current outcome data.
    pub async fn elbow(&self) -> anyhow::Result<Vec<(usize, f64)>> {
        let outcome = self.fetch_stream(RecordKind::Outcome).await?;
        let records = features::derive_features(outcome);
        Ok(cluster::elbow_curve(&records)?)
    }

    pub async fn status(&self) -> anyhow::Result<DataStatus> {
        let intake_records = self.store.count(RecordKind::Intake).await?;
        let outcome_records = self.store.count(RecordKind::Outcome).await?;
        let has_data = intake_records + outcome_records > 0;
        let model_loaded = self.active_model.read().await.is_some();

        Ok(DataStatus {
            has_data,
            intake_records,
            outcome_records,
            model_loaded,
            fresh_data: self.has_fresh_upload().await,
            ready: has_data && model_loaded,
            message: if has_data {
                "analytics ready".to_string()
            } else {
                "upload intake/outcome records to enable predictions".to_string()
            },
        })
    }

    async fn fetch_canonical(
        &self,
    ) -> anyhow::Result<(Vec<CanonicalRecord>, Vec<CanonicalRecord>)> {
        let intake = self.fetch_stream(RecordKind::Intake).await?;
        let outcome = self.fetch_stream(RecordKind::Outcome).await?;
        info!(
            intake = intake.len(),
            outcome = outcome.len(),
            "fetched records for analysis"
        );
        Ok((intake, outcome))
    }

    async fn fetch_stream(&self, kind: RecordKind) -> anyhow::Result<Vec<CanonicalRecord>> {
        let raw = self.store.fetch(kind).await?;
        Ok(raw.iter().map(schema::normalize).collect())
    }

    /// Returns the active model, retraining first when the slot is empty or
    /// new data arrived inside the staleness window.
    async fn ensure_model(
        &self,
        intake: &[CanonicalRecord],
        outcome: &[CanonicalRecord],
    ) -> Result<Arc<ForecastModel>, PipelineError> {
        let snapshot = self.active_model.read().await.clone();
        if let Some(model) = &snapshot {
            if !self.has_fresh_upload().await {
                return Ok(model.clone());
            }
        }

        match self.training.try_lock() {
            Ok(_guard) => match self.fit_and_swap(intake, outcome).await {
                Ok(model) => Ok(model),
                Err(err) => match snapshot {
                    Some(previous) => {
                        warn!(error = %err, "retrain failed, keeping previous model");
                        Ok(previous)
                    }
                    None => Err(err),
                },
            },
            // Another request is already retraining; serve what we have.
            Err(_) => snapshot.ok_or_else(|| {
                PipelineError::TrainingFailure("retrain already in progress".to_string())
            }),
        }
    }

    async fn fit_and_swap(
        &self,
        intake: &[CanonicalRecord],
        outcome: &[CanonicalRecord],
    ) -> Result<Arc<ForecastModel>, PipelineError> {
        let series = forecast::build_activity_series(intake, outcome);
        info!(points = series.len(), "built activity series");

        let fit = tokio::time::timeout(
            self.fit_timeout,
            tokio::task::spawn_blocking(move || ForecastModel::fit(&series)),
        )
        .await;
        let model = match fit {
            Err(_) => Err(PipelineError::TrainingFailure(
                "model fit timed out".to_string(),
            )),
            Ok(Err(join_err)) => Err(PipelineError::TrainingFailure(join_err.to_string())),
            Ok(Ok(result)) => result,
        }?;

        let model = Arc::new(model);
        *self.active_model.write().await = Some(model.clone());
        info!(
            history = model.history.len(),
            last_observed = %model.last_observed,
            "forecast model retrained"
        );
        if let Err(err) = self.model_store.save(&model) {
            warn!(error = %err, "failed to persist forecast model");
        }
        Ok(model)
    }

    async fn has_fresh_upload(&self) -> bool {
        let since = Utc::now() - self.staleness_window;
        match self.store.count_recent(since).await {
            Ok(recent) => recent > 0,
            Err(err) => {
                // Assume fresh so a store hiccup can only over-train.
                warn!(error = %err, "freshness check failed");
                true
            }
        }
    }
}

/// Cache lookup wrapper; the compute closure runs only on a miss, which is
/// what the cache tests spy on.
pub(crate) fn cached_hotspots<F>(
    cache: &mut HotspotCache,
    fingerprint: &str,
    now: Instant,
    compute: F,
) -> HotspotsResponse
where
    F: FnOnce() -> HotspotsResponse,
{
    if let Some(hit) = cache.get(fingerprint, now) {
        info!(fingerprint, "hotspot cache hit");
        return hit;
    }

    let response = compute();
    if response.data_source == DataSource::UploadedData {
        cache.put(fingerprint.to_string(), response.clone(), now);
    }
    response
}

pub(crate) fn compute_hotspots(records: &[FeatureRecord]) -> HotspotsResponse {
    match cluster::analyze(records) {
        Ok(clusters) => HotspotsResponse {
            prediction_type: PREDICTION_HOTSPOTS,
            clusters,
            data_source: DataSource::UploadedData,
            analysis_status: "clustering_complete".to_string(),
            message: None,
        },
        Err(PipelineError::InsufficientData { have, need, .. }) => {
            warn!(have, need, "not enough qualifying rows, serving example hotspots");
            HotspotsResponse {
                prediction_type: PREDICTION_HOTSPOTS,
                clusters: canned_clusters(),
                data_source: DataSource::StatisticalModel,
                analysis_status: "fallback_examples".to_string(),
                message: Some(format!(
                    "insufficient non-adoption records: have {have}, need {need}"
                )),
            }
        }
        Err(PipelineError::NoFeatures) => HotspotsResponse {
            prediction_type: PREDICTION_HOTSPOTS,
            clusters: Vec::new(),
            data_source: DataSource::Error,
            analysis_status: "no_features".to_string(),
            message: Some("feature encoding produced no usable columns".to_string()),
        },
        Err(err) => HotspotsResponse {
            prediction_type: PREDICTION_HOTSPOTS,
            clusters: Vec::new(),
            data_source: DataSource::Error,
            analysis_status: "clustering_failed".to_string(),
            message: Some(err.to_string()),
        },
    }
}

/// Trailing-average heuristic over monthly adoption counts, with a canned
/// tier when even that is impossible.
pub(crate) fn heuristic_trends(outcome: &[CanonicalRecord], today: NaiveDate) -> TrendsResponse {
    let monthly = monthly_adoption_counts(outcome);
    if monthly.is_empty() {
        return TrendsResponse {
            prediction_type: PREDICTION_TRENDS,
            forecast: TrendSeries::Monthly(canned_trend_points(today)),
            accuracy: 0.75,
            data_source: DataSource::StatisticalModel,
            model_status: "fast_generation_mode".to_string(),
            message: None,
        };
    }

    TrendsResponse {
        prediction_type: PREDICTION_TRENDS,
        forecast: TrendSeries::Monthly(trailing_average_points(&monthly, today)),
        accuracy: 0.85,
        data_source: DataSource::UploadedDataFast,
        model_status: "fast_statistical_model".to_string(),
        message: None,
    }
}

fn monthly_adoption_counts(outcome: &[CanonicalRecord]) -> Vec<f64> {
    let mut counts: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for record in outcome {
        if is_adoption_outcome(&record.outcome_type) {
            use chrono::Datelike;
            let date = record.datetime.date_naive();
            *counts.entry((date.year(), date.month())).or_insert(0.0) += 1.0;
        }
    }
    counts.into_values().collect()
}

/// Last-six-month average extrapolated with a 5% monthly growth factor.
pub(crate) fn trailing_average_points(monthly: &[f64], today: NaiveDate) -> Vec<MonthlyTrendPoint> {
    let window = &monthly[monthly.len().saturating_sub(HEURISTIC_WINDOW)..];
    let recent_avg = window.iter().sum::<f64>() / window.len() as f64;

    future_months(today)
        .enumerate()
        .map(|(i, period)| MonthlyTrendPoint {
            period,
            predicted_value: (recent_avg * HEURISTIC_GROWTH.powi(i as i32)).floor().max(1.0),
        })
        .collect()
}

pub(crate) fn canned_trend_points(today: NaiveDate) -> Vec<MonthlyTrendPoint> {
    future_months(today)
        .enumerate()
        .map(|(i, period)| MonthlyTrendPoint {
            period,
            predicted_value: CANNED_BASE + (i as f64) * 5.0 + ((i % 3) as f64) * 10.0,
        })
        .collect()
}

fn future_months(today: NaiveDate) -> impl Iterator<Item = String> {
    (1..=HEURISTIC_MONTHS as u32).filter_map(move |offset| {
        today
            .checked_add_months(Months::new(offset))
            .map(|date| date.format("%Y-%m").to_string())
    })
}

fn canned_clusters() -> Vec<ClusterSummary> {
    vec![
        ClusterSummary {
            cluster_id: 0,
            count: 6,
            percentage: 60.0,
            most_common_type: "Dog".to_string(),
            most_common_breed: "Pit Bull Mix".to_string(),
            most_common_season: "Summer".to_string(),
            representative_age: "2 years".to_string(),
        },
        ClusterSummary {
            cluster_id: 1,
            count: 4,
            percentage: 40.0,
            most_common_type: "Cat".to_string(),
            most_common_breed: "Domestic Shorthair Mix".to_string(),
            most_common_season: "Fall".to_string(),
            representative_age: "1 year".to_string(),
        },
    ]
}

fn no_data_trends() -> TrendsResponse {
    TrendsResponse {
        prediction_type: PREDICTION_TRENDS,
        forecast: TrendSeries::Monthly(Vec::new()),
        accuracy: 0.0,
        data_source: DataSource::NoData,
        model_status: "no_uploaded_data".to_string(),
        message: Some("upload intake/outcome records to generate predictions".to_string()),
    }
}

fn no_data_hotspots() -> HotspotsResponse {
    HotspotsResponse {
        prediction_type: PREDICTION_HOTSPOTS,
        clusters: Vec::new(),
        data_source: DataSource::NoData,
        analysis_status: "no_uploaded_data".to_string(),
        message: Some("upload outcome records to generate hotspot analysis".to_string()),
    }
}

/// Content fingerprint over sorted record identities and timestamps, so a
/// changed row invalidates the cache even at constant row count.
pub(crate) fn data_fingerprint(records: &[CanonicalRecord]) -> String {
    let mut keys: Vec<String> = records
        .iter()
        .map(|record| {
            format!(
                "{}|{}",
                record.animal_id.as_deref().unwrap_or("-"),
                record.datetime.timestamp()
            )
        })
        .collect();
    keys.sort();

    let mut hasher = DefaultHasher::new();
    for key in &keys {
        key.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

/// Single-entry, TTL-bounded cache for the latest hotspot result.
pub(crate) struct HotspotCache {
    ttl: Duration,
    entry: Option<CacheEntry>,
}

struct CacheEntry {
    fingerprint: String,
    expires_at: Instant,
    payload: HotspotsResponse,
}

impl HotspotCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    fn get(&self, fingerprint: &str, now: Instant) -> Option<HotspotsResponse> {
        self.entry
            .as_ref()
            .filter(|entry| entry.fingerprint == fingerprint && now < entry.expires_at)
            .map(|entry| entry.payload.clone())
    }

    fn put(&mut self, fingerprint: String, payload: HotspotsResponse, now: Instant) {
        self.entry = Some(CacheEntry {
            fingerprint,
            expires_at: now + self.ttl,
            payload,
        });
    }
}
