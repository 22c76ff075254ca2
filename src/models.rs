use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A record as it arrives from an upload: field names vary by source
/// ("Outcome Type" vs "outcomeType" vs "outcome_type"), so the raw shape is
/// kept as an untyped JSON mapping until the normalizer runs.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Post-normalization record. Every field is populated, possibly with the
/// "Unknown" sentinel; downstream code never re-checks for column presence.
#[derive(Debug, Clone)]
pub struct CanonicalRecord {
    pub animal_id: Option<String>,
    pub datetime: DateTime<Utc>,
    pub outcome_type: String,
    pub animal_type: String,
    pub breed: String,
    pub sex_upon_outcome: String,
    pub age_upon_outcome: String,
}

/// Canonical record plus the derived categorical features the models consume.
#[derive(Debug, Clone)]
pub struct FeatureRecord {
    pub record: CanonicalRecord,
    pub season: &'static str,
    pub reduced_breed: String,
}

/// One day of merged activity (intake arrivals + adoption outcomes).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub count: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// A month-granularity trend point produced by the heuristic paths.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyTrendPoint {
    pub period: String,
    pub predicted_value: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub cluster_id: usize,
    pub count: usize,
    pub percentage: f64,
    pub most_common_type: String,
    pub most_common_breed: String,
    pub most_common_season: String,
    pub representative_age: String,
}

/// Provenance tag carried on every response so a consumer can tell a real
/// model output from a heuristic or canned fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    TrainedModel,
    UploadedData,
    UploadedDataFast,
    StatisticalModel,
    NoData,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TrendSeries {
    Daily(Vec<ForecastPoint>),
    Monthly(Vec<MonthlyTrendPoint>),
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendsResponse {
    pub prediction_type: &'static str,
    pub forecast: TrendSeries,
    pub accuracy: f64,
    pub data_source: DataSource,
    pub model_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HotspotsResponse {
    pub prediction_type: &'static str,
    pub clusters: Vec<ClusterSummary>,
    pub data_source: DataSource,
    pub analysis_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataStatus {
    pub has_data: bool,
    pub intake_records: i64,
    pub outcome_records: i64,
    pub model_loaded: bool,
    pub fresh_data: bool,
    pub ready: bool,
    pub message: String,
}
