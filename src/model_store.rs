use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

use crate::forecast::ForecastModel;

/// File-backed persistence for the fitted forecast model. The blob is opaque
/// to everything but the trainer: saved whole on retrain, loaded whole at
/// startup.
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn save(&self, model: &ForecastModel) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let blob = serde_json::to_string(model)?;
        std::fs::write(&self.path, blob)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Absent file means no model; a corrupt file is treated the same way
    /// after a warning, so a bad blob never blocks startup.
    pub fn load(&self) -> anyhow::Result<Option<ForecastModel>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let blob = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        match serde_json::from_str(&blob) {
            Ok(model) => Ok(Some(model)),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "discarding unreadable model file");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::MIN_SERIES_POINTS;
    use crate::models::SeriesPoint;
    use chrono::{Duration, NaiveDate};

    fn fitted_model() -> ForecastModel {
        let start = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        let series: Vec<SeriesPoint> = (0..MIN_SERIES_POINTS as i64 + 5)
            .map(|offset| SeriesPoint {
                date: start + Duration::days(offset),
                count: 5.0 + (offset % 3) as f64,
            })
            .collect();
        ForecastModel::fit(&series).unwrap()
    }

    fn temp_store() -> ModelStore {
        let path = std::env::temp_dir().join(format!(
            "shelter-model-{}.json",
            uuid::Uuid::new_v4()
        ));
        ModelStore::new(path)
    }

    #[test]
    fn round_trips_a_fitted_model() {
        let store = temp_store();
        let model = fitted_model();
        store.save(&model).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.last_observed, model.last_observed);
        assert_eq!(loaded.history.len(), model.history.len());
        assert!((loaded.slope - model.slope).abs() < 1e-12);

        std::fs::remove_file(&store.path).ok();
    }

    #[test]
    fn missing_file_loads_as_absent() {
        let store = temp_store();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn corrupt_file_loads_as_absent() {
        let store = temp_store();
        std::fs::write(&store.path, "not a model").unwrap();
        assert!(store.load().unwrap().is_none());
        std::fs::remove_file(&store.path).ok();
    }
}
