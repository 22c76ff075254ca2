use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

/// Runtime configuration, read from the environment.
///
/// Every heuristic threshold the pipeline relies on is surfaced here instead
/// of being hard-coded at its call site.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Above this row count, fetches switch to a store-side random sample.
    pub sample_threshold: i64,
    /// Uploads newer than this window mark the active model stale.
    pub staleness_window_minutes: i64,
    /// Lifetime of a cached hotspot result.
    pub cache_ttl_secs: u64,
    /// Upper bound on a single model fit.
    pub fit_timeout_secs: u64,
    /// Where the fitted forecast model is persisted between runs.
    pub model_path: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a Postgres instance")?;

        Ok(Self {
            database_url,
            sample_threshold: env_or("SHELTER_SAMPLE_THRESHOLD", 5_000),
            staleness_window_minutes: env_or("SHELTER_STALENESS_MINUTES", 60),
            cache_ttl_secs: env_or("SHELTER_CACHE_TTL_SECS", 300),
            fit_timeout_secs: env_or("SHELTER_FIT_TIMEOUT_SECS", 30),
            model_path: env_or(
                "SHELTER_MODEL_PATH",
                PathBuf::from("models/forecast_model.json"),
            ),
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variable_falls_back_to_default() {
        assert_eq!(env_or("SHELTER_TEST_UNSET_KNOB", 42i64), 42);
    }

    #[test]
    fn unparseable_value_falls_back_to_default() {
        std::env::set_var("SHELTER_TEST_BAD_KNOB", "not-a-number");
        assert_eq!(env_or("SHELTER_TEST_BAD_KNOB", 7u64), 7);
        std::env::remove_var("SHELTER_TEST_BAD_KNOB");
    }
}
