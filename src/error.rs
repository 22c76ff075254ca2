use thiserror::Error;

/// Failures the analytics pipeline can report to the orchestration layer.
///
/// All of these are per-request and recoverable: the orchestration layer maps
/// them to degraded responses rather than aborting the process.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no records available")]
    NoData,
    #[error("insufficient data for {stage}: have {have}, need {need}")]
    InsufficientData {
        stage: &'static str,
        have: usize,
        need: usize,
    },
    #[error("feature encoding produced no usable columns")]
    NoFeatures,
    #[error("model training failed: {0}")]
    TrainingFailure(String),
}
