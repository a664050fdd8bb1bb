use chrono::NaiveDate;
use thiserror::Error;

use crate::models::Season;

/// Errors raised by the forecasting core.
///
/// `OrderingViolation` is a caller bug and is never swallowed. The data
/// sparsity, degenerate season and model fit variants are recoverable: the
/// pipeline turns them into flagged defaults, skipped seasons or dropped
/// ensemble members instead of aborting.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Ordering violation: {0}")]
    OrderingViolation(String),

    #[error("Match {match_id} is not settled")]
    UnsettledMatch { match_id: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Season {season} is degenerate: {reason}")]
    DegenerateSeason { season: Season, reason: String },

    #[error("Model {model} failed: {reason}")]
    ModelFit { model: String, reason: String },

    #[error("No trained model, call train() first")]
    NoModel,

    #[error("Unknown team: {0}")]
    UnknownTeam(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForecastError {
    pub fn out_of_order(
        match_id: &str,
        key: (Season, NaiveDate),
        last: (Season, NaiveDate),
    ) -> Self {
        ForecastError::OrderingViolation(format!(
            "match {} ({} {}) arrived after a match from {} {}",
            match_id, key.0, key.1, last.0, last.1
        ))
    }

    pub fn model_fit(model: &str, reason: impl Into<String>) -> Self {
        ForecastError::ModelFit {
            model: model.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that indicate a programmer mistake rather than
    /// thin or broken input data.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ForecastError::OrderingViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
