//! Football match outcome forecasting: ordered ELO ratings, leakage-free
//! team snapshots, relative match features, a weighted classifier ensemble
//! with a draw-correction stage, and walk-forward season back-testing.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::ForecastConfig;
pub use error::{ForecastError, Result};
pub use services::Forecaster;
