use super::{check_rows, check_training_set, not_fitted, ClassProbabilities, Classifier};
use crate::config::RatingConfig;
use crate::error::{ForecastError, Result};
use crate::models::{MatchFeatureVector, Outcome};
use crate::services::elo_calculator::RatingEngine;
use crate::utils::log_loss;

const NAME: &str = "rating_baseline";

/// Candidate home advantages (rating points) tried during `fit`
const HOME_ADVANTAGE_GRID: [f64; 11] = [-50.0, -25.0, 0.0, 25.0, 50.0, 75.0, 100.0, 125.0, 150.0, 200.0, 250.0];

/// Pure rating model: the home side's ELO expectation split into win and
/// loss after reserving a flat draw share.
///
/// `fit` learns the draw share from the training labels and picks the home
/// advantage with the lowest log loss. Rows must use the
/// [`MatchFeatureVector`] layout.
pub struct RatingBaseline {
    max_draw_rate: f64,
    fitted: Option<(RatingEngine, f64)>,
}

impl Default for RatingBaseline {
    fn default() -> Self {
        Self::new(0.45)
    }
}

impl RatingBaseline {
    pub fn new(max_draw_rate: f64) -> Self {
        Self {
            max_draw_rate,
            fitted: None,
        }
    }

    fn columns() -> Result<(usize, usize)> {
        match (
            MatchFeatureVector::feature_index("home_rating"),
            MatchFeatureVector::feature_index("away_rating"),
        ) {
            (Some(home), Some(away)) => Ok((home, away)),
            _ => Err(ForecastError::model_fit(NAME, "rating columns missing from layout")),
        }
    }

    fn engine(home_advantage: f64) -> RatingEngine {
        RatingEngine::new(RatingConfig {
            home_advantage,
            ..RatingConfig::default()
        })
    }

    pub fn home_advantage(&self) -> Option<f64> {
        self.fitted.as_ref().map(|(engine, _)| engine.config().home_advantage)
    }

    pub fn draw_rate(&self) -> Option<f64> {
        self.fitted.as_ref().map(|(_, draw)| *draw)
    }
}

impl Classifier for RatingBaseline {
    fn name(&self) -> &str {
        NAME
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[Outcome]) -> Result<()> {
        check_training_set(NAME, x, y)?;
        check_rows(NAME, x, MatchFeatureVector::DIM)?;
        let (home, away) = Self::columns()?;

        let draws = y.iter().filter(|o| **o == Outcome::Draw).count();
        let draw_rate = (draws as f64 / y.len() as f64).min(self.max_draw_rate);

        let mut best: Option<(f64, f64)> = None;
        for advantage in HOME_ADVANTAGE_GRID {
            let engine = Self::engine(advantage);
            let probs: Vec<ClassProbabilities> = x
                .iter()
                .map(|row| engine.win_probability(row[home], row[away], draw_rate))
                .collect();
            let loss = log_loss(&probs, y);
            if best.map_or(true, |(_, best_loss)| loss < best_loss) {
                best = Some((advantage, loss));
            }
        }
        let advantage = best.map(|(a, _)| a).unwrap_or(0.0);
        tracing::debug!("{}: home advantage {:.0}, draw rate {:.3}", NAME, advantage, draw_rate);

        self.fitted = Some((Self::engine(advantage), draw_rate));
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<ClassProbabilities>> {
        let (engine, draw_rate) = self.fitted.as_ref().ok_or_else(|| not_fitted(NAME))?;
        check_rows(NAME, x, MatchFeatureVector::DIM)?;
        let (home, away) = Self::columns()?;
        Ok(x.iter()
            .map(|row| engine.win_probability(row[home], row[away], *draw_rate))
            .collect())
    }

    fn spawn(&self) -> Box<dyn Classifier> {
        Box::new(Self::new(self.max_draw_rate))
    }
}
