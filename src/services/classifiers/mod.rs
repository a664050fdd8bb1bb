//! Trainable three-way classifiers.
//!
//! The pipeline only depends on the [`Classifier`] trait; the concrete
//! models here are the default ensemble members and can be swapped for
//! anything that produces per-class probabilities.

pub mod knn;
pub mod logistic;
pub mod naive_bayes;
pub mod rating_baseline;

pub use knn::NearestNeighbours;
pub use logistic::LogisticRegression;
pub use naive_bayes::GaussianNaiveBayes;
pub use rating_baseline::RatingBaseline;

use crate::error::{ForecastError, Result};
use crate::models::Outcome;
use crate::utils::argmax_outcome;

/// Class probabilities indexed by [`Outcome::index`].
pub type ClassProbabilities = [f64; 3];

pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    fn fit(&mut self, x: &[Vec<f64>], y: &[Outcome]) -> Result<()>;

    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<ClassProbabilities>>;

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<Outcome>> {
        Ok(self.predict_proba(x)?.iter().map(argmax_outcome).collect())
    }

    /// Fresh, untrained instance with the same hyperparameters
    fn spawn(&self) -> Box<dyn Classifier>;
}

/// The default ensemble members.
pub fn default_classifiers() -> Vec<Box<dyn Classifier>> {
    vec![
        Box::new(RatingBaseline::default()),
        Box::new(LogisticRegression::default()),
        Box::new(GaussianNaiveBayes::default()),
        Box::new(NearestNeighbours::default()),
    ]
}

/// Shape checks shared by every `fit`. Returns the feature count.
pub(crate) fn check_training_set(model: &str, x: &[Vec<f64>], y: &[Outcome]) -> Result<usize> {
    if x.is_empty() {
        return Err(ForecastError::model_fit(model, "empty training set"));
    }
    if x.len() != y.len() {
        return Err(ForecastError::model_fit(
            model,
            format!("{} rows but {} labels", x.len(), y.len()),
        ));
    }
    check_rows(model, x, x[0].len())?;
    Ok(x[0].len())
}

pub(crate) fn check_rows(model: &str, x: &[Vec<f64>], dim: usize) -> Result<()> {
    for (i, row) in x.iter().enumerate() {
        if row.len() != dim {
            return Err(ForecastError::model_fit(
                model,
                format!("row {} has {} features, expected {}", i, row.len(), dim),
            ));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::model_fit(model, format!("row {} is not finite", i)));
        }
    }
    Ok(())
}

pub(crate) fn not_fitted(model: &str) -> ForecastError {
    ForecastError::model_fit(model, "predict called before fit")
}

/// Per-feature z-scoring fitted on the training rows. Constant features
/// keep unit scale so they cannot blow up.
#[derive(Debug, Clone)]
pub(crate) struct Standardizer {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Standardizer {
    pub fn fit(x: &[Vec<f64>]) -> Self {
        let dim = x.first().map(Vec::len).unwrap_or(0);
        let n = x.len().max(1) as f64;
        let mut mean = vec![0.0; dim];
        for row in x {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut std = vec![0.0; dim];
        for row in x {
            for ((s, v), m) in std.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in std.iter_mut() {
            *s = if *s > 1e-12 { s.sqrt() } else { 1.0 };
        }
        Self { mean, std }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_training_set_rejects_bad_shapes() {
        assert!(check_training_set("m", &[], &[]).is_err());
        assert!(check_training_set("m", &[vec![1.0]], &[]).is_err());
        assert!(check_training_set("m", &[vec![1.0], vec![1.0, 2.0]], &[Outcome::Draw, Outcome::Draw]).is_err());
        assert!(check_training_set("m", &[vec![f64::NAN]], &[Outcome::Draw]).is_err());
        assert_eq!(check_training_set("m", &[vec![1.0, 2.0]], &[Outcome::Draw]).unwrap(), 2);
    }

    #[test]
    fn test_standardizer_handles_constant_columns() {
        let x = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = Standardizer::fit(&x);
        assert_eq!(scaler.transform(&[2.0, 5.0]), vec![0.0, 0.0]);
        assert_eq!(scaler.transform(&[3.0, 6.0]), vec![1.0, 1.0]);
    }

    #[test]
    fn test_default_members_learn_separable_data() {
        let (x, y) = testing::separable();
        for proto in default_classifiers() {
            let mut model = proto.spawn();
            if model.name() == "rating_baseline" {
                continue; // needs the full match feature layout
            }
            model.fit(&x, &y).unwrap();
            let predicted = model.predict(&[vec![2.5, 1.0, 0.2], vec![-2.5, 1.0, -0.2]]).unwrap();
            assert_eq!(predicted, vec![Outcome::HomeWin, Outcome::AwayWin], "{}", model.name());
        }
    }
}
