use statrs::distribution::{Continuous, Normal};

use super::{check_rows, check_training_set, not_fitted, ClassProbabilities, Classifier};
use crate::error::{ForecastError, Result};
use crate::models::Outcome;

const NAME: &str = "gaussian_naive_bayes";

/// Gaussian naive Bayes with one pooled variance per feature.
///
/// Sharing the variance across classes keeps the log-odds linear in each
/// feature, so values outside the training range push further toward the
/// class they already favour instead of flipping. Features that were
/// constant during training carry no information and are ignored.
pub struct GaussianNaiveBayes {
    var_smoothing: f64,
    fitted: Option<Fitted>,
}

struct Fitted {
    dim: usize,
    /// Per class: log prior and one likelihood per informative feature;
    /// None for classes absent from the training data.
    classes: [Option<ClassModel>; 3],
}

struct ClassModel {
    log_prior: f64,
    likelihoods: Vec<(usize, Normal)>,
}

impl Default for GaussianNaiveBayes {
    fn default() -> Self {
        Self::new(1e-9)
    }
}

impl GaussianNaiveBayes {
    pub fn new(var_smoothing: f64) -> Self {
        Self {
            var_smoothing,
            fitted: None,
        }
    }
}

impl Classifier for GaussianNaiveBayes {
    fn name(&self) -> &str {
        NAME
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[Outcome]) -> Result<()> {
        let dim = check_training_set(NAME, x, y)?;
        let n = x.len() as f64;

        let mut counts = [0usize; 3];
        let mut means = vec![vec![0.0; dim]; 3];
        for (row, label) in x.iter().zip(y) {
            let c = label.index();
            counts[c] += 1;
            for (m, v) in means[c].iter_mut().zip(row) {
                *m += v;
            }
        }
        for (c, count) in counts.iter().enumerate() {
            if *count > 0 {
                means[c].iter_mut().for_each(|m| *m /= *count as f64);
            }
        }

        let mut pooled = vec![0.0; dim];
        for (row, label) in x.iter().zip(y) {
            for (f, v) in row.iter().enumerate() {
                pooled[f] += (v - means[label.index()][f]).powi(2) / n;
            }
        }
        let max_var = pooled.iter().cloned().fold(0.0, f64::max);
        let epsilon = self.var_smoothing * max_var;

        let informative: Vec<usize> = (0..dim).filter(|&f| pooled[f] > 1e-12).collect();
        if informative.is_empty() {
            tracing::debug!("{}: no feature varies, falling back to priors", NAME);
        }

        let mut classes: [Option<ClassModel>; 3] = [None, None, None];
        for c in 0..3 {
            if counts[c] == 0 {
                continue;
            }
            let likelihoods = informative
                .iter()
                .map(|&f| {
                    Normal::new(means[c][f], (pooled[f] + epsilon).sqrt())
                        .map(|normal| (f, normal))
                        .map_err(|e| ForecastError::model_fit(NAME, e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            classes[c] = Some(ClassModel {
                log_prior: (counts[c] as f64 / n).ln(),
                likelihoods,
            });
        }

        self.fitted = Some(Fitted { dim, classes });
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<ClassProbabilities>> {
        let fitted = self.fitted.as_ref().ok_or_else(|| not_fitted(NAME))?;
        check_rows(NAME, x, fitted.dim)?;

        Ok(x.iter()
            .map(|row| {
                let mut log_posterior = [f64::NEG_INFINITY; 3];
                for (c, class) in fitted.classes.iter().enumerate() {
                    if let Some(class) = class {
                        log_posterior[c] = class.log_prior
                            + class
                                .likelihoods
                                .iter()
                                .map(|(f, normal)| normal.ln_pdf(row[*f]))
                                .sum::<f64>();
                    }
                }
                let max = log_posterior.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let mut probs = [0.0; 3];
                for c in 0..3 {
                    if log_posterior[c].is_finite() {
                        probs[c] = (log_posterior[c] - max).exp();
                    }
                }
                let total: f64 = probs.iter().sum();
                probs.map(|p| p / total)
            })
            .collect())
    }

    fn spawn(&self) -> Box<dyn Classifier> {
        Box::new(Self::new(self.var_smoothing))
    }
}
