use nalgebra::{DMatrix, DVector};

use super::{check_rows, check_training_set, not_fitted, ClassProbabilities, Classifier, Standardizer};
use crate::error::Result;
use crate::models::Outcome;

const NAME: &str = "logistic_regression";
const CLASSES: usize = 3;

/// Multinomial logistic regression trained by full-batch gradient descent
/// with an L2 penalty on the non-bias weights.
pub struct LogisticRegression {
    learning_rate: f64,
    iterations: usize,
    l2: f64,
    scaler: Option<Standardizer>,
    /// (features + 1) x classes, bias in row 0
    weights: Option<DMatrix<f64>>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(0.1, 500, 1e-3)
    }
}

impl LogisticRegression {
    pub fn new(learning_rate: f64, iterations: usize, l2: f64) -> Self {
        Self {
            learning_rate,
            iterations,
            l2,
            scaler: None,
            weights: None,
        }
    }

    fn design_row(scaler: &Standardizer, row: &[f64]) -> DVector<f64> {
        let scaled = scaler.transform(row);
        DVector::from_iterator(scaled.len() + 1, std::iter::once(1.0).chain(scaled))
    }
}

fn softmax_rows(logits: &DMatrix<f64>) -> DMatrix<f64> {
    let (rows, cols) = logits.shape();
    let mut out = DMatrix::zeros(rows, cols);
    for i in 0..rows {
        let max = (0..cols).map(|c| logits[(i, c)]).fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for c in 0..cols {
            let e = (logits[(i, c)] - max).exp();
            out[(i, c)] = e;
            sum += e;
        }
        for c in 0..cols {
            out[(i, c)] /= sum;
        }
    }
    out
}

impl Classifier for LogisticRegression {
    fn name(&self) -> &str {
        NAME
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[Outcome]) -> Result<()> {
        let dim = check_training_set(NAME, x, y)?;
        let n = x.len();
        let scaler = Standardizer::fit(x);

        let mut design = DMatrix::<f64>::zeros(n, dim + 1);
        for (i, row) in x.iter().enumerate() {
            design.row_mut(i).copy_from(&Self::design_row(&scaler, row).transpose());
        }
        let targets = DMatrix::from_fn(n, CLASSES, |i, c| if y[i].index() == c { 1.0 } else { 0.0 });
        let design_t = design.transpose();

        let mut weights = DMatrix::<f64>::zeros(dim + 1, CLASSES);
        for _ in 0..self.iterations {
            let probs = softmax_rows(&(&design * &weights));
            let mut grad = &design_t * (probs - &targets) / n as f64;
            for j in 1..=dim {
                for c in 0..CLASSES {
                    grad[(j, c)] += self.l2 * weights[(j, c)];
                }
            }
            weights -= grad * self.learning_rate;
        }

        tracing::debug!("{} fitted on {} rows x {} features", NAME, n, dim);
        self.scaler = Some(scaler);
        self.weights = Some(weights);
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<ClassProbabilities>> {
        let (scaler, weights) = match (&self.scaler, &self.weights) {
            (Some(s), Some(w)) => (s, w),
            _ => return Err(not_fitted(NAME)),
        };
        check_rows(NAME, x, scaler.dim())?;

        Ok(x.iter()
            .map(|row| {
                let logits = weights.transpose() * Self::design_row(scaler, row);
                let probs = softmax_rows(&DMatrix::from_row_slice(1, CLASSES, logits.as_slice()));
                [probs[(0, 0)], probs[(0, 1)], probs[(0, 2)]]
            })
            .collect())
    }

    fn spawn(&self) -> Box<dyn Classifier> {
        Box::new(Self::new(self.learning_rate, self.iterations, self.l2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::classifiers::testing::separable;

    #[test]
    fn test_probabilities_sum_to_one() {
        let (x, y) = separable();
        let mut model = LogisticRegression::default();
        model.fit(&x, &y).unwrap();
        for probs in model.predict_proba(&x).unwrap() {
            assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_training_accuracy_on_separable_data() {
        let (x, y) = separable();
        let mut model = LogisticRegression::default();
        model.fit(&x, &y).unwrap();
        let predicted = model.predict(&x).unwrap();
        let correct = predicted.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(correct as f64 / y.len() as f64 > 0.9);
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let model = LogisticRegression::default();
        assert!(model.predict_proba(&[vec![1.0]]).is_err());
    }

    #[test]
    fn test_wrong_width_is_rejected() {
        let (x, y) = separable();
        let mut model = LogisticRegression::default();
        model.fit(&x, &y).unwrap();
        assert!(model.predict_proba(&[vec![1.0]]).is_err());
    }
}
