use super::{check_rows, check_training_set, not_fitted, ClassProbabilities, Classifier, Standardizer};
use crate::error::Result;
use crate::models::Outcome;

const NAME: &str = "nearest_neighbours";

/// Inverse-distance weighted k-nearest-neighbours over z-scored features.
pub struct NearestNeighbours {
    k: usize,
    fitted: Option<(Standardizer, Vec<(Vec<f64>, Outcome)>)>,
}

impl Default for NearestNeighbours {
    fn default() -> Self {
        Self::new(7)
    }
}

impl NearestNeighbours {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            fitted: None,
        }
    }
}

impl Classifier for NearestNeighbours {
    fn name(&self) -> &str {
        NAME
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[Outcome]) -> Result<()> {
        check_training_set(NAME, x, y)?;
        let scaler = Standardizer::fit(x);
        let points = x
            .iter()
            .zip(y)
            .map(|(row, label)| (scaler.transform(row), *label))
            .collect();
        self.fitted = Some((scaler, points));
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<ClassProbabilities>> {
        let (scaler, points) = self.fitted.as_ref().ok_or_else(|| not_fitted(NAME))?;
        check_rows(NAME, x, scaler.dim())?;

        Ok(x.iter()
            .map(|row| {
                let query = scaler.transform(row);
                let mut distances: Vec<(f64, Outcome)> = points
                    .iter()
                    .map(|(p, label)| {
                        let d = p.iter().zip(&query).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt();
                        (d, *label)
                    })
                    .collect();
                distances.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

                let mut votes = [0.0; 3];
                for (d, label) in distances.iter().take(self.k) {
                    votes[label.index()] += 1.0 / (d + 1e-9);
                }
                let total: f64 = votes.iter().sum();
                votes.map(|v| v / total)
            })
            .collect())
    }

    fn spawn(&self) -> Box<dyn Classifier> {
        Box::new(Self::new(self.k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_votes_follow_nearest_points() {
        let x = vec![vec![0.0], vec![0.1], vec![5.0], vec![5.1]];
        let y = vec![Outcome::Draw, Outcome::Draw, Outcome::HomeWin, Outcome::HomeWin];
        let mut model = NearestNeighbours::new(2);
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&[vec![4.8], vec![0.2]]).unwrap(), vec![Outcome::HomeWin, Outcome::Draw]);
    }

    #[test]
    fn test_k_larger_than_training_set() {
        let x = vec![vec![1.0], vec![2.0]];
        let y = vec![Outcome::AwayWin, Outcome::AwayWin];
        let mut model = NearestNeighbours::new(50);
        model.fit(&x, &y).unwrap();
        let probs = model.predict_proba(&[vec![1.5]]).unwrap()[0];
        assert_eq!(probs[Outcome::AwayWin.index()], 1.0);
    }
}
