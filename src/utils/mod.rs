use statrs::statistics::Statistics;

use crate::models::Outcome;

/// Class with the highest probability. Ties go to the lower class index.
pub fn argmax_outcome(probs: &[f64; 3]) -> Outcome {
    let mut best = 0;
    for i in 1..probs.len() {
        if probs[i] > probs[best] {
            best = i;
        }
    }
    Outcome::from_index(best).unwrap_or(Outcome::Draw)
}

/// Normalize probabilities to sum to 1.0
pub fn normalize_probabilities(probs: [f64; 3]) -> [f64; 3] {
    let sum: f64 = probs.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return probs;
    }
    probs.map(|p| p / sum)
}

/// Mean cross-entropy of the true classes
pub fn log_loss(probs: &[[f64; 3]], actual: &[Outcome]) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    let total: f64 = probs
        .iter()
        .zip(actual)
        .map(|(p, y)| -p[y.index()].clamp(1e-12, 1.0).ln())
        .sum();
    total / probs.len() as f64
}

/// Multi-class Brier score of one prediction (0 is perfect, 2 is worst)
pub fn brier_score(probs: &[f64; 3], actual: Outcome) -> f64 {
    Outcome::ALL
        .iter()
        .map(|o| {
            let target = if *o == actual { 1.0 } else { 0.0 };
            (probs[o.index()] - target).powi(2)
        })
        .sum()
}

/// Mean and population standard deviation; None for an empty slice
pub fn mean_and_std_dev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    Some((values.mean(), values.population_std_dev()))
}
