//! Ensemble voting and draw correction.
//!
//! Members are weighted by their own out-of-fold accuracy on the training
//! window; the weighted probability sum decides the class. The draw
//! correction runs afterwards as a separate rule stage so it can be tuned
//! or switched off without touching any model.

use std::collections::BTreeMap;

use crate::config::DrawCorrectionConfig;
use crate::error::{ForecastError, Result};
use crate::models::{MatchFeatureVector, Outcome};
use crate::services::classifiers::{ClassProbabilities, Classifier};
use crate::utils::{argmax_outcome, normalize_probabilities};

/// Weighted soft vote. Weights need not sum to one.
pub fn weighted_vote(votes: &[(ClassProbabilities, f64)]) -> ClassProbabilities {
    let total_weight: f64 = votes.iter().map(|(_, w)| w).sum();
    let mut combined = [0.0; 3];
    if total_weight <= 0.0 {
        return combined;
    }
    for (probs, weight) in votes {
        for c in 0..3 {
            combined[c] += probs[c] * weight / total_weight;
        }
    }
    combined
}

/// Which "evenly matched" signals hold for a fixture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClosenessIndicators {
    pub rating: bool,
    pub form: bool,
    pub goal_difference: bool,
    pub possession: bool,
}

impl ClosenessIndicators {
    pub fn count(&self) -> usize {
        [self.rating, self.form, self.goal_difference, self.possession]
            .iter()
            .filter(|b| **b)
            .count()
    }
}

/// Rule stage that turns low-confidence wins between evenly matched sides
/// into draws. Margin-maximising classifiers almost never pick the draw
/// class on their own.
#[derive(Debug, Clone)]
pub struct DrawCorrection {
    config: DrawCorrectionConfig,
}

impl DrawCorrection {
    pub fn new(config: DrawCorrectionConfig) -> Self {
        Self { config }
    }

    pub fn disabled() -> Self {
        Self::new(DrawCorrectionConfig {
            enabled: false,
            ..DrawCorrectionConfig::default()
        })
    }

    pub fn config(&self) -> &DrawCorrectionConfig {
        &self.config
    }

    pub fn indicators(&self, features: &MatchFeatureVector) -> ClosenessIndicators {
        ClosenessIndicators {
            rating: features.rating_advantage.abs() < self.config.rating_gap,
            form: features.form_advantage.abs() < self.config.form_gap,
            goal_difference: features.goal_difference_advantage.abs() < self.config.goal_difference_gap,
            possession: features.possession_advantage.abs() < self.config.possession_gap,
        }
    }

    pub fn should_override(&self, top: Outcome, confidence: f64, indicators: &ClosenessIndicators) -> bool {
        self.config.enabled
            && top.is_win()
            && confidence < self.config.confidence_threshold
            && indicators.count() >= self.config.min_indicators
    }

    /// Final class for a combined probability vector: (class, corrected?)
    pub fn apply(&self, probabilities: &ClassProbabilities, features: &MatchFeatureVector) -> (Outcome, bool) {
        let top = argmax_outcome(probabilities);
        let confidence = probabilities[top.index()];
        if self.should_override(top, confidence, &self.indicators(features)) {
            (Outcome::Draw, true)
        } else {
            (top, false)
        }
    }
}

/// One ensemble verdict for one fixture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleDecision {
    pub probabilities: ClassProbabilities,
    /// Argmax of the vote before the draw rule
    pub voted: Outcome,
    pub predicted: Outcome,
    /// Combined probability of `predicted`
    pub confidence: f64,
    /// Combined probability of `voted`
    pub voted_confidence: f64,
    pub draw_corrected: bool,
}

pub struct EnsembleMember {
    pub model: Box<dyn Classifier>,
    pub weight: f64,
}

/// Trained members plus the rule stage; the model artifact of one
/// walk-forward step.
pub struct FittedEnsemble {
    members: Vec<EnsembleMember>,
    dropped: Vec<String>,
    draw_correction: DrawCorrection,
}

impl FittedEnsemble {
    /// Wrap already trained models. Weights are normalised; non-positive
    /// totals fall back to equal weights.
    pub fn from_trained(models: Vec<(Box<dyn Classifier>, f64)>, draw_correction: DrawCorrection) -> Result<Self> {
        if models.is_empty() {
            return Err(ForecastError::model_fit("ensemble", "no trained members"));
        }
        let members = normalise_weights(
            models
                .into_iter()
                .map(|(model, weight)| EnsembleMember { model, weight })
                .collect(),
        );
        Ok(Self {
            members,
            dropped: Vec::new(),
            draw_correction,
        })
    }

    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.members
            .iter()
            .map(|m| (m.model.name().to_string(), m.weight))
            .collect()
    }

    /// Members dropped while fitting or predicting
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    pub fn draw_correction(&self) -> &DrawCorrection {
        &self.draw_correction
    }

    /// Weighted vote over every member that manages to predict. A member
    /// that fails here is left out of this call only.
    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<ClassProbabilities>> {
        let mut outputs = Vec::with_capacity(self.members.len());
        for member in &self.members {
            match member.model.predict_proba(x) {
                Ok(probs) if probs.len() == x.len() => outputs.push((probs, member.weight)),
                Ok(_) => tracing::warn!("{} returned the wrong number of rows, skipping", member.model.name()),
                Err(e) => tracing::warn!("{} failed to predict, skipping: {}", member.model.name(), e),
            }
        }
        if outputs.is_empty() {
            return Err(ForecastError::model_fit("ensemble", "every member failed to predict"));
        }

        Ok((0..x.len())
            .map(|i| {
                let votes: Vec<(ClassProbabilities, f64)> =
                    outputs.iter().map(|(probs, w)| (probs[i], *w)).collect();
                normalize_probabilities(weighted_vote(&votes))
            })
            .collect())
    }

    pub fn decide(&self, features: &[MatchFeatureVector]) -> Result<Vec<EnsembleDecision>> {
        let x: Vec<Vec<f64>> = features.iter().map(MatchFeatureVector::to_vec).collect();
        let combined = self.predict_proba(&x)?;
        Ok(combined
            .iter()
            .zip(features)
            .map(|(probs, f)| {
                let voted = argmax_outcome(probs);
                let (predicted, draw_corrected) = self.draw_correction.apply(probs, f);
                EnsembleDecision {
                    probabilities: *probs,
                    voted,
                    predicted,
                    confidence: probs[predicted.index()],
                    voted_confidence: probs[voted.index()],
                    draw_corrected,
                }
            })
            .collect())
    }
}

fn normalise_weights(mut members: Vec<EnsembleMember>) -> Vec<EnsembleMember> {
    let total: f64 = members.iter().map(|m| m.weight.max(0.0)).sum();
    let count = members.len() as f64;
    for member in members.iter_mut() {
        member.weight = if total > 0.0 {
            member.weight.max(0.0) / total
        } else {
            1.0 / count
        };
    }
    members
}

/// Fits fresh copies of its prototype models and weights them by
/// out-of-fold accuracy.
pub struct EnsembleCombiner {
    prototypes: Vec<Box<dyn Classifier>>,
    cv_folds: usize,
    draw_correction: DrawCorrection,
}

impl Clone for EnsembleCombiner {
    fn clone(&self) -> Self {
        Self {
            prototypes: self.prototypes.iter().map(|p| p.spawn()).collect(),
            cv_folds: self.cv_folds,
            draw_correction: self.draw_correction.clone(),
        }
    }
}

impl EnsembleCombiner {
    pub fn new(prototypes: Vec<Box<dyn Classifier>>, cv_folds: usize, draw_correction: DrawCorrection) -> Self {
        Self {
            prototypes,
            cv_folds: cv_folds.max(2),
            draw_correction,
        }
    }

    pub fn fit(&self, x: &[Vec<f64>], y: &[Outcome]) -> Result<FittedEnsemble> {
        let mut members = Vec::new();
        let mut dropped = Vec::new();

        for proto in &self.prototypes {
            let name = proto.name().to_string();
            let accuracy = match out_of_fold_accuracy(proto.as_ref(), x, y, self.cv_folds) {
                Ok(accuracy) => accuracy,
                Err(e) => {
                    tracing::warn!("Dropping {} from ensemble: {}", name, e);
                    dropped.push(name);
                    continue;
                }
            };
            let mut model = proto.spawn();
            if let Err(e) = model.fit(x, y) {
                tracing::warn!("Dropping {} from ensemble: {}", name, e);
                dropped.push(name);
                continue;
            }
            tracing::debug!(
                "{} out-of-fold accuracy: {}",
                name,
                accuracy.map_or("n/a".to_string(), |a| format!("{:.3}", a))
            );
            members.push(EnsembleMember {
                model,
                weight: accuracy.unwrap_or(1.0),
            });
        }

        if members.is_empty() {
            return Err(ForecastError::model_fit("ensemble", "no member could be fitted"));
        }
        Ok(FittedEnsemble {
            members: normalise_weights(members),
            dropped,
            draw_correction: self.draw_correction.clone(),
        })
    }
}

/// Accuracy of `proto` on contiguous held-out folds. None when there are
/// too few rows for every fold to hold at least two.
fn out_of_fold_accuracy(proto: &dyn Classifier, x: &[Vec<f64>], y: &[Outcome], folds: usize) -> Result<Option<f64>> {
    let n = x.len();
    if n < folds * 2 {
        return Ok(None);
    }

    let mut correct = 0;
    for fold in 0..folds {
        let start = fold * n / folds;
        let end = (fold + 1) * n / folds;

        let train_x: Vec<Vec<f64>> = x[..start].iter().chain(&x[end..]).cloned().collect();
        let train_y: Vec<Outcome> = y[..start].iter().chain(&y[end..]).copied().collect();

        let mut model = proto.spawn();
        model.fit(&train_x, &train_y)?;
        let predicted = model.predict(&x[start..end])?;
        correct += predicted.iter().zip(&y[start..end]).filter(|(p, t)| p == t).count();
    }
    Ok(Some(correct as f64 / n as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns the same probabilities for every row
    struct Fixed {
        name: &'static str,
        probs: ClassProbabilities,
        fail_fit: bool,
        fail_predict: bool,
    }

    impl Classifier for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn fit(&mut self, _x: &[Vec<f64>], _y: &[Outcome]) -> Result<()> {
            if self.fail_fit {
                Err(ForecastError::model_fit(self.name, "singular"))
            } else {
                Ok(())
            }
        }

        fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<ClassProbabilities>> {
            if self.fail_predict {
                return Err(ForecastError::model_fit(self.name, "diverged"));
            }
            Ok(vec![self.probs; x.len()])
        }

        fn spawn(&self) -> Box<dyn Classifier> {
            Box::new(Fixed {
                name: self.name,
                probs: self.probs,
                fail_fit: self.fail_fit,
                fail_predict: self.fail_predict,
            })
        }
    }

    fn fixed(name: &'static str, probs: ClassProbabilities) -> Box<dyn Classifier> {
        Box::new(Fixed {
            name,
            probs,
            fail_fit: false,
            fail_predict: false,
        })
    }

    fn broken_at_predict(name: &'static str) -> Box<dyn Classifier> {
        Box::new(Fixed {
            name,
            probs: [1.0, 0.0, 0.0],
            fail_fit: false,
            fail_predict: true,
        })
    }

    #[test]
    fn test_weighted_vote_matches_manual_argmax() {
        let combined = weighted_vote(&[([0.2, 0.7, 0.1], 0.6), ([0.5, 0.1, 0.4], 0.4)]);
        let expected = [0.32, 0.46, 0.22];
        for c in 0..3 {
            assert!((combined[c] - expected[c]).abs() < 1e-12);
        }
        assert_eq!(argmax_outcome(&combined), Outcome::HomeWin);
    }

    #[test]
    fn test_fitted_ensemble_uses_given_weights() {
        let ensemble = FittedEnsemble::from_trained(
            vec![(fixed("a", [0.2, 0.7, 0.1]), 0.6), (fixed("b", [0.5, 0.1, 0.4]), 0.4)],
            DrawCorrection::disabled(),
        )
        .unwrap();
        let decisions = ensemble.decide(&[MatchFeatureVector::default()]).unwrap();
        assert_eq!(decisions[0].predicted, Outcome::HomeWin);
        assert!((decisions[0].confidence - 0.46).abs() < 1e-12);
        assert!(!decisions[0].draw_corrected);
    }

    fn close_match() -> MatchFeatureVector {
        MatchFeatureVector {
            rating_advantage: 10.0,
            form_advantage: 0.2,
            goal_difference_advantage: 1.5,
            possession_advantage: 12.0,
            ..MatchFeatureVector::default()
        }
    }

    #[test]
    fn test_draw_correction_overrides_close_low_confidence_win() {
        let rule = DrawCorrection::new(DrawCorrectionConfig::default());
        let probs = [0.10, 0.52, 0.38];
        assert_eq!(argmax_outcome(&probs), Outcome::HomeWin);
        assert_eq!(rule.indicators(&close_match()).count(), 2);
        assert_eq!(rule.apply(&probs, &close_match()), (Outcome::Draw, true));
    }

    #[test]
    fn test_draw_correction_leaves_confident_or_uneven_matches() {
        let rule = DrawCorrection::new(DrawCorrectionConfig::default());
        assert_eq!(rule.apply(&[0.1, 0.6, 0.3], &close_match()), (Outcome::HomeWin, false));

        let uneven = MatchFeatureVector {
            rating_advantage: 200.0,
            form_advantage: 6.0,
            goal_difference_advantage: 1.5,
            possession_advantage: 2.0,
            ..MatchFeatureVector::default()
        };
        assert_eq!(rule.apply(&[0.1, 0.52, 0.38], &uneven), (Outcome::HomeWin, false));

        // draws and disabled rules pass straight through
        assert_eq!(rule.apply(&[0.5, 0.3, 0.2], &close_match()), (Outcome::Draw, false));
        assert_eq!(
            DrawCorrection::disabled().apply(&[0.10, 0.52, 0.38], &close_match()),
            (Outcome::HomeWin, false)
        );
    }

    #[test]
    fn test_failing_member_is_dropped() {
        let combiner = EnsembleCombiner::new(
            vec![
                fixed("steady", [0.1, 0.8, 0.1]),
                Box::new(Fixed {
                    name: "broken",
                    probs: [1.0, 0.0, 0.0],
                    fail_fit: true,
                    fail_predict: false,
                }),
            ],
            5,
            DrawCorrection::disabled(),
        );
        let x = vec![vec![0.0]; 20];
        let y = vec![Outcome::HomeWin; 20];
        let ensemble = combiner.fit(&x, &y).unwrap();
        assert_eq!(ensemble.dropped(), ["broken".to_string()]);
        assert_eq!(ensemble.weights().get("steady"), Some(&1.0));
    }

    #[test]
    fn test_all_members_failing_is_an_error() {
        let combiner = EnsembleCombiner::new(
            vec![Box::new(Fixed {
                name: "broken",
                probs: [1.0, 0.0, 0.0],
                fail_fit: true,
                fail_predict: false,
            })],
            5,
            DrawCorrection::disabled(),
        );
        assert!(combiner.fit(&[vec![0.0]], &[Outcome::Draw]).is_err());
    }

    #[test]
    fn test_weights_follow_out_of_fold_accuracy() {
        let combiner = EnsembleCombiner::new(
            vec![fixed("home", [0.1, 0.8, 0.1]), fixed("away", [0.1, 0.1, 0.8])],
            4,
            DrawCorrection::disabled(),
        );
        let x = vec![vec![0.0]; 20];
        let mut y = vec![Outcome::HomeWin; 15];
        y.extend(vec![Outcome::AwayWin; 5]);
        let weights = combiner.fit(&x, &y).unwrap().weights();
        assert!((weights["home"] - 0.75).abs() < 1e-12);
        assert!((weights["away"] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_small_training_set_uses_equal_weights() {
        let combiner = EnsembleCombiner::new(
            vec![fixed("home", [0.1, 0.8, 0.1]), fixed("away", [0.1, 0.1, 0.8])],
            5,
            DrawCorrection::disabled(),
        );
        let weights = combiner.fit(&vec![vec![0.0]; 3], &[Outcome::HomeWin; 3]).unwrap().weights();
        assert_eq!(weights["home"], 0.5);
        assert_eq!(weights["away"], 0.5);
    }

    #[test]
    fn test_draw_corrected_decision_reports_draw_probability() {
        let ensemble = FittedEnsemble::from_trained(
            vec![(fixed("lean_home", [0.10, 0.52, 0.38]), 1.0)],
            DrawCorrection::new(DrawCorrectionConfig::default()),
        )
        .unwrap();
        let decision = ensemble.decide(&[close_match()]).unwrap()[0];
        assert!(decision.draw_corrected);
        assert_eq!(decision.predicted, Outcome::Draw);
        assert_eq!(decision.voted, Outcome::HomeWin);
        assert!((decision.confidence - decision.probabilities[Outcome::Draw.index()]).abs() < 1e-12);
        assert!((decision.confidence - 0.10).abs() < 1e-12);
        assert!((decision.voted_confidence - 0.52).abs() < 1e-12);
    }

    #[test]
    fn test_member_failing_at_predict_time_is_left_out_of_the_vote() {
        let ensemble = FittedEnsemble::from_trained(
            vec![
                (fixed("steady", [0.2, 0.5, 0.3]), 0.25),
                (broken_at_predict("flaky"), 0.75),
            ],
            DrawCorrection::disabled(),
        )
        .unwrap();
        let probs = ensemble.predict_proba(&[vec![0.0], vec![1.0]]).unwrap();
        assert_eq!(probs.len(), 2);
        for row in &probs {
            let expected = [0.2, 0.5, 0.3];
            for c in 0..3 {
                assert!((row[c] - expected[c]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_every_member_failing_at_predict_time_is_an_error() {
        let ensemble = FittedEnsemble::from_trained(
            vec![(broken_at_predict("flaky"), 0.5), (broken_at_predict("shaky"), 0.5)],
            DrawCorrection::disabled(),
        )
        .unwrap();
        assert!(ensemble.predict_proba(&[vec![0.0]]).is_err());
        assert!(ensemble.decide(&[MatchFeatureVector::default()]).is_err());
    }
}
