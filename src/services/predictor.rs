use chrono::Utc;
use uuid::Uuid;

use crate::config::ForecastConfig;
use crate::error::{ForecastError, Result};
use crate::models::{EvaluationReport, Match, PredictionOutcome, PredictionResult, Season, TeamMatchStats};
use crate::services::classifiers::{default_classifiers, Classifier};
use crate::services::ensemble::{DrawCorrection, EnsembleCombiner, EnsembleDecision, FittedEnsemble};
use crate::services::feature_builder::{MatchFeatureBuilder, MatchRow};
use crate::services::snapshot_store::FeatureSnapshotStore;
use crate::services::walk_forward::WalkForwardEvaluator;

pub const MODEL_VERSION: &str = "ensemble_v1.0";

/// Front door of the pipeline: owns the match history, trains the ensemble
/// and answers single-fixture and batch questions.
pub struct Forecaster {
    config: ForecastConfig,
    store: FeatureSnapshotStore,
    combiner: EnsembleCombiner,
    model: Option<FittedEnsemble>,
    model_version: String,
}

impl Forecaster {
    pub fn new(config: ForecastConfig, store: FeatureSnapshotStore, classifiers: Vec<Box<dyn Classifier>>) -> Self {
        let combiner = EnsembleCombiner::new(
            classifiers,
            config.evaluation.cv_folds,
            DrawCorrection::new(config.draw_correction.clone()),
        );
        Self {
            config,
            store,
            combiner,
            model: None,
            model_version: MODEL_VERSION.to_string(),
        }
    }

    /// Load an ordered history with the default ensemble members.
    pub fn from_history(
        config: ForecastConfig,
        matches: &[Match],
        stats: impl IntoIterator<Item = TeamMatchStats>,
    ) -> Result<Self> {
        let store = FeatureSnapshotStore::from_history(&config, matches, stats)?;
        Ok(Self::new(config, store, default_classifiers()))
    }

    /// Use an already trained ensemble instead of calling `train`.
    pub fn with_model(mut self, model: FittedEnsemble) -> Self {
        self.model = Some(model);
        self
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn store(&self) -> &FeatureSnapshotStore {
        &self.store
    }

    pub fn model(&self) -> Option<&FittedEnsemble> {
        self.model.as_ref()
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Record a newly settled result. The trained model is kept.
    pub fn ingest(&mut self, match_data: Match) -> Result<()> {
        self.store.ingest(match_data)
    }

    /// Train on every season in the store.
    pub fn train(&mut self) -> Result<()> {
        let seasons = self.store.seasons();
        self.fit_seasons(&seasons)
    }

    /// Train on every season up to and including `season`.
    pub fn train_through(&mut self, season: Season) -> Result<()> {
        let seasons: Vec<Season> = self.store.seasons().into_iter().filter(|s| *s <= season).collect();
        self.fit_seasons(&seasons)
    }

    fn fit_seasons(&mut self, seasons: &[Season]) -> Result<()> {
        let (Some(first), Some(last)) = (seasons.first(), seasons.last()) else {
            return Err(ForecastError::InsufficientData("no settled seasons to train on".into()));
        };
        let evaluator = self.evaluator()?;
        let model = evaluator.fit_on(seasons)?;
        tracing::info!(
            "Trained {} on seasons {} to {} with weights {:?}",
            MODEL_VERSION,
            first,
            last,
            model.weights()
        );
        self.model_version = format!("{}+{}", MODEL_VERSION, last);
        self.model = Some(model);
        Ok(())
    }

    fn evaluator(&self) -> Result<WalkForwardEvaluator> {
        let builder = MatchFeatureBuilder::new(&self.store);
        WalkForwardEvaluator::new(&builder, self.combiner.clone(), self.config.evaluation.clone())
    }

    /// Predict one fixture from the snapshots available before kick-off.
    /// A side with no history at all yields `InsufficientData`.
    pub fn predict(&self, match_data: &Match) -> Result<PredictionOutcome> {
        let model = self.model.as_ref().ok_or(ForecastError::NoModel)?;
        let row = MatchFeatureBuilder::new(&self.store).build_row(match_data)?;
        if let Some(reason) = insufficient(&row) {
            return Ok(PredictionOutcome::InsufficientData {
                match_id: match_data.id.clone(),
                reason,
            });
        }
        let decision = model
            .decide(&[row.features])?
            .pop()
            .ok_or_else(|| ForecastError::model_fit("ensemble", "no decision returned"))?;
        Ok(PredictionOutcome::Predicted(self.result(match_data, decision)))
    }

    /// Predict many fixtures; feature rows are built in parallel and the
    /// ensemble is called once for all of them.
    pub fn predict_many(&self, matches: &[Match]) -> Result<Vec<PredictionOutcome>> {
        let model = self.model.as_ref().ok_or(ForecastError::NoModel)?;
        let rows = MatchFeatureBuilder::new(&self.store).build_many(matches)?;

        let features: Vec<_> = rows
            .iter()
            .filter(|r| insufficient(r).is_none())
            .map(|r| r.features)
            .collect();
        let mut decisions = if features.is_empty() {
            Vec::new().into_iter()
        } else {
            model.decide(&features)?.into_iter()
        };

        let mut outcomes = Vec::with_capacity(rows.len());
        for row in &rows {
            let outcome = match insufficient(row) {
                Some(reason) => PredictionOutcome::InsufficientData {
                    match_id: row.match_data.id.clone(),
                    reason,
                },
                None => {
                    let decision = decisions
                        .next()
                        .ok_or_else(|| ForecastError::model_fit("ensemble", "missing decision"))?;
                    let result = self.result(&row.match_data, decision);
                    tracing::info!(
                        "Generated prediction for {} vs {}: Draw {:.2}%, Home {:.2}%, Away {:.2}% -> {}{}",
                        row.match_data.home_team_id,
                        row.match_data.away_team_id,
                        result.probabilities[0] * 100.0,
                        result.probabilities[1] * 100.0,
                        result.probabilities[2] * 100.0,
                        result.predicted,
                        if result.draw_corrected { " (draw corrected)" } else { "" }
                    );
                    PredictionOutcome::Predicted(result)
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Walk-forward back-test of the given seasons (all when empty).
    pub fn evaluate(&self, seasons: &[Season]) -> Result<EvaluationReport> {
        self.evaluator()?.evaluate(seasons)
    }

    fn result(&self, match_data: &Match, decision: EnsembleDecision) -> PredictionResult {
        PredictionResult {
            id: Uuid::new_v4(),
            match_id: match_data.id.clone(),
            predicted: decision.predicted,
            probabilities: decision.probabilities,
            confidence: decision.confidence,
            draw_corrected: decision.draw_corrected,
            model_version: self.model_version.clone(),
            created_at: Utc::now(),
        }
    }
}

fn insufficient(row: &MatchRow) -> Option<String> {
    let empty: Vec<String> = [&row.home, &row.away]
        .iter()
        .filter(|s| s.is_empty())
        .map(|s| s.team_id.to_string())
        .collect();
    if empty.is_empty() {
        None
    } else {
        Some(format!("no history as of {} for {}", row.home.as_of, empty.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Outcome, TeamId};
    use chrono::{Duration, NaiveDate};

    fn fixture(id: &str, season: i32, day: i64, home: u32, away: u32, score: Option<(u8, u8)>) -> Match {
        Match {
            id: id.to_string(),
            season: Season(season),
            date: NaiveDate::from_ymd_opt(season, 8, 1).unwrap() + Duration::days(day),
            home_team_id: TeamId(home),
            away_team_id: TeamId(away),
            home_score: score.map(|s| s.0),
            away_score: score.map(|s| s.1),
            league: "Test League".to_string(),
        }
    }

    /// Team 1 beats everyone 3-0, the rest draw among themselves.
    fn history() -> Vec<Match> {
        let mut matches = Vec::new();
        let mut day = 0;
        for season in [2021, 2022] {
            for round in 0..3 {
                for (home, away) in [(1, 2), (3, 1), (2, 3), (1, 4), (4, 2), (3, 4)] {
                    let (home, away) = if round % 2 == 0 { (home, away) } else { (away, home) };
                    let score = if home == 1 {
                        (3, 0)
                    } else if away == 1 {
                        (0, 3)
                    } else {
                        (1, 1)
                    };
                    matches.push(fixture(&format!("{}-{}", season, day), season, day, home, away, Some(score)));
                    day += 3;
                }
            }
            day = 0;
        }
        matches
    }

    fn trained() -> Forecaster {
        let mut forecaster = Forecaster::from_history(ForecastConfig::default(), &history(), Vec::new()).unwrap();
        forecaster.train().unwrap();
        forecaster
    }

    #[test]
    fn test_predict_requires_a_model() {
        let forecaster = Forecaster::from_history(ForecastConfig::default(), &history(), Vec::new()).unwrap();
        let upcoming = fixture("next", 2022, 200, 1, 2, None);
        assert!(matches!(forecaster.predict(&upcoming), Err(ForecastError::NoModel)));
    }

    #[test]
    fn test_unknown_team_gets_insufficient_data() {
        let forecaster = trained();
        let upcoming = fixture("next", 2022, 200, 1, 99, None);
        match forecaster.predict(&upcoming).unwrap() {
            PredictionOutcome::InsufficientData { match_id, reason } => {
                assert_eq!(match_id, "next");
                assert!(reason.contains("Team(99)"));
            }
            other => panic!("expected insufficient data, got {:?}", other),
        }
    }

    #[test]
    fn test_prediction_is_a_distribution() {
        let forecaster = trained();
        assert!(forecaster.model_version().starts_with(MODEL_VERSION));
        let upcoming = fixture("next", 2022, 200, 1, 2, None);
        let outcome = forecaster.predict(&upcoming).unwrap();
        let result = outcome.result().unwrap();
        let total: f64 = result.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(result.match_id, "next");
        assert!(result.probability(Outcome::HomeWin) > result.probability(Outcome::AwayWin));
    }

    #[test]
    fn test_predict_many_keeps_order() {
        let forecaster = trained();
        let upcoming = vec![
            fixture("a", 2022, 200, 2, 1, None),
            fixture("b", 2022, 200, 5, 6, None),
            fixture("c", 2022, 201, 3, 4, None),
        ];
        let outcomes = forecaster.predict_many(&upcoming).unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].result().map(|r| r.match_id.as_str()), Some("a"));
        assert!(outcomes[1].result().is_none());
        assert_eq!(outcomes[2].result().map(|r| r.match_id.as_str()), Some("c"));
    }

    #[test]
    fn test_train_through_ignores_later_seasons() {
        let mut forecaster = Forecaster::from_history(ForecastConfig::default(), &history(), Vec::new()).unwrap();
        forecaster.train_through(Season(2021)).unwrap();
        assert_eq!(forecaster.model_version(), format!("{}+{}", MODEL_VERSION, Season(2021)));
        assert!(forecaster.train_through(Season(2019)).is_err());
    }
}
