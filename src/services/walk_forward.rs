use std::collections::BTreeMap;

use crate::config::EvaluationConfig;
use crate::error::{ForecastError, Result};
use crate::models::{ClassBreakdown, EvaluationReport, Outcome, Season, SeasonReport, SkippedSeason};
use crate::services::ensemble::{EnsembleCombiner, FittedEnsemble};
use crate::services::feature_builder::{MatchFeatureBuilder, MatchRow};
use crate::utils::{brier_score, mean_and_std_dev};

/// One train/test split: every season in `train` precedes `test`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkForwardStep {
    pub train: Vec<Season>,
    pub test: Season,
}

/// Expanding-window season iterator. For sorted seasons S1..Sn it yields
/// ([S1], S2), ([S1, S2], S3) and so on.
#[derive(Debug, Clone)]
pub struct WalkForward {
    seasons: Vec<Season>,
    next: usize,
}

impl WalkForward {
    pub fn new(seasons: impl IntoIterator<Item = Season>) -> Self {
        let mut seasons: Vec<Season> = seasons.into_iter().collect();
        seasons.sort();
        seasons.dedup();
        Self { seasons, next: 1 }
    }
}

impl Iterator for WalkForward {
    type Item = WalkForwardStep;

    fn next(&mut self) -> Option<Self::Item> {
        let test = *self.seasons.get(self.next)?;
        let train = self.seasons[..self.next].to_vec();
        self.next += 1;
        Some(WalkForwardStep { train, test })
    }
}

pub enum StepOutcome {
    Scored { report: SeasonReport, model: FittedEnsemble },
    Skipped(SkippedSeason),
}

/// Refuse any split that would train on the season being tested or a
/// later one.
pub fn ensure_no_leakage(step: &WalkForwardStep) -> Result<()> {
    match step.train.iter().find(|s| **s >= step.test) {
        Some(season) => Err(ForecastError::OrderingViolation(format!(
            "training season {} is not before test season {}",
            season, step.test
        ))),
        None => Ok(()),
    }
}

/// Season-by-season back-test over pre-built feature rows.
pub struct WalkForwardEvaluator {
    rows: BTreeMap<Season, Vec<MatchRow>>,
    combiner: EnsembleCombiner,
    config: EvaluationConfig,
}

impl WalkForwardEvaluator {
    /// Build rows for every settled match in the builder's store.
    pub fn new(builder: &MatchFeatureBuilder, combiner: EnsembleCombiner, config: EvaluationConfig) -> Result<Self> {
        let rows = builder.build_many(builder.store().matches())?;
        Ok(Self::from_rows(rows, combiner, config))
    }

    /// Rows without history on either side are dropped here.
    pub fn from_rows(rows: Vec<MatchRow>, combiner: EnsembleCombiner, config: EvaluationConfig) -> Self {
        let total = rows.len();
        let mut by_season: BTreeMap<Season, Vec<MatchRow>> = BTreeMap::new();
        for row in rows.into_iter().filter(MatchRow::is_evaluable) {
            by_season.entry(row.match_data.season).or_default().push(row);
        }
        let evaluable: usize = by_season.values().map(Vec::len).sum();
        tracing::info!(
            "Walk-forward: {} of {} matches evaluable across {} seasons",
            evaluable,
            total,
            by_season.len()
        );
        Self {
            rows: by_season,
            combiner,
            config,
        }
    }

    pub fn seasons(&self) -> Vec<Season> {
        self.rows.keys().copied().collect()
    }

    pub fn steps(&self) -> WalkForward {
        WalkForward::new(self.seasons())
    }

    /// Fit on the training window and score the test season. Thin data
    /// and failed fits come back as `Skipped`; leakage is an error.
    pub fn run_step(&self, step: &WalkForwardStep) -> Result<StepOutcome> {
        ensure_no_leakage(step)?;

        let train: Vec<&MatchRow> = step
            .train
            .iter()
            .flat_map(|s| self.rows.get(s).into_iter().flatten())
            .collect();
        let test: Vec<&MatchRow> = self.rows.get(&step.test).into_iter().flatten().collect();

        if train.len() < self.config.min_train_matches {
            return Ok(skip(
                step.test,
                format!(
                    "insufficient data: {} training matches, need {}",
                    train.len(),
                    self.config.min_train_matches
                ),
            ));
        }
        if test.len() < self.config.min_test_matches {
            return Ok(skip(
                step.test,
                format!(
                    "insufficient data: {} test matches, need {}",
                    test.len(),
                    self.config.min_test_matches
                ),
            ));
        }

        let (x, y) = labelled(&train);
        let model = match self.combiner.fit(&x, &y) {
            Ok(model) => model,
            Err(e) if !e.is_fatal() => return Ok(skip(step.test, e.to_string())),
            Err(e) => return Err(e),
        };

        let features: Vec<_> = test.iter().map(|r| r.features).collect();
        let decisions = match model.decide(&features) {
            Ok(decisions) => decisions,
            Err(e) if !e.is_fatal() => return Ok(skip(step.test, e.to_string())),
            Err(e) => return Err(e),
        };

        let mut per_class: BTreeMap<Outcome, ClassBreakdown> =
            Outcome::ALL.iter().map(|o| (*o, ClassBreakdown::default())).collect();
        let mut correct = 0;
        let mut brier = 0.0;
        let mut scored = 0;
        for (row, decision) in test.iter().zip(&decisions) {
            let Some(actual) = row.match_data.outcome() else {
                continue;
            };
            scored += 1;
            brier += brier_score(&decision.probabilities, actual);
            per_class.entry(actual).or_default().actual += 1;
            per_class.entry(decision.predicted).or_default().predicted += 1;
            if decision.predicted == actual {
                correct += 1;
                per_class.entry(actual).or_default().correct += 1;
            }
        }

        let accuracy = if scored > 0 { correct as f64 / scored as f64 } else { 0.0 };
        let report = SeasonReport {
            season: step.test,
            train_seasons: step.train.clone(),
            train_matches: x.len(),
            test_matches: scored,
            correct,
            accuracy,
            brier_score: if scored > 0 { brier / scored as f64 } else { 0.0 },
            draw_corrections: decisions.iter().filter(|d| d.draw_corrected).count(),
            per_class,
            model_weights: model.weights(),
            dropped_models: model.dropped().to_vec(),
        };
        Ok(StepOutcome::Scored { report, model })
    }

    /// Score each requested season (all but the first when `seasons` is
    /// empty) with a model trained on every earlier season.
    pub fn evaluate(&self, seasons: &[Season]) -> Result<EvaluationReport> {
        let mut report = EvaluationReport::default();
        let steps: Vec<WalkForwardStep> = self.steps().collect();

        let targets: Vec<Season> = if seasons.is_empty() {
            steps.iter().map(|s| s.test).collect()
        } else {
            let mut targets = seasons.to_vec();
            targets.sort();
            targets.dedup();
            targets
        };

        for target in targets {
            let outcome = match steps.iter().find(|s| s.test == target) {
                Some(step) => self.run_step(step)?,
                None if self.rows.contains_key(&target) => {
                    skip(target, "insufficient data: no earlier season to train on".to_string())
                }
                None => skip(target, "insufficient data: no evaluable matches".to_string()),
            };

            match outcome {
                StepOutcome::Scored { report: season, .. } => {
                    tracing::info!(
                        "Season {}: {:.1}% accuracy over {} matches (trained on {} matches)",
                        season.season,
                        season.accuracy * 100.0,
                        season.test_matches,
                        season.train_matches
                    );
                    report.seasons.push(season);
                }
                StepOutcome::Skipped(skipped) => {
                    let err = ForecastError::DegenerateSeason {
                        season: skipped.season,
                        reason: skipped.reason.clone(),
                    };
                    tracing::warn!("Skipping season: {}", err);
                    report.skipped.push(skipped);
                }
            }
        }

        let accuracies: Vec<f64> = report.seasons.iter().map(|s| s.accuracy).collect();
        if let Some((mean, std_dev)) = mean_and_std_dev(&accuracies) {
            tracing::info!("Mean accuracy {:.1}% (std dev {:.1}%)", mean * 100.0, std_dev * 100.0);
            report.mean_accuracy = Some(mean);
            report.accuracy_std_dev = Some(std_dev);
        }
        Ok(report)
    }

    /// Fit on every evaluable row of `seasons`.
    pub fn fit_on(&self, seasons: &[Season]) -> Result<FittedEnsemble> {
        let rows: Vec<&MatchRow> = seasons
            .iter()
            .flat_map(|s| self.rows.get(s).into_iter().flatten())
            .collect();
        if rows.len() < self.config.min_train_matches {
            return Err(ForecastError::InsufficientData(format!(
                "{} training matches, need {}",
                rows.len(),
                self.config.min_train_matches
            )));
        }
        let (x, y) = labelled(&rows);
        self.combiner.fit(&x, &y)
    }
}

fn skip(season: Season, reason: String) -> StepOutcome {
    StepOutcome::Skipped(SkippedSeason { season, reason })
}

fn labelled(rows: &[&MatchRow]) -> (Vec<Vec<f64>>, Vec<Outcome>) {
    rows.iter()
        .filter_map(|r| r.match_data.outcome().map(|o| (r.features.to_vec(), o)))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForecastConfig;
    use crate::models::{Match, TeamId};
    use crate::services::classifiers::default_classifiers;
    use crate::services::ensemble::DrawCorrection;
    use crate::services::snapshot_store::FeatureSnapshotStore;
    use chrono::{Duration, NaiveDate};

    /// Four teams, double round robin per season; the lower id always wins
    /// 2-0. The last season is cut short after `short_last` matches.
    fn league(seasons: &[i32], short_last: usize) -> Vec<Match> {
        let pairs: Vec<(u32, u32)> = (1..=4)
            .flat_map(|h| (1..=4).filter(move |a| *a != h).map(move |a| (h, a)))
            .collect();
        let mut matches = Vec::new();
        for (si, season) in seasons.iter().enumerate() {
            let start = NaiveDate::from_ymd_opt(*season, 8, 1).unwrap();
            let limit = if si + 1 == seasons.len() { short_last } else { pairs.len() };
            for (i, (home, away)) in pairs.iter().take(limit).enumerate() {
                let home_wins = home < away;
                matches.push(Match {
                    id: format!("{}-{}", season, i),
                    season: Season(*season),
                    date: start + Duration::days(7 * i as i64),
                    home_team_id: TeamId(*home),
                    away_team_id: TeamId(*away),
                    home_score: Some(if home_wins { 2 } else { 0 }),
                    away_score: Some(if home_wins { 0 } else { 2 }),
                    league: "Test League".to_string(),
                });
            }
        }
        matches
    }

    fn evaluator(matches: &[Match]) -> WalkForwardEvaluator {
        let config = ForecastConfig::default();
        let store = FeatureSnapshotStore::from_history(&config, matches, Vec::new()).unwrap();
        let builder = MatchFeatureBuilder::new(&store);
        let combiner = EnsembleCombiner::new(default_classifiers(), 2, DrawCorrection::disabled());
        WalkForwardEvaluator::new(
            &builder,
            combiner,
            EvaluationConfig {
                min_train_matches: 5,
                min_test_matches: 5,
                cv_folds: 2,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_walk_forward_never_trains_on_test_season() {
        let steps: Vec<_> = WalkForward::new(vec![Season(2022), Season(2020), Season(2021), Season(2020)]).collect();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].train, vec![Season(2020)]);
        assert_eq!(steps[0].test, Season(2021));
        assert_eq!(steps[1].train, vec![Season(2020), Season(2021)]);
        for step in &steps {
            assert!(step.train.iter().all(|s| *s < step.test));
            assert!(ensure_no_leakage(step).is_ok());
        }
    }

    #[test]
    fn test_leakage_guard_rejects_overlap() {
        let step = WalkForwardStep {
            train: vec![Season(2021), Season(2022)],
            test: Season(2022),
        };
        let err = ensure_no_leakage(&step).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_short_season_is_skipped_not_fatal() {
        let evaluator = evaluator(&league(&[2020, 2021, 2022], 3));
        let report = evaluator.evaluate(&[]).unwrap();

        let scored = report.season(Season(2021)).unwrap();
        assert_eq!(scored.train_seasons, vec![Season(2020)]);
        assert_eq!(scored.test_matches, 12);
        assert!((0.0..=1.0).contains(&scored.accuracy));
        let class_total: usize = scored.per_class.values().map(|c| c.actual).sum();
        assert_eq!(class_total, scored.test_matches);

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].season, Season(2022));
        assert!(report.skipped[0].reason.contains("insufficient data"));
        assert_eq!(report.accuracy_by_season().len(), 1);
        assert_eq!(report.accuracy_std_dev, Some(0.0));
    }

    #[test]
    fn test_first_season_requested_explicitly_is_skipped() {
        let evaluator = evaluator(&league(&[2020, 2021], 12));
        let report = evaluator.evaluate(&[Season(2020), Season(2019)]).unwrap();
        assert!(report.seasons.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.mean_accuracy, None);
    }

    #[test]
    fn test_rows_without_history_are_not_evaluable() {
        let evaluator = evaluator(&league(&[2020], 12));
        let first_season: usize = evaluator.rows.values().map(Vec::len).sum();
        assert!(first_season < 12);
        assert!(first_season > 0);
    }
}
