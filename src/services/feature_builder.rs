use chrono::{Duration, NaiveDate};
use rayon::prelude::*;

use crate::error::{ForecastError, Result};
use crate::models::{FeatureSnapshot, Match, MatchFeatureVector};
use crate::services::snapshot_store::FeatureSnapshotStore;

/// Additive smoothing for ratios of per-game averages, so a side that has
/// not scored yet gives a large but bounded ratio.
const RATIO_EPSILON: f64 = 0.1;

/// Rating points and form points that map the interaction term onto
/// roughly unit scale.
const RATING_SCALE: f64 = 100.0;

/// Features for one fixture together with the snapshots they came from.
#[derive(Debug, Clone)]
pub struct MatchRow {
    pub match_data: Match,
    pub home: FeatureSnapshot,
    pub away: FeatureSnapshot,
    pub features: MatchFeatureVector,
}

impl MatchRow {
    /// Both sides have at least some history behind them
    pub fn is_evaluable(&self) -> bool {
        !self.home.is_empty() && !self.away.is_empty()
    }
}

pub struct MatchFeatureBuilder<'a> {
    store: &'a FeatureSnapshotStore,
}

impl<'a> MatchFeatureBuilder<'a> {
    pub fn new(store: &'a FeatureSnapshotStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &FeatureSnapshotStore {
        self.store
    }

    /// Reference date for a fixture: the day before kick-off, capped at the
    /// last date with observed results.
    pub fn as_of_for(&self, match_data: &Match) -> NaiveDate {
        let before = match_data.date - Duration::days(1);
        match self.store.horizon() {
            Some(horizon) => before.min(horizon),
            None => before,
        }
    }

    pub fn build(&self, match_data: &Match) -> Result<MatchFeatureVector> {
        Ok(self.build_row(match_data)?.features)
    }

    pub fn build_row(&self, match_data: &Match) -> Result<MatchRow> {
        self.build_row_as_of(match_data, self.as_of_for(match_data))
    }

    /// Build features from snapshots taken at `as_of`, which must be strictly
    /// before the match itself.
    pub fn build_as_of(&self, match_data: &Match, as_of: NaiveDate) -> Result<MatchFeatureVector> {
        Ok(self.build_row_as_of(match_data, as_of)?.features)
    }

    fn build_row_as_of(&self, match_data: &Match, as_of: NaiveDate) -> Result<MatchRow> {
        if as_of >= match_data.date {
            return Err(ForecastError::OrderingViolation(format!(
                "features for {} on {} requested as of {}",
                match_data.id, match_data.date, as_of
            )));
        }
        let home = self
            .store
            .get_snapshot(match_data.home_team_id, match_data.season, as_of)?;
        let away = self
            .store
            .get_snapshot(match_data.away_team_id, match_data.season, as_of)?;
        let features = Self::combine(&home, &away);
        Ok(MatchRow {
            match_data: match_data.clone(),
            home,
            away,
            features,
        })
    }

    /// Build rows for many fixtures. Snapshots are warmed in parallel first,
    /// then rows are assembled in parallel; output order follows input.
    pub fn build_many(&self, matches: &[Match]) -> Result<Vec<MatchRow>> {
        let requests: Vec<_> = matches
            .iter()
            .flat_map(|m| {
                let as_of = self.as_of_for(m);
                [(m.home_team_id, m.season, as_of), (m.away_team_id, m.season, as_of)]
            })
            .collect();
        self.store.precompute(&requests)?;

        matches.par_iter().map(|m| self.build_row(m)).collect()
    }

    /// Relative features from a pair of snapshots. Pure; never yields NaN
    /// or infinite values.
    pub fn combine(home: &FeatureSnapshot, away: &FeatureSnapshot) -> MatchFeatureVector {
        let rating_advantage = home.rating - away.rating;
        let form_advantage = home.form - away.form;
        let form_scale = home.form_window.max(away.form_window).max(1) as f64;

        let home_accuracy = safe_ratio(home.shots_on_target_per_game, home.shots_per_game);
        let away_accuracy = safe_ratio(away.shots_on_target_per_game, away.shots_per_game);

        let features = MatchFeatureVector {
            home_rating: home.rating,
            away_rating: away.rating,
            rating_advantage,
            home_form: home.form,
            away_form: away.form,
            form_advantage,
            points_per_game_advantage: home.points_per_game - away.points_per_game,
            goal_difference_advantage: home.goal_difference_per_game() - away.goal_difference_per_game(),
            attack_ratio: safe_ratio(home.goals_for_per_game, away.goals_for_per_game),
            defence_ratio: safe_ratio(away.goals_against_per_game, home.goals_against_per_game),
            shots_advantage: home.shots_per_game - away.shots_per_game,
            shots_on_target_advantage: home.shots_on_target_per_game - away.shots_on_target_per_game,
            shot_accuracy_ratio: safe_ratio(home_accuracy, away_accuracy),
            possession_advantage: home.possession - away.possession,
            corners_advantage: home.corners_per_game - away.corners_per_game,
            discipline_advantage: home.discipline_index - away.discipline_index,
            rating_form_interaction: (rating_advantage / RATING_SCALE) * (form_advantage / form_scale),
            min_sample: home.sample_size.min(away.sample_size) as f64,
        };
        sanitize(features)
    }
}

/// Epsilon-guarded ratio; undefined results collapse to the neutral 1.0
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    let ratio = (numerator + RATIO_EPSILON) / (denominator + RATIO_EPSILON);
    if ratio.is_finite() {
        ratio
    } else {
        1.0
    }
}

fn neutral(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

fn sanitize(mut f: MatchFeatureVector) -> MatchFeatureVector {
    for value in [
        &mut f.home_rating,
        &mut f.away_rating,
        &mut f.rating_advantage,
        &mut f.home_form,
        &mut f.away_form,
        &mut f.form_advantage,
        &mut f.points_per_game_advantage,
        &mut f.goal_difference_advantage,
        &mut f.shots_advantage,
        &mut f.shots_on_target_advantage,
        &mut f.possession_advantage,
        &mut f.corners_advantage,
        &mut f.discipline_advantage,
        &mut f.rating_form_interaction,
        &mut f.min_sample,
    ] {
        *value = neutral(*value, 0.0);
    }
    for ratio in [&mut f.attack_ratio, &mut f.defence_ratio, &mut f.shot_accuracy_ratio] {
        *ratio = neutral(*ratio, 1.0);
    }
    f
}
