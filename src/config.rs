use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::error::{ForecastError, Result};

/// Rating engine knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingConfig {
    pub initial_rating: f64,
    pub k_factor: f64,
    /// Rating points added to the home side when computing expectations
    pub home_advantage: f64,
    /// A match involving a team with fewer rated matches than this uses a
    /// boosted K so new teams converge faster. 0 disables the boost.
    pub provisional_matches: u32,
    pub provisional_k_multiplier: f64,
    /// Scale K by the goal margin (1 goal: 1.0, 2 goals: 1.5, then (11+n)/8)
    pub goal_margin_scaling: bool,
    /// Fraction of the distance to `initial_rating` removed at the start of
    /// a team's next season. 0 carries ratings over unchanged.
    pub season_regression: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            initial_rating: 1500.0,
            k_factor: 32.0,
            home_advantage: 0.0,
            provisional_matches: 5,
            provisional_k_multiplier: 1.5,
            goal_margin_scaling: false,
            season_regression: 0.0,
        }
    }
}

/// Baseline values served for aggregates when a team has too little
/// history in a season. Roughly a mid-table top-flight side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDefaults {
    pub points_per_game: f64,
    pub goals_for_per_game: f64,
    pub goals_against_per_game: f64,
    pub shots_per_game: f64,
    pub shots_on_target_per_game: f64,
    pub possession: f64,
    pub corners_per_game: f64,
    pub discipline_index: f64,
}

impl Default for SnapshotDefaults {
    fn default() -> Self {
        Self {
            points_per_game: 1.35,
            goals_for_per_game: 1.35,
            goals_against_per_game: 1.35,
            shots_per_game: 12.0,
            shots_on_target_per_game: 4.5,
            possession: 50.0,
            corners_per_game: 5.0,
            discipline_index: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Number of most recent settled matches summed into the form score
    pub form_window: usize,
    /// Below this many season matches the aggregates fall back to defaults
    pub min_matches: usize,
    pub defaults: SnapshotDefaults,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            form_window: 5,
            min_matches: 3,
            defaults: SnapshotDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub min_train_matches: usize,
    pub min_test_matches: usize,
    /// Folds used to estimate each model's out-of-fold accuracy
    pub cv_folds: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            min_train_matches: 10,
            min_test_matches: 10,
            cv_folds: 5,
        }
    }
}

/// Thresholds for the draw-correction rule stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawCorrectionConfig {
    pub enabled: bool,
    /// Only wins predicted with less confidence than this are reconsidered
    pub confidence_threshold: f64,
    pub rating_gap: f64,
    pub form_gap: f64,
    pub goal_difference_gap: f64,
    pub possession_gap: f64,
    /// Closeness indicators that must hold for the override to fire
    pub min_indicators: usize,
}

impl Default for DrawCorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: 0.55,
            rating_gap: 50.0,
            form_gap: 1.0,
            goal_difference_gap: 0.5,
            possession_gap: 5.0,
            min_indicators: 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    pub rating: RatingConfig,
    pub snapshot: SnapshotConfig,
    pub evaluation: EvaluationConfig,
    pub draw_correction: DrawCorrectionConfig,
}

impl ForecastConfig {
    /// Build the configuration from `ODDSFORGE_*` environment variables,
    /// falling back to the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        let rating = &mut config.rating;
        read_var("ODDSFORGE_INITIAL_RATING", &mut rating.initial_rating)?;
        read_var("ODDSFORGE_K_FACTOR", &mut rating.k_factor)?;
        read_var("ODDSFORGE_HOME_ADVANTAGE", &mut rating.home_advantage)?;
        read_var("ODDSFORGE_PROVISIONAL_MATCHES", &mut rating.provisional_matches)?;
        read_var("ODDSFORGE_PROVISIONAL_K_MULTIPLIER", &mut rating.provisional_k_multiplier)?;
        read_var("ODDSFORGE_GOAL_MARGIN_SCALING", &mut rating.goal_margin_scaling)?;
        read_var("ODDSFORGE_SEASON_REGRESSION", &mut rating.season_regression)?;

        let snapshot = &mut config.snapshot;
        read_var("ODDSFORGE_FORM_WINDOW", &mut snapshot.form_window)?;
        read_var("ODDSFORGE_MIN_SNAPSHOT_MATCHES", &mut snapshot.min_matches)?;

        let evaluation = &mut config.evaluation;
        read_var("ODDSFORGE_MIN_TRAIN_MATCHES", &mut evaluation.min_train_matches)?;
        read_var("ODDSFORGE_MIN_TEST_MATCHES", &mut evaluation.min_test_matches)?;
        read_var("ODDSFORGE_CV_FOLDS", &mut evaluation.cv_folds)?;

        let draw = &mut config.draw_correction;
        read_var("ODDSFORGE_DRAW_CORRECTION", &mut draw.enabled)?;
        read_var("ODDSFORGE_DRAW_CONFIDENCE", &mut draw.confidence_threshold)?;
        read_var("ODDSFORGE_DRAW_RATING_GAP", &mut draw.rating_gap)?;
        read_var("ODDSFORGE_DRAW_FORM_GAP", &mut draw.form_gap)?;
        read_var("ODDSFORGE_DRAW_GOAL_DIFF_GAP", &mut draw.goal_difference_gap)?;
        read_var("ODDSFORGE_DRAW_POSSESSION_GAP", &mut draw.possession_gap)?;
        read_var("ODDSFORGE_DRAW_MIN_INDICATORS", &mut draw.min_indicators)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rating.k_factor <= 0.0 {
            return Err(ForecastError::Config("k_factor must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.rating.season_regression) {
            return Err(ForecastError::Config(
                "season_regression must be within [0, 1]".into(),
            ));
        }
        if self.snapshot.form_window == 0 {
            return Err(ForecastError::Config("form_window must be at least 1".into()));
        }
        if self.evaluation.cv_folds < 2 {
            return Err(ForecastError::Config("cv_folds must be at least 2".into()));
        }
        Ok(())
    }
}

fn read_var<T: FromStr>(key: &str, target: &mut T) -> Result<()> {
    if let Ok(raw) = env::var(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ForecastError::Config(format!("{} has invalid value '{}'", key, raw)))?;
    }
    Ok(())
}
