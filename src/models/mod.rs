use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub u32);

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Team({})", self.0)
    }
}

/// Season keyed by its starting year, so 2023 is the 2023/24 campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Season(pub i32);

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:02}", self.0, (self.0 + 1).rem_euclid(100))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub league: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub season: Season,
    pub date: NaiveDate,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub home_score: Option<u8>, // None until the match is settled
    pub away_score: Option<u8>,
    pub league: String,
}

impl Match {
    pub fn is_settled(&self) -> bool {
        self.home_score.is_some() && self.away_score.is_some()
    }

    /// Chronological order key. Fixtures on the same day share a key.
    pub fn order_key(&self) -> (Season, NaiveDate) {
        (self.season, self.date)
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match (self.home_score, self.away_score) {
            (Some(h), Some(a)) => Some(Outcome::from_scores(h, a)),
            _ => None,
        }
    }

    pub fn involves(&self, team: TeamId) -> bool {
        self.home_team_id == team || self.away_team_id == team
    }

    /// (goals for, goals against) from the given team's perspective
    pub fn goals_for(&self, team: TeamId) -> Option<(u8, u8)> {
        let (h, a) = (self.home_score?, self.away_score?);
        if team == self.home_team_id {
            Some((h, a))
        } else if team == self.away_team_id {
            Some((a, h))
        } else {
            None
        }
    }

    /// League points earned by the team: 3 for a win, 1 for a draw
    pub fn points_for(&self, team: TeamId) -> Option<u8> {
        let (scored, conceded) = self.goals_for(team)?;
        Some(match scored.cmp(&conceded) {
            std::cmp::Ordering::Greater => 3,
            std::cmp::Ordering::Equal => 1,
            std::cmp::Ordering::Less => 0,
        })
    }
}

/// Raw per-team statistics for one match. Every field is optional because
/// providers rarely agree on what they record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamMatchStats {
    pub match_id: String,
    pub team_id: TeamId,
    pub shots: Option<u32>,
    pub shots_on_target: Option<u32>,
    pub possession: Option<f64>, // percent, 0-100
    pub corners: Option<u32>,
    pub fouls: Option<u32>,
    pub yellow_cards: Option<u32>,
    pub red_cards: Option<u32>,
}

/// Match result class. The discriminants are the class indices used by the
/// classifiers and probability vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Draw = 0,
    HomeWin = 1,
    AwayWin = 2,
}

impl Outcome {
    pub const ALL: [Outcome; 3] = [Outcome::Draw, Outcome::HomeWin, Outcome::AwayWin];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn from_scores(home: u8, away: u8) -> Self {
        match home.cmp(&away) {
            std::cmp::Ordering::Greater => Outcome::HomeWin,
            std::cmp::Ordering::Equal => Outcome::Draw,
            std::cmp::Ordering::Less => Outcome::AwayWin,
        }
    }

    pub fn is_win(self) -> bool {
        self != Outcome::Draw
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Draw => write!(f, "draw"),
            Outcome::HomeWin => write!(f, "home"),
            Outcome::AwayWin => write!(f, "away"),
        }
    }
}

/// Strength of one team within one season scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub team_id: TeamId,
    pub season: Season,
    pub value: f64,
    pub matches_played: u32,
    pub last_updated: Option<NaiveDate>,
}

/// Point-in-time aggregate of one team's season, usable as model input.
///
/// Every aggregate only reflects settled matches dated on or before
/// `as_of`. When `sample_size` is below the store's minimum the aggregate
/// fields hold baseline values instead of observed ones; `rating` is always
/// the engine's rating at `as_of`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub team_id: TeamId,
    pub season: Season,
    pub as_of: NaiveDate,
    pub rating: f64,
    /// Rated matches across all seasons up to `as_of`
    pub rated_matches: u32,
    /// Points from the last `form_window` settled matches
    pub form: f64,
    pub form_window: usize,
    pub points_per_game: f64,
    pub goals_for_per_game: f64,
    pub goals_against_per_game: f64,
    pub shots_per_game: f64,
    pub shots_on_target_per_game: f64,
    pub possession: f64,
    pub corners_per_game: f64,
    /// Yellow cards + 3 x red cards + 0.1 x fouls, per game
    pub discipline_index: f64,
    /// Settled season matches the aggregates were drawn from
    pub sample_size: usize,
    /// Of those, matches that had a raw statistics row
    pub stats_sample_size: usize,
}

impl FeatureSnapshot {
    /// No season matches and no rating history at all
    pub fn is_empty(&self) -> bool {
        self.sample_size == 0 && self.rated_matches == 0
    }

    pub fn goal_difference_per_game(&self) -> f64 {
        self.goals_for_per_game - self.goals_against_per_game
    }
}

/// Relative features for one fixture, derived from the home and away
/// snapshots. Field order matches [`MatchFeatureVector::NAMES`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchFeatureVector {
    pub home_rating: f64,
    pub away_rating: f64,
    pub rating_advantage: f64,
    pub home_form: f64,
    pub away_form: f64,
    pub form_advantage: f64,
    pub points_per_game_advantage: f64,
    pub goal_difference_advantage: f64,
    pub attack_ratio: f64,
    pub defence_ratio: f64,
    pub shots_advantage: f64,
    pub shots_on_target_advantage: f64,
    pub shot_accuracy_ratio: f64,
    pub possession_advantage: f64,
    pub corners_advantage: f64,
    pub discipline_advantage: f64,
    pub rating_form_interaction: f64,
    pub min_sample: f64,
}

impl MatchFeatureVector {
    pub const DIM: usize = 18;

    pub const NAMES: [&'static str; Self::DIM] = [
        "home_rating",
        "away_rating",
        "rating_advantage",
        "home_form",
        "away_form",
        "form_advantage",
        "points_per_game_advantage",
        "goal_difference_advantage",
        "attack_ratio",
        "defence_ratio",
        "shots_advantage",
        "shots_on_target_advantage",
        "shot_accuracy_ratio",
        "possession_advantage",
        "corners_advantage",
        "discipline_advantage",
        "rating_form_interaction",
        "min_sample",
    ];

    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.home_rating,
            self.away_rating,
            self.rating_advantage,
            self.home_form,
            self.away_form,
            self.form_advantage,
            self.points_per_game_advantage,
            self.goal_difference_advantage,
            self.attack_ratio,
            self.defence_ratio,
            self.shots_advantage,
            self.shots_on_target_advantage,
            self.shot_accuracy_ratio,
            self.possession_advantage,
            self.corners_advantage,
            self.discipline_advantage,
            self.rating_form_interaction,
            self.min_sample,
        ]
    }

    pub fn feature_index(name: &str) -> Option<usize> {
        Self::NAMES.iter().position(|n| *n == name)
    }

    pub fn is_finite(&self) -> bool {
        self.to_vec().iter().all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub id: Uuid,
    pub match_id: String,
    pub predicted: Outcome,
    /// Indexed by [`Outcome::index`]: draw, home, away
    pub probabilities: [f64; 3],
    pub confidence: f64,
    pub draw_corrected: bool,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

impl PredictionResult {
    pub fn probability(&self, outcome: Outcome) -> f64 {
        self.probabilities[outcome.index()]
    }
}

/// Single-match prediction answer. Thin history yields an explicit
/// `InsufficientData` rather than a guessed result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionOutcome {
    Predicted(PredictionResult),
    InsufficientData { match_id: String, reason: String },
}

impl PredictionOutcome {
    pub fn result(&self) -> Option<&PredictionResult> {
        match self {
            PredictionOutcome::Predicted(result) => Some(result),
            PredictionOutcome::InsufficientData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassBreakdown {
    pub actual: usize,
    pub predicted: usize,
    pub correct: usize,
}

impl ClassBreakdown {
    pub fn precision(&self) -> f64 {
        if self.predicted == 0 {
            0.0
        } else {
            self.correct as f64 / self.predicted as f64
        }
    }

    pub fn recall(&self) -> f64 {
        if self.actual == 0 {
            0.0
        } else {
            self.correct as f64 / self.actual as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonReport {
    pub season: Season,
    pub train_seasons: Vec<Season>,
    pub train_matches: usize,
    pub test_matches: usize,
    pub correct: usize,
    pub accuracy: f64,
    /// Mean multi-class Brier score of the final probabilities
    pub brier_score: f64,
    pub draw_corrections: usize,
    pub per_class: BTreeMap<Outcome, ClassBreakdown>,
    pub model_weights: BTreeMap<String, f64>,
    pub dropped_models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedSeason {
    pub season: Season,
    pub reason: String,
}

/// Batch back-test result: possibly partial, always lists what was skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub seasons: Vec<SeasonReport>,
    pub skipped: Vec<SkippedSeason>,
    pub mean_accuracy: Option<f64>,
    pub accuracy_std_dev: Option<f64>,
}

impl EvaluationReport {
    pub fn accuracy_by_season(&self) -> BTreeMap<Season, f64> {
        self.seasons.iter().map(|s| (s.season, s.accuracy)).collect()
    }

    pub fn season(&self, season: Season) -> Option<&SeasonReport> {
        self.seasons.iter().find(|s| s.season == season)
    }
}
