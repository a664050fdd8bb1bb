use chrono::NaiveDate;
use std::collections::HashMap;

use crate::config::RatingConfig;
use crate::error::{ForecastError, Result};
use crate::models::{Match, Outcome, Rating, Season, TeamId};

/// One entry of a team's rating history: the value after a match.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingPoint {
    pub match_id: String,
    pub season: Season,
    pub date: NaiveDate,
    pub value: f64,
}

/// Before/after values for one processed match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingChange {
    pub home_before: f64,
    pub home_after: f64,
    pub away_before: f64,
    pub away_after: f64,
    /// Points moved from away to home (negative when home lost ground)
    pub delta: f64,
    pub k_factor: f64,
}

/// ELO-style strength engine.
///
/// Matches must be fed in chronological order through [`process_match`];
/// the engine refuses anything older than the last match it has seen, since
/// a rating built out of order would leak later results into earlier
/// features.
///
/// [`process_match`]: RatingEngine::process_match
pub struct RatingEngine {
    config: RatingConfig,
    current: HashMap<TeamId, Rating>,
    archive: Vec<Rating>,
    history: HashMap<TeamId, Vec<RatingPoint>>,
    last_key: Option<(Season, NaiveDate)>,
}

impl Default for RatingEngine {
    fn default() -> Self {
        Self::new(RatingConfig::default())
    }
}

impl RatingEngine {
    pub fn new(config: RatingConfig) -> Self {
        Self {
            config,
            current: HashMap::new(),
            archive: Vec::new(),
            history: HashMap::new(),
            last_key: None,
        }
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    /// Calculate expected score based on ELO ratings
    pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
        1.0 / (1.0 + 10f64.powf((rating_b - rating_a) / 400.0))
    }

    /// Actual score for side A: 1 for a win, 0.5 for a draw, 0 for a loss
    pub fn actual_score(score_a: u8, score_b: u8) -> f64 {
        match score_a.cmp(&score_b) {
            std::cmp::Ordering::Greater => 1.0,
            std::cmp::Ordering::Equal => 0.5,
            std::cmp::Ordering::Less => 0.0,
        }
    }

    pub fn goal_margin_multiplier(score_a: u8, score_b: u8) -> f64 {
        let goal_diff = (score_a as f64 - score_b as f64).abs();
        if goal_diff <= 1.0 {
            1.0
        } else if goal_diff == 2.0 {
            1.5
        } else {
            (11.0 + goal_diff) / 8.0
        }
    }

    /// Apply one result between two teams with an explicit K and return the
    /// new ratings. Teams seen for the first time start at the initial
    /// rating. The update is zero-sum: B loses exactly what A gains.
    pub fn update(
        &mut self,
        team_a: TeamId,
        team_b: TeamId,
        score_a: u8,
        score_b: u8,
        k_factor: f64,
    ) -> (f64, f64) {
        let season = self.last_key.map(|(season, _)| season).unwrap_or(Season(0));
        let rating_a = self.seed(team_a, season);
        let rating_b = self.seed(team_b, season);
        let delta = Self::rating_delta(rating_a, rating_b, score_a, score_b, k_factor, 0.0);
        self.commit(team_a, rating_a + delta, None);
        self.commit(team_b, rating_b - delta, None);
        (rating_a + delta, rating_b - delta)
    }

    fn rating_delta(
        rating_a: f64,
        rating_b: f64,
        score_a: u8,
        score_b: u8,
        k_factor: f64,
        advantage_a: f64,
    ) -> f64 {
        let expected_a = Self::expected_score(rating_a + advantage_a, rating_b);
        k_factor * (Self::actual_score(score_a, score_b) - expected_a)
    }

    /// Fold a settled match into the ratings.
    pub fn process_match(&mut self, match_data: &Match) -> Result<RatingChange> {
        let (home_score, away_score) = match (match_data.home_score, match_data.away_score) {
            (Some(h), Some(a)) => (h, a),
            _ => {
                return Err(ForecastError::UnsettledMatch {
                    match_id: match_data.id.clone(),
                })
            }
        };

        let key = match_data.order_key();
        if let Some(last) = self.last_key {
            if key < last {
                return Err(ForecastError::out_of_order(&match_data.id, key, last));
            }
        }

        let home = match_data.home_team_id;
        let away = match_data.away_team_id;
        let home_before = self.seed(home, match_data.season);
        let away_before = self.seed(away, match_data.season);

        let mut k_factor = self.config.k_factor;
        let provisional = self.config.provisional_matches as usize;
        if self.rated_matches(home) < provisional || self.rated_matches(away) < provisional {
            k_factor *= self.config.provisional_k_multiplier;
        }
        if self.config.goal_margin_scaling {
            k_factor *= Self::goal_margin_multiplier(home_score, away_score);
        }

        let delta = Self::rating_delta(
            home_before,
            away_before,
            home_score,
            away_score,
            k_factor,
            self.config.home_advantage,
        );
        let home_after = home_before + delta;
        let away_after = away_before - delta;

        self.commit(home, home_after, Some(match_data));
        self.commit(away, away_after, Some(match_data));
        self.last_key = Some(key);

        tracing::debug!(
            "Updated ratings for {}: {} ({:.1} -> {:.1}), {} ({:.1} -> {:.1})",
            match_data.id,
            home,
            home_before,
            home_after,
            away,
            away_before,
            away_after
        );

        Ok(RatingChange {
            home_before,
            home_after,
            away_before,
            away_after,
            delta,
            k_factor,
        })
    }

    /// Process every settled match of an ordered stream; unsettled fixtures
    /// are skipped. Returns how many matches were rated.
    pub fn process_all<'a, I>(&mut self, matches: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Match>,
    {
        let mut processed = 0;
        for match_data in matches.into_iter().filter(|m| m.is_settled()) {
            self.process_match(match_data)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Current rating record for a team, moving it into a new season scope
    /// first if needed. Returns the value the next update starts from.
    fn seed(&mut self, team: TeamId, season: Season) -> f64 {
        let initial = self.config.initial_rating;
        let regression = self.config.season_regression;

        match self.current.get_mut(&team) {
            Some(rating) if rating.season < season => {
                let carried = rating.value + (initial - rating.value) * regression;
                let last_updated = rating.last_updated;
                let finished = std::mem::replace(
                    rating,
                    Rating {
                        team_id: team,
                        season,
                        value: carried,
                        matches_played: 0,
                        last_updated,
                    },
                );
                self.archive.push(finished);
                carried
            }
            Some(rating) => rating.value,
            None => {
                self.current.insert(
                    team,
                    Rating {
                        team_id: team,
                        season,
                        value: initial,
                        matches_played: 0,
                        last_updated: None,
                    },
                );
                initial
            }
        }
    }

    fn commit(&mut self, team: TeamId, value: f64, source: Option<&Match>) {
        if let Some(rating) = self.current.get_mut(&team) {
            rating.value = value;
            rating.matches_played += 1;
            if let Some(m) = source {
                rating.last_updated = Some(m.date);
            }
        }
        if let Some(m) = source {
            self.history.entry(team).or_default().push(RatingPoint {
                match_id: m.id.clone(),
                season: m.season,
                date: m.date,
                value,
            });
        }
    }

    /// Current rating, or the initial rating for an unseen team
    pub fn rating(&self, team: TeamId) -> f64 {
        self.current
            .get(&team)
            .map(|r| r.value)
            .unwrap_or(self.config.initial_rating)
    }

    pub fn rating_record(&self, team: TeamId) -> Option<&Rating> {
        self.current.get(&team)
    }

    /// Rating after every processed match keyed at or before
    /// `(season, as_of)`, seen from inside `season` (so a carried-over value
    /// is regressed the same way the engine will regress it at the team's
    /// first match).
    pub fn rating_as_of(&self, team: TeamId, season: Season, as_of: NaiveDate) -> f64 {
        let points = match self.history.get(&team) {
            Some(points) => points,
            None => return self.config.initial_rating,
        };
        let idx = Self::processed_through(points, season, as_of);
        if idx == 0 {
            return self.config.initial_rating;
        }
        let last = &points[idx - 1];
        if last.season < season {
            last.value + (self.config.initial_rating - last.value) * self.config.season_regression
        } else {
            last.value
        }
    }

    /// Rated matches keyed at or before `(season, as_of)`
    pub fn rated_matches_as_of(&self, team: TeamId, season: Season, as_of: NaiveDate) -> u32 {
        self.history
            .get(&team)
            .map(|points| Self::processed_through(points, season, as_of) as u32)
            .unwrap_or(0)
    }

    // History is in processing order, which is (season, date) order, so a
    // late fixture of one season may carry a date past the next opener.
    fn processed_through(points: &[RatingPoint], season: Season, as_of: NaiveDate) -> usize {
        points.partition_point(|p| (p.season, p.date) <= (season, as_of))
    }

    fn rated_matches(&self, team: TeamId) -> usize {
        self.history.get(&team).map(Vec::len).unwrap_or(0)
    }

    pub fn history(&self, team: TeamId) -> &[RatingPoint] {
        self.history.get(&team).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Superseded season-scope records, oldest first
    pub fn archive(&self) -> &[Rating] {
        &self.archive
    }

    /// Current ratings, strongest first
    pub fn standings(&self) -> Vec<&Rating> {
        let mut ratings: Vec<&Rating> = self.current.values().collect();
        ratings.sort_by(|a, b| {
            b.value
                .partial_cmp(&a.value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.team_id.cmp(&b.team_id))
        });
        ratings
    }

    /// Three-way probabilities from a rating gap. Draws take a flat share
    /// and the rest is split by the home side's expected score.
    pub fn win_probability(&self, home_rating: f64, away_rating: f64, draw_rate: f64) -> [f64; 3] {
        let home_expected =
            Self::expected_score(home_rating + self.config.home_advantage, away_rating);
        let draw = draw_rate.clamp(0.0, 1.0);
        let mut probs = [0.0; 3];
        probs[Outcome::Draw.index()] = draw;
        probs[Outcome::HomeWin.index()] = home_expected * (1.0 - draw);
        probs[Outcome::AwayWin.index()] = (1.0 - home_expected) * (1.0 - draw);
        probs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(id: u32) -> TeamId {
        TeamId(id)
    }

    fn settled(id: &str, season: i32, day: u32, home: u32, away: u32, hs: u8, aws: u8) -> Match {
        Match {
            id: id.to_string(),
            season: Season(season),
            date: NaiveDate::from_ymd_opt(season, 8, 1).unwrap() + chrono::Duration::days(day as i64),
            home_team_id: team(home),
            away_team_id: team(away),
            home_score: Some(hs),
            away_score: Some(aws),
            league: "EPL".to_string(),
        }
    }

    fn fixtures() -> Vec<Match> {
        vec![
            settled("m1", 2020, 0, 1, 2, 2, 0),
            settled("m2", 2020, 7, 3, 1, 1, 1),
            settled("m3", 2020, 14, 2, 3, 0, 3),
            settled("m4", 2020, 21, 1, 3, 2, 1),
            settled("m5", 2020, 28, 2, 1, 1, 1),
            settled("m6", 2021, 0, 3, 2, 4, 0),
        ]
    }

    #[test]
    fn test_expected_score_equal_ratings() {
        assert_eq!(RatingEngine::expected_score(1500.0, 1500.0), 0.5);
        assert!(RatingEngine::expected_score(1600.0, 1500.0) > 0.5);
    }

    #[test]
    fn test_draw_scores_half_for_both() {
        assert_eq!(RatingEngine::actual_score(2, 2), 0.5);
        assert_eq!(RatingEngine::actual_score(0, 0), 0.5);

        let mut engine = RatingEngine::default();
        let (a, b) = engine.update(team(1), team(2), 1, 1, 32.0);
        assert_eq!(a, 1500.0);
        assert_eq!(b, 1500.0);
    }

    #[test]
    fn test_update_is_zero_sum() {
        let mut engine = RatingEngine::default();
        let (a, b) = engine.update(team(1), team(2), 3, 0, 32.0);
        assert_eq!(a - 1500.0, -(b - 1500.0));
        assert_eq!(a, 1516.0);

        let change = engine.process_match(&settled("x", 2020, 3, 2, 1, 2, 1)).unwrap();
        assert_eq!(change.home_after, change.home_before + change.delta);
        assert_eq!(change.away_after, change.away_before - change.delta);
    }

    #[test]
    fn test_unknown_team_gets_initial_rating() {
        let engine = RatingEngine::default();
        assert_eq!(engine.rating(team(99)), 1500.0);
        assert_eq!(
            engine.rating_as_of(team(99), Season(2020), NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()),
            1500.0
        );
    }

    #[test]
    fn test_rejects_out_of_order_match() {
        let mut engine = RatingEngine::default();
        engine.process_match(&settled("late", 2020, 10, 1, 2, 1, 0)).unwrap();
        let err = engine
            .process_match(&settled("early", 2020, 3, 1, 2, 1, 0))
            .unwrap_err();
        assert!(err.is_fatal());

        // earlier season with a later calendar date is still out of order
        let mut engine = RatingEngine::default();
        engine.process_match(&settled("s21", 2021, 0, 1, 2, 1, 0)).unwrap();
        let mut stale = settled("s20", 2020, 0, 1, 2, 1, 0);
        stale.date = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        assert!(engine.process_match(&stale).is_err());
    }

    #[test]
    fn test_rejects_unsettled_match() {
        let mut engine = RatingEngine::default();
        let mut fixture = settled("f", 2020, 0, 1, 2, 0, 0);
        fixture.home_score = None;
        assert!(matches!(
            engine.process_match(&fixture),
            Err(ForecastError::UnsettledMatch { .. })
        ));
    }

    #[test]
    fn test_prefix_replay_matches_full_history() {
        let matches = fixtures();
        let mut full = RatingEngine::default();
        let mut after_each = Vec::new();
        for m in &matches {
            full.process_match(m).unwrap();
            after_each.push((full.rating(team(1)), full.rating(team(2)), full.rating(team(3))));
        }

        for k in 1..=matches.len() {
            let mut prefix = RatingEngine::default();
            prefix.process_all(&matches[..k]).unwrap();
            let snapshot = (prefix.rating(team(1)), prefix.rating(team(2)), prefix.rating(team(3)));
            assert_eq!(snapshot, after_each[k - 1], "diverged after match {}", k);

            let as_of = matches[k - 1].date;
            for id in 1..=3 {
                assert_eq!(
                    full.rating_as_of(team(id), matches[k - 1].season, as_of),
                    prefix.rating(team(id))
                );
            }
        }
    }

    #[test]
    fn test_provisional_boost_applies_to_new_teams() {
        let mut engine = RatingEngine::default();
        let first = engine.process_match(&settled("a", 2020, 0, 1, 2, 1, 0)).unwrap();
        assert_eq!(first.k_factor, 32.0 * 1.5);

        let config = RatingConfig {
            provisional_matches: 0,
            ..RatingConfig::default()
        };
        let mut engine = RatingEngine::new(config);
        let first = engine.process_match(&settled("a", 2020, 0, 1, 2, 1, 0)).unwrap();
        assert_eq!(first.k_factor, 32.0);
    }

    #[test]
    fn test_goal_margin_multiplier() {
        assert_eq!(RatingEngine::goal_margin_multiplier(1, 0), 1.0);
        assert_eq!(RatingEngine::goal_margin_multiplier(0, 2), 1.5);
        assert_eq!(RatingEngine::goal_margin_multiplier(5, 0), 2.0);
    }

    #[test]
    fn test_new_season_archives_and_regresses() {
        let config = RatingConfig {
            season_regression: 0.5,
            provisional_matches: 0,
            ..RatingConfig::default()
        };
        let mut engine = RatingEngine::new(config);
        engine.process_match(&settled("a", 2020, 0, 1, 2, 3, 0)).unwrap();
        let end_of_season = engine.rating(team(1));
        assert!(end_of_season > 1500.0);

        let opener = settled("b", 2021, 0, 1, 2, 0, 0);
        let expected_start = end_of_season + (1500.0 - end_of_season) * 0.5;
        assert_eq!(engine.rating_as_of(team(1), Season(2021), opener.date), expected_start);

        engine.process_match(&opener).unwrap();
        assert_eq!(engine.archive().len(), 2);
        assert_eq!(engine.rating_record(team(1)).unwrap().season, Season(2021));
    }

    #[test]
    fn test_win_probability_sums_to_one() {
        let engine = RatingEngine::default();
        let probs = engine.win_probability(1600.0, 1450.0, 0.25);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(probs[Outcome::HomeWin.index()] > probs[Outcome::AwayWin.index()]);
    }

    #[test]
    fn test_as_of_lookups_follow_season_order_across_overlapping_dates() {
        let mut engine = RatingEngine::default();
        let mut late = settled("late-2020", 2020, 0, 1, 2, 2, 0);
        late.date = NaiveDate::from_ymd_opt(2021, 9, 1).unwrap();
        let mut opener = settled("open-2021", 2021, 0, 2, 1, 3, 0);
        opener.date = NaiveDate::from_ymd_opt(2021, 8, 1).unwrap();
        engine.process_match(&late).unwrap();
        engine.process_match(&opener).unwrap();

        let mid_august = NaiveDate::from_ymd_opt(2021, 8, 15).unwrap();
        assert_eq!(engine.rating_as_of(team(1), Season(2021), mid_august), engine.rating(team(1)));
        assert_eq!(engine.rated_matches_as_of(team(1), Season(2021), mid_august), 2);

        // inside 2020 the late fixture has not happened yet on that date
        assert_eq!(engine.rating_as_of(team(1), Season(2020), mid_august), 1500.0);
        assert_eq!(engine.rated_matches_as_of(team(1), Season(2020), mid_august), 0);
    }
}
