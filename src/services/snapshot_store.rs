use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::config::{ForecastConfig, SnapshotConfig};
use crate::error::{ForecastError, Result};
use crate::models::{FeatureSnapshot, Match, Season, TeamId, TeamMatchStats};
use crate::services::elo_calculator::RatingEngine;

type SnapshotKey = (TeamId, Season, NaiveDate);

/// Owner of the settled match history, the rating engine that consumes it,
/// and a cache of per (team, season, as-of) snapshots.
///
/// The store is the single writer of rating state: matches only enter
/// through [`ingest`](FeatureSnapshotStore::ingest), in order.
pub struct FeatureSnapshotStore {
    config: SnapshotConfig,
    engine: RatingEngine,
    matches: Vec<Match>,
    /// Indices into `matches`, per team and season, in chronological order
    by_team_season: HashMap<(TeamId, Season), Vec<usize>>,
    by_id: HashMap<String, usize>,
    stats: HashMap<(String, TeamId), TeamMatchStats>,
    horizon: Option<NaiveDate>,
    cache: RwLock<HashMap<SnapshotKey, FeatureSnapshot>>,
}

impl FeatureSnapshotStore {
    pub fn new(config: &ForecastConfig) -> Self {
        Self {
            config: config.snapshot.clone(),
            engine: RatingEngine::new(config.rating.clone()),
            matches: Vec::new(),
            by_team_season: HashMap::new(),
            by_id: HashMap::new(),
            stats: HashMap::new(),
            horizon: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Build a store from an ordered match stream and its raw statistics.
    /// Unsettled fixtures in the stream are ignored.
    pub fn from_history(
        config: &ForecastConfig,
        matches: &[Match],
        stats: impl IntoIterator<Item = TeamMatchStats>,
    ) -> Result<Self> {
        let mut store = Self::new(config);
        store.add_stats(stats);
        for match_data in matches.iter().filter(|m| m.is_settled()) {
            store.ingest(match_data.clone())?;
        }
        tracing::info!(
            "Snapshot store loaded {} settled matches across {} team-seasons",
            store.matches.len(),
            store.by_team_season.len()
        );
        Ok(store)
    }

    /// Attach raw statistics. Cached snapshots that already cover the
    /// row's match are dropped so they pick the row up on the next read.
    pub fn add_stats(&mut self, stats: impl IntoIterator<Item = TeamMatchStats>) {
        let mut stale: Vec<(TeamId, Season, NaiveDate)> = Vec::new();
        for row in stats {
            if let Some(m) = self.by_id.get(&row.match_id).map(|&i| &self.matches[i]) {
                stale.push((row.team_id, m.season, m.date));
            }
            self.stats.insert((row.match_id.clone(), row.team_id), row);
        }
        if stale.is_empty() {
            return;
        }

        let mut cache = match self.cache.write() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.retain(|(team, season, as_of), _| {
            !stale
                .iter()
                .any(|(t, s, date)| t == team && s == season && as_of >= date)
        });
    }

    /// Append a settled match. Rejects unsettled and out-of-order matches.
    pub fn ingest(&mut self, match_data: Match) -> Result<()> {
        self.engine.process_match(&match_data)?;

        let idx = self.matches.len();
        for team in [match_data.home_team_id, match_data.away_team_id] {
            self.by_team_season
                .entry((team, match_data.season))
                .or_default()
                .push(idx);
        }
        self.invalidate(&match_data);
        self.by_id.insert(match_data.id.clone(), idx);
        self.horizon = Some(self.horizon.map_or(match_data.date, |h| h.max(match_data.date)));
        self.matches.push(match_data);
        Ok(())
    }

    fn invalidate(&self, match_data: &Match) {
        let mut cache = match self.cache.write() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.retain(|(team, _, as_of), _| {
            !(match_data.involves(*team) && *as_of >= match_data.date)
        });
    }

    /// Latest date for which results have been observed
    pub fn horizon(&self) -> Option<NaiveDate> {
        self.horizon
    }

    pub fn engine(&self) -> &RatingEngine {
        &self.engine
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn seasons(&self) -> Vec<Season> {
        let mut seasons: Vec<Season> = self.matches.iter().map(|m| m.season).collect();
        seasons.sort();
        seasons.dedup();
        seasons
    }

    /// Snapshot of `team` in `season` using results dated on or before
    /// `as_of`. Thin or missing history yields the baseline snapshot with the
    /// real `sample_size`; asking past the observed horizon is an error.
    pub fn get_snapshot(&self, team: TeamId, season: Season, as_of: NaiveDate) -> Result<FeatureSnapshot> {
        self.check_horizon(as_of)?;

        let key = (team, season, as_of);
        if let Some(hit) = self.read_cache(&key) {
            return Ok(hit);
        }
        let snapshot = self.compute(team, season, as_of);
        self.write_cache(key, snapshot.clone());
        Ok(snapshot)
    }

    /// Fill the cache for many keys at once. Each key only reads immutable
    /// history, so the work is spread over the rayon pool.
    pub fn precompute(&self, requests: &[(TeamId, Season, NaiveDate)]) -> Result<usize> {
        for (_, _, as_of) in requests {
            self.check_horizon(*as_of)?;
        }
        let pending: Vec<SnapshotKey> = requests
            .iter()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|key| self.read_cache(key).is_none())
            .collect();

        let computed: Vec<(SnapshotKey, FeatureSnapshot)> = pending
            .par_iter()
            .map(|&(team, season, as_of)| ((team, season, as_of), self.compute(team, season, as_of)))
            .collect();

        let count = computed.len();
        let mut cache = match self.cache.write() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.extend(computed);
        tracing::debug!("Precomputed {} snapshots", count);
        Ok(count)
    }

    fn check_horizon(&self, as_of: NaiveDate) -> Result<()> {
        match self.horizon {
            Some(horizon) if as_of > horizon => Err(ForecastError::OrderingViolation(format!(
                "snapshot requested as of {} but results are only known through {}",
                as_of, horizon
            ))),
            _ => Ok(()),
        }
    }

    fn read_cache(&self, key: &SnapshotKey) -> Option<FeatureSnapshot> {
        let cache = match self.cache.read() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.get(key).cloned()
    }

    fn write_cache(&self, key: SnapshotKey, snapshot: FeatureSnapshot) {
        let mut cache = match self.cache.write() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.insert(key, snapshot);
    }

    fn compute(&self, team: TeamId, season: Season, as_of: NaiveDate) -> FeatureSnapshot {
        let played: Vec<&Match> = self
            .by_team_season
            .get(&(team, season))
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| &self.matches[i])
                    .take_while(|m| m.date <= as_of)
                    .collect()
            })
            .unwrap_or_default();

        let defaults = &self.config.defaults;
        let mut snapshot = FeatureSnapshot {
            team_id: team,
            season,
            as_of,
            rating: self.engine.rating_as_of(team, season, as_of),
            rated_matches: self.engine.rated_matches_as_of(team, season, as_of),
            form: defaults.points_per_game * self.config.form_window as f64,
            form_window: self.config.form_window,
            points_per_game: defaults.points_per_game,
            goals_for_per_game: defaults.goals_for_per_game,
            goals_against_per_game: defaults.goals_against_per_game,
            shots_per_game: defaults.shots_per_game,
            shots_on_target_per_game: defaults.shots_on_target_per_game,
            possession: defaults.possession,
            corners_per_game: defaults.corners_per_game,
            discipline_index: defaults.discipline_index,
            sample_size: played.len(),
            stats_sample_size: 0,
        };

        if played.len() < self.config.min_matches {
            return snapshot;
        }

        let games = played.len() as f64;
        let mut points = 0.0;
        let mut goals_for = 0.0;
        let mut goals_against = 0.0;
        for m in &played {
            if let (Some(p), Some((scored, conceded))) = (m.points_for(team), m.goals_for(team)) {
                points += p as f64;
                goals_for += scored as f64;
                goals_against += conceded as f64;
            }
        }
        snapshot.points_per_game = points / games;
        snapshot.goals_for_per_game = goals_for / games;
        snapshot.goals_against_per_game = goals_against / games;
        snapshot.form = played
            .iter()
            .rev()
            .take(self.config.form_window)
            .filter_map(|m| m.points_for(team))
            .map(|p| p as f64)
            .sum();

        let rows: Vec<&TeamMatchStats> = played
            .iter()
            .filter_map(|m| self.stats.get(&(m.id.clone(), team)))
            .collect();
        snapshot.stats_sample_size = rows.len();
        if let Some(v) = mean_of(&rows, |r| r.shots.map(f64::from)) {
            snapshot.shots_per_game = v;
        }
        if let Some(v) = mean_of(&rows, |r| r.shots_on_target.map(f64::from)) {
            snapshot.shots_on_target_per_game = v;
        }
        if let Some(v) = mean_of(&rows, |r| r.possession) {
            snapshot.possession = v;
        }
        if let Some(v) = mean_of(&rows, |r| r.corners.map(f64::from)) {
            snapshot.corners_per_game = v;
        }
        if let Some(v) = mean_of(&rows, discipline_points) {
            snapshot.discipline_index = v;
        }

        snapshot
    }
}

/// Card-weighted discipline score for one match; None when nothing about
/// cards or fouls was recorded.
fn discipline_points(row: &TeamMatchStats) -> Option<f64> {
    if row.yellow_cards.is_none() && row.red_cards.is_none() && row.fouls.is_none() {
        return None;
    }
    let yellow = row.yellow_cards.unwrap_or(0) as f64;
    let red = row.red_cards.unwrap_or(0) as f64;
    let fouls = row.fouls.unwrap_or(0) as f64;
    Some(yellow + 3.0 * red + 0.1 * fouls)
}

fn mean_of<F>(rows: &[&TeamMatchStats], field: F) -> Option<f64>
where
    F: Fn(&TeamMatchStats) -> Option<f64>,
{
    let values: Vec<f64> = rows.iter().filter_map(|r| field(*r)).filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
