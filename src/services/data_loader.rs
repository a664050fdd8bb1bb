use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use strsim::jaro_winkler;

use crate::error::{ForecastError, Result};
use crate::models::{Match, Season, Team, TeamId, TeamMatchStats};

pub const MATCHES_FILE: &str = "matches.csv";
pub const STATS_FILE: &str = "stats.csv";

/// Minimum Jaro-Winkler similarity for a fuzzy name match
const FUZZY_THRESHOLD: f64 = 0.88;

// ── CSV rows ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct MatchRecord {
    match_id: String,
    season: i32,
    date: NaiveDate,
    league: String,
    home_team: String,
    away_team: String,
    home_score: Option<u8>,
    away_score: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatsRecord {
    match_id: String,
    team: String,
    shots: Option<u32>,
    shots_on_target: Option<u32>,
    possession: Option<f64>,
    corners: Option<u32>,
    fouls: Option<u32>,
    yellow_cards: Option<u32>,
    red_cards: Option<u32>,
}

/// Team names to ids. Ids are handed out in order of first appearance.
#[derive(Debug, Clone, Default)]
pub struct TeamRegistry {
    teams: Vec<Team>,
    by_name: HashMap<String, TeamId>,
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl TeamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(&mut self, name: &str, league: &str) -> TeamId {
        let key = normalize_name(name);
        if let Some(id) = self.by_name.get(&key) {
            return *id;
        }
        let id = TeamId(self.teams.len() as u32 + 1);
        self.teams.push(Team {
            id,
            name: name.trim().to_string(),
            league: league.to_string(),
        });
        self.by_name.insert(key, id);
        id
    }

    /// Exact lookup, ignoring case and extra whitespace.
    pub fn lookup(&self, name: &str) -> Result<TeamId> {
        self.by_name
            .get(&normalize_name(name))
            .copied()
            .ok_or_else(|| ForecastError::UnknownTeam(name.to_string()))
    }

    /// Exact lookup, then the closest fuzzy match above the similarity
    /// threshold. Meant for user queries, not data files.
    pub fn resolve(&self, query: &str) -> Result<TeamId> {
        if let Ok(id) = self.lookup(query) {
            return Ok(id);
        }
        let key = normalize_name(query);

        let best = self
            .by_name
            .iter()
            .map(|(name, id)| (jaro_winkler(&key, name), *id))
            .filter(|(score, _)| *score >= FUZZY_THRESHOLD)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((score, id)) => {
                tracing::debug!("Resolved '{}' to {} (similarity {:.2})", query, self.name(id).unwrap_or("?"), score);
                Ok(id)
            }
            None => Err(ForecastError::UnknownTeam(query.to_string())),
        }
    }

    pub fn name(&self, id: TeamId) -> Option<&str> {
        self.team(id).map(|t| t.name.as_str())
    }

    pub fn team(&self, id: TeamId) -> Option<&Team> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|idx| self.teams.get(idx))
            .filter(|t| t.id == id)
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }
}

/// Everything read from a data directory, matches in chronological order.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub registry: TeamRegistry,
    pub matches: Vec<Match>,
    pub stats: Vec<TeamMatchStats>,
}

impl Dataset {
    pub fn settled(&self) -> Vec<Match> {
        self.matches.iter().filter(|m| m.is_settled()).cloned().collect()
    }

    pub fn upcoming(&self) -> Vec<Match> {
        self.matches.iter().filter(|m| !m.is_settled()).cloned().collect()
    }
}

pub struct DataLoader;

impl DataLoader {
    /// Read `matches.csv` and, if present, `stats.csv` from `dir`.
    pub fn load_dir(dir: &Path) -> Result<Dataset> {
        let mut registry = TeamRegistry::new();
        let matches = Self::load_matches(&dir.join(MATCHES_FILE), &mut registry)?;

        let stats_path = dir.join(STATS_FILE);
        let stats = if stats_path.exists() {
            Self::load_stats(&stats_path, &registry)?
        } else {
            tracing::warn!("No {} in {}, using baseline statistics", STATS_FILE, dir.display());
            Vec::new()
        };

        tracing::info!(
            "Loaded {} matches, {} stat rows and {} teams from {}",
            matches.len(),
            stats.len(),
            registry.len(),
            dir.display()
        );
        Ok(Dataset {
            registry,
            matches,
            stats,
        })
    }

    /// Matches are returned sorted by (season, date); file order breaks ties.
    pub fn load_matches(path: &Path, registry: &mut TeamRegistry) -> Result<Vec<Match>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut matches = Vec::new();
        for record in reader.deserialize() {
            let record: MatchRecord = record?;
            let home_team_id = registry.get_or_insert(&record.home_team, &record.league);
            let away_team_id = registry.get_or_insert(&record.away_team, &record.league);
            matches.push(Match {
                id: record.match_id,
                season: Season(record.season),
                date: record.date,
                home_team_id,
                away_team_id,
                home_score: record.home_score,
                away_score: record.away_score,
                league: record.league,
            });
        }
        matches.sort_by_key(Match::order_key);
        Ok(matches)
    }

    /// Rows naming a team not already in the registry (exact name) are
    /// skipped.
    pub fn load_stats(path: &Path, registry: &TeamRegistry) -> Result<Vec<TeamMatchStats>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut stats = Vec::new();
        for record in reader.deserialize() {
            let record: StatsRecord = record?;
            let team_id = match registry.lookup(&record.team) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Skipping stats for match {}: {}", record.match_id, e);
                    continue;
                }
            };
            stats.push(TeamMatchStats {
                match_id: record.match_id,
                team_id,
                shots: record.shots,
                shots_on_target: record.shots_on_target,
                possession: record.possession,
                corners: record.corners,
                fouls: record.fouls,
                yellow_cards: record.yellow_cards,
                red_cards: record.red_cards,
            });
        }
        Ok(stats)
    }

    pub fn write_matches(path: &Path, matches: &[Match], registry: &TeamRegistry) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for m in matches {
            writer.serialize(MatchRecord {
                match_id: m.id.clone(),
                season: m.season.0,
                date: m.date,
                league: m.league.clone(),
                home_team: team_name(registry, m.home_team_id)?,
                away_team: team_name(registry, m.away_team_id)?,
                home_score: m.home_score,
                away_score: m.away_score,
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_stats(path: &Path, stats: &[TeamMatchStats], registry: &TeamRegistry) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for s in stats {
            writer.serialize(StatsRecord {
                match_id: s.match_id.clone(),
                team: team_name(registry, s.team_id)?,
                shots: s.shots,
                shots_on_target: s.shots_on_target,
                possession: s.possession,
                corners: s.corners,
                fouls: s.fouls,
                yellow_cards: s.yellow_cards,
                red_cards: s.red_cards,
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_dir(dir: &Path, dataset: &Dataset) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        Self::write_matches(&dir.join(MATCHES_FILE), &dataset.matches, &dataset.registry)?;
        Self::write_stats(&dir.join(STATS_FILE), &dataset.stats, &dataset.registry)?;
        Ok(())
    }
}

fn team_name(registry: &TeamRegistry, id: TeamId) -> Result<String> {
    registry
        .name(id)
        .map(str::to_string)
        .ok_or_else(|| ForecastError::UnknownTeam(id.to_string()))
}
