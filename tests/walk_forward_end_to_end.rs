use chrono::{Duration, NaiveDate};
use tempfile::tempdir;

use oddsforge::models::{Match, Outcome, PredictionOutcome, Season, TeamId};
use oddsforge::services::{DataLoader, LeagueSimulator, SimulationConfig};
use oddsforge::{ForecastConfig, Forecaster};

const A: TeamId = TeamId(1);
const B: TeamId = TeamId(2);

/// Team A beats team B 2-0 every time, home and away alternating.
fn dominant_pair(seasons: &[i32], per_season: usize) -> Vec<Match> {
    let mut matches = Vec::new();
    for season in seasons {
        let start = NaiveDate::from_ymd_opt(*season, 8, 1).unwrap();
        for i in 0..per_season {
            let a_home = i % 2 == 0;
            matches.push(Match {
                id: format!("{}-{:02}", season, i),
                season: Season(*season),
                date: start + Duration::days(7 * i as i64),
                home_team_id: if a_home { A } else { B },
                away_team_id: if a_home { B } else { A },
                home_score: Some(if a_home { 2 } else { 0 }),
                away_score: Some(if a_home { 0 } else { 2 }),
                league: "Two Horse League".to_string(),
            });
        }
    }
    matches
}

#[test]
fn dominant_team_is_rated_higher_after_first_season() {
    let matches = dominant_pair(&[2020, 2021, 2022], 14);
    let forecaster = Forecaster::from_history(ForecastConfig::default(), &matches, Vec::new()).unwrap();
    let engine = forecaster.store().engine();

    let end_of_first = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
    let a = engine.rating_as_of(A, Season(2020), end_of_first);
    let b = engine.rating_as_of(B, Season(2020), end_of_first);
    assert!(a > b, "A {:.1} should be above B {:.1}", a, b);
    assert!((a + b - 3000.0).abs() < 1e-6, "ratings should stay zero-sum");
}

#[test]
fn second_season_is_predicted_perfectly_from_the_first() {
    let matches = dominant_pair(&[2020, 2021, 2022], 14);
    let forecaster = Forecaster::from_history(ForecastConfig::default(), &matches, Vec::new()).unwrap();

    let report = forecaster.evaluate(&[Season(2021), Season(2022)]).unwrap();
    assert!(report.skipped.is_empty(), "unexpected skips: {:?}", report.skipped);

    let second = report.season(Season(2021)).unwrap();
    assert_eq!(second.train_seasons, vec![Season(2020)]);
    assert_eq!(second.test_matches, 14);
    assert_eq!(second.accuracy, 1.0);
    assert_eq!(second.per_class[&Outcome::Draw].predicted, 0);

    let third = report.season(Season(2022)).unwrap();
    assert_eq!(third.train_seasons, vec![Season(2020), Season(2021)]);
    assert_eq!(third.accuracy, 1.0);

    assert_eq!(report.mean_accuracy, Some(1.0));
    assert_eq!(report.accuracy_by_season().len(), 2);
}

#[test]
fn simulated_league_round_trips_through_csv_and_evaluates() {
    let dataset = LeagueSimulator::new(SimulationConfig {
        teams: 8,
        seasons: 3,
        seed: 2024,
        ..SimulationConfig::default()
    })
    .unwrap()
    .run();

    let dir = tempdir().unwrap();
    DataLoader::write_dir(dir.path(), &dataset).unwrap();
    let loaded = DataLoader::load_dir(dir.path()).unwrap();
    assert_eq!(loaded.matches.len(), dataset.matches.len());
    assert_eq!(loaded.stats.len(), dataset.stats.len());

    let mut forecaster = Forecaster::from_history(ForecastConfig::default(), &loaded.matches, loaded.stats).unwrap();
    let report = forecaster.evaluate(&[]).unwrap();
    assert_eq!(report.seasons.len() + report.skipped.len(), 2);
    for season in &report.seasons {
        assert!((0.0..=1.0).contains(&season.accuracy));
        assert!(season.brier_score >= 0.0 && season.brier_score <= 2.0);
        let weight_total: f64 = season.model_weights.values().sum();
        assert!((weight_total - 1.0).abs() < 1e-9);
    }

    forecaster.train().unwrap();
    let fixture = Match {
        id: "future".to_string(),
        season: Season(2022),
        date: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
        home_team_id: TeamId(1),
        away_team_id: TeamId(2),
        home_score: None,
        away_score: None,
        league: "Synthetic League".to_string(),
    };
    match forecaster.predict(&fixture).unwrap() {
        PredictionOutcome::Predicted(result) => {
            let total: f64 = result.probabilities.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
            assert_eq!(result.match_id, "future");
        }
        other => panic!("expected a prediction, got {:?}", other),
    }
}
