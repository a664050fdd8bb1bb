use anyhow::{anyhow, Result};
use std::path::Path;

use oddsforge::models::{Outcome, PredictionOutcome, Season, TeamId};
use oddsforge::services::{DataLoader, Dataset, Forecaster, LeagueSimulator, SimulationConfig, TeamRegistry};
use oddsforge::ForecastConfig;

fn load(data: &Path) -> Result<(ForecastConfig, Dataset)> {
    let config = ForecastConfig::from_env()?;
    let dataset = DataLoader::load_dir(data)
        .map_err(|e| anyhow!("could not load {}: {}. Try `oddsforge simulate --out {}` first", data.display(), e, data.display()))?;
    Ok((config, dataset))
}

fn team_label(registry: &TeamRegistry, id: TeamId) -> String {
    registry.name(id).map(str::to_string).unwrap_or_else(|| id.to_string())
}

pub fn evaluate(data: &Path, seasons: &[i32], draw_correction: bool, json: bool) -> Result<()> {
    let (mut config, dataset) = load(data)?;
    config.draw_correction.enabled = draw_correction;

    println!("📊 Walk-forward evaluation over {} matches...", dataset.matches.len());
    let forecaster = Forecaster::from_history(config, &dataset.matches, dataset.stats)?;
    let seasons: Vec<Season> = seasons.iter().map(|s| Season(*s)).collect();
    let report = forecaster.evaluate(&seasons)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for season in &report.seasons {
        println!(
            "\n📅 {} (trained on {} matches from {} seasons)",
            season.season,
            season.train_matches,
            season.train_seasons.len()
        );
        println!(
            "   Accuracy: {:.1}% ({}/{}) | Brier: {:.3} | Draw corrections: {}",
            season.accuracy * 100.0,
            season.correct,
            season.test_matches,
            season.brier_score,
            season.draw_corrections
        );
        for outcome in Outcome::ALL {
            if let Some(class) = season.per_class.get(&outcome) {
                println!(
                    "   {:>5}: actual {:>3} | predicted {:>3} | precision {:.1}% | recall {:.1}%",
                    outcome.to_string(),
                    class.actual,
                    class.predicted,
                    class.precision() * 100.0,
                    class.recall() * 100.0
                );
            }
        }
        let weights: Vec<String> = season
            .model_weights
            .iter()
            .map(|(name, w)| format!("{} {:.2}", name, w))
            .collect();
        println!("   Weights: {}", weights.join(", "));
        if !season.dropped_models.is_empty() {
            println!("   ⚠️  Dropped: {}", season.dropped_models.join(", "));
        }
    }

    for skipped in &report.skipped {
        println!("\n⏭️  {} skipped: {}", skipped.season, skipped.reason);
    }

    match (report.mean_accuracy, report.accuracy_std_dev) {
        (Some(mean), Some(std_dev)) => {
            println!("\n✅ Mean accuracy {:.1}% ± {:.1}%", mean * 100.0, std_dev * 100.0)
        }
        _ => println!("\n❌ No season could be scored"),
    }
    Ok(())
}

pub fn predict_upcoming(data: &Path, limit: usize, json: bool) -> Result<()> {
    let (config, dataset) = load(data)?;
    let upcoming = dataset.upcoming();

    if upcoming.is_empty() {
        println!("📭 No upcoming matches found in {}", data.display());
        return Ok(());
    }

    println!("🔮 Generating predictions for upcoming matches...");
    let mut forecaster = Forecaster::from_history(config, &dataset.matches, dataset.stats.clone())?;
    forecaster.train()?;
    let predictions = forecaster.predict_many(&upcoming)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&predictions)?);
        return Ok(());
    }

    println!("✅ Generated predictions for {} matches!", predictions.len());
    println!("\n🎯 Predictions:");
    for (i, (fixture, prediction)) in upcoming.iter().zip(&predictions).take(limit).enumerate() {
        println!(
            "{}. {} vs {} ({}):",
            i + 1,
            team_label(&dataset.registry, fixture.home_team_id),
            team_label(&dataset.registry, fixture.away_team_id),
            fixture.date.format("%Y-%m-%d")
        );
        match prediction {
            PredictionOutcome::Predicted(result) => {
                println!(
                    "   Home win: {:.1}% | Draw: {:.1}% | Away win: {:.1}%",
                    result.probability(Outcome::HomeWin) * 100.0,
                    result.probability(Outcome::Draw) * 100.0,
                    result.probability(Outcome::AwayWin) * 100.0
                );
                println!(
                    "   Pick: {}{} | Confidence: {:.1}%\n",
                    result.predicted,
                    if result.draw_corrected { " (draw corrected)" } else { "" },
                    result.confidence * 100.0
                );
            }
            PredictionOutcome::InsufficientData { reason, .. } => {
                println!("   ❔ Insufficient data: {}\n", reason);
            }
        }
    }
    Ok(())
}

pub fn show_ratings(data: &Path, team: Option<&str>, top: usize) -> Result<()> {
    let (config, dataset) = load(data)?;
    let forecaster = Forecaster::from_history(config, &dataset.matches, Vec::new())?;
    let engine = forecaster.store().engine();

    match team {
        Some(query) => {
            println!("🔍 Searching for team: {}", query);
            let id = match dataset.registry.resolve(query) {
                Ok(id) => id,
                Err(_) => {
                    println!("❌ No team found matching '{}'", query);
                    println!("\n💡 Available teams:");
                    for team in dataset.registry.teams().iter().take(10) {
                        println!("   • {} ({})", team.name, team.league);
                    }
                    return Ok(());
                }
            };

            println!("🏆 {}: {:.1}", team_label(&dataset.registry, id), engine.rating(id));
            let history = engine.history(id);
            println!("\n📈 Last {} rated matches:", history.len().min(top));
            for point in history.iter().rev().take(top) {
                println!("   {} {} {:.1} ({})", point.date, point.season, point.value, point.match_id);
            }
        }
        None => {
            println!("🏆 Current ratings:\n");
            for (i, rating) in engine.standings().iter().take(top).enumerate() {
                println!(
                    "{:>3}. {:<28} {:>7.1}  ({} matches in {})",
                    i + 1,
                    team_label(&dataset.registry, rating.team_id),
                    rating.value,
                    rating.matches_played,
                    rating.season
                );
            }
        }
    }
    Ok(())
}

pub fn simulate(out: &Path, config: SimulationConfig) -> Result<()> {
    println!(
        "🎲 Simulating {} seasons for {} teams (seed {})...",
        config.seasons, config.teams, config.seed
    );
    let dataset = LeagueSimulator::new(config)?.run();
    DataLoader::write_dir(out, &dataset)?;
    println!(
        "✅ Wrote {} matches and {} stat rows to {}",
        dataset.matches.len(),
        dataset.stats.len(),
        out.display()
    );
    Ok(())
}
