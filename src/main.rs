mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use oddsforge::services::SimulationConfig;

#[derive(Parser)]
#[command(name = "oddsforge")]
#[command(about = "Football match outcome forecasting with walk-forward evaluation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back-test the ensemble season by season
    Evaluate {
        /// Directory holding matches.csv and stats.csv
        #[arg(short, long, default_value = "data")]
        data: PathBuf,
        /// Seasons to score by starting year (all but the first when omitted)
        #[arg(short, long)]
        season: Vec<i32>,
        /// Turn off the draw-correction stage
        #[arg(long)]
        no_draw_correction: bool,
        #[arg(long)]
        json: bool,
    },
    /// Predict the unplayed fixtures in the data directory
    Predict {
        #[arg(short, long, default_value = "data")]
        data: PathBuf,
        #[arg(short, long, default_value = "10")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show current ratings, or one team's rating history
    Ratings {
        #[arg(short, long, default_value = "data")]
        data: PathBuf,
        #[arg(short, long)]
        team: Option<String>,
        #[arg(long, default_value = "20")]
        top: usize,
    },
    /// Write a seeded synthetic league as CSV
    Simulate {
        #[arg(short, long, default_value = "data")]
        out: PathBuf,
        #[arg(long, default_value = "12")]
        teams: usize,
        #[arg(long, default_value = "4")]
        seasons: usize,
        #[arg(long, default_value = "2020")]
        first_season: i32,
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate {
            data,
            season,
            no_draw_correction,
            json,
        } => {
            tracing::info!("Evaluating {}", data.display());
            cli::evaluate(&data, &season, !no_draw_correction, json)?;
        }
        Commands::Predict { data, limit, json } => {
            tracing::info!("Generating predictions...");
            cli::predict_upcoming(&data, limit, json)?;
        }
        Commands::Ratings { data, team, top } => {
            cli::show_ratings(&data, team.as_deref(), top)?;
        }
        Commands::Simulate {
            out,
            teams,
            seasons,
            first_season,
            seed,
        } => {
            let config = SimulationConfig {
                teams,
                seasons,
                first_season,
                seed,
                ..SimulationConfig::default()
            };
            cli::simulate(&out, config)?;
        }
    }

    Ok(())
}
