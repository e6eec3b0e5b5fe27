//! sprint-analytics CLI: one batch run per invocation.

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sprint_analytics::config::AnalyticsConfig;
use sprint_analytics::db::Database;
use sprint_analytics::ingest::TrackerActivity;
use sprint_analytics::pipeline::Pipeline;
use sprint_analytics::report::{forecast_table, task_table, SprintReport};
use sprint_analytics::tracker::{TrackerClient, TrelloClient};

#[derive(Parser)]
#[command(name = "sprint-analytics", version, about = "Sprint workload forecasting and backlog scoring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast daily workload and store the at-risk days.
    Forecast {
        /// Number of days to forecast.
        #[arg(long, default_value = "7")]
        days: usize,
    },

    /// Score the tracker backlog and store the priorities.
    Prioritize,

    /// Print the highest-priority stored tasks.
    Top {
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Print a markdown sprint report from tracker data and the stored forecast.
    Report,

    /// Open the database and apply pending schema migrations.
    Migrate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AnalyticsConfig::from_env()?;
    if let Err(error) = sprint_analytics::init_tracing(&config.log_dir) {
        eprintln!("logging disabled: {}", error);
    }

    let db = Database::new(&config.database_path)?;
    let client = TrelloClient::new(config.tracker.clone());

    match cli.command {
        Commands::Forecast { days } => {
            let pipeline = Pipeline::new(config, TrackerActivity::new(&client), db);
            let outcome = pipeline.run_forecast(days)?;
            if let Some(reason) = outcome.reason() {
                eprintln!("note: {}", reason);
            }
            print!("{}", forecast_table(outcome.data()));
        }
        Commands::Prioritize => {
            let pipeline = Pipeline::new(config, TrackerActivity::new(&client), db);
            let outcome = pipeline.score_backlog(&client)?;
            if let Some(reason) = outcome.reason() {
                eprintln!("note: {}", reason);
            }
            println!("scored {} tasks", outcome.data().len());
        }
        Commands::Top { limit } => {
            print!("{}", task_table(&db.top_priority_tasks(limit)));
        }
        Commands::Report => {
            let records = client
                .fetch_records()
                .map_err(|error| anyhow!("no task data available: {}", error))?;
            let report = SprintReport::build(&records, db.load_forecast(), Utc::now().date_naive());
            print!("{}", report.to_markdown());
        }
        Commands::Migrate => {
            for version in db.schema_versions() {
                println!("v{} applied {}", version.version, version.applied_at.to_rfc3339());
            }
        }
    }
    Ok(())
}

