//! Operator CLI for the lead desk store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lead_desk::metrics::{MetricsFilters, MetricsWindow};
use lead_desk::{init_tracing, spawn_maintenance, LeadDesk};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DB_ENV: &str = "LEAD_DESK_DB";
const LOG_DIR_ENV: &str = "LEAD_DESK_LOG_DIR";

#[derive(Parser, Debug)]
#[command(name = "lead-desk", version, about, long_about = None)]
struct Cli {
    /// SQLite file holding leads, loads, calls and keywords.
    #[arg(long)]
    db: Option<PathBuf>,
    /// YAML document merged into the stored settings before the command runs.
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long)]
    log_dir: Option<PathBuf>,
    #[arg(long, default_value = "info")]
    log_filter: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ranked work queue for one agent.
    Queue {
        #[arg(long)]
        agent: String,
    },
    /// KPIs, activity series and data-quality warnings for a trailing window.
    Metrics {
        #[arg(long)]
        agency: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Match and booking counts per keyword.
    KeywordStats {
        #[arg(long)]
        agency: String,
    },
    /// Recompute today's rollup for one agent, or all of them.
    RefreshDaily {
        #[arg(long)]
        agent: Option<String>,
    },
    /// Run the daily-state maintenance loop until interrupted.
    Maintain,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let db_path = cli
        .db
        .clone()
        .or_else(|| std::env::var_os(DB_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("lead-desk.sqlite"));
    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| std::env::var_os(LOG_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("logs"));
    init_tracing(&log_dir, &cli.log_filter).context("failed to initialise logging")?;

    let desk = LeadDesk::open(&db_path).with_context(|| format!("failed to open {}", db_path.display()))?;
    if let Some(path) = cli.settings.as_ref() {
        let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let update: serde_json::Value = serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid settings file {}", path.display()))?;
        desk.update_settings(update)?;
    }

    match cli.command {
        Commands::Queue { agent } => print_json(&desk.rank_queue(&agent)?),
        Commands::Metrics { agency, agent, hours } => {
            let window = MetricsWindow::trailing_hours(chrono::Utc::now(), hours)?;
            let filters = MetricsFilters {
                agency_id: agency,
                agent_id: agent,
            };
            print_json(&desk.aggregate_metrics(window, &filters)?)
        }
        Commands::KeywordStats { agency } => print_json(&desk.keyword_stats(&agency)?),
        Commands::RefreshDaily { agent: Some(agent) } => print_json(&desk.refresh_agent_daily_state(&agent)?),
        Commands::RefreshDaily { agent: None } => {
            let refreshed = desk.refresh_all_daily_states()?;
            print_json(&serde_json::json!({ "refreshed": refreshed }))
        }
        Commands::Maintain => maintain(desk).await,
    }
}

async fn maintain(desk: Arc<LeadDesk>) -> Result<()> {
    let every = Duration::from_secs(desk.settings()?.maintenance_interval_secs);
    tracing::info!(interval_secs = every.as_secs(), "maintenance loop started");
    let handle = spawn_maintenance(desk, every);
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    handle.abort();
    tracing::info!("maintenance loop stopped");
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
