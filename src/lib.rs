pub mod attribution;
pub mod db;
pub mod desk;
pub mod errors;
pub mod keywords;
pub mod lifecycle;
pub mod masking;
pub mod metrics;
pub mod models;
pub mod ranking;

pub use crate::desk::{Clock, LeadDesk, ScoreOutcome};
pub use crate::errors::{DeskError, DeskResult};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// JSON logs to a daily-rolling file under `log_dir`. `RUST_LOG` wins over
/// `default_filter` when set.
pub fn init_tracing(log_dir: &Path, default_filter: &str) -> DeskResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "lead-desk.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| DeskError::Internal(error.to_string()))
}

/// Refreshes every agent's daily state on a fixed interval. The store is
/// synchronous, so each pass runs on the blocking pool.
pub fn spawn_maintenance(desk: Arc<LeadDesk>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let desk = desk.clone();
            match tokio::task::spawn_blocking(move || desk.refresh_all_daily_states()).await {
                Ok(Ok(count)) => tracing::debug!(agents = count, "daily state maintenance finished"),
                Ok(Err(error)) => tracing::warn!(error = %error, "daily state maintenance failed"),
                Err(error) => tracing::error!(error = %error, "daily state maintenance task aborted"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{spawn_maintenance, LeadDesk};
    use crate::models::AgentRole;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn maintenance_loop_writes_daily_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = LeadDesk::open(&dir.path().join("desk.db")).expect("desk");
        desk.register_agent("agent-1", "agency-1", AgentRole::Agent, 0).expect("agent");

        let handle = spawn_maintenance(desk.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        let rows = desk.database().list_agent_daily_states("agent-1", 5).expect("query");
        assert!(!rows.is_empty());
        assert!(rows[0].updated_at <= Utc::now());
    }
}
