use std::sync::Arc;

use message_inconsistencies::application::tasks::SolveMessageInconsistenciesTask;
use message_inconsistencies::bootstrap;
use message_inconsistencies::config::Config;
use message_inconsistencies::domain::entities::TaskStatus;
use message_inconsistencies::infrastructure::observability;
use message_inconsistencies::infrastructure::persistence::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    observability::init(&config).map_err(|e| anyhow::anyhow!("{}", e))?;
    tracing::info!("Configuration loaded");

    let db = Database::connect(&config.database_url).await?;

    db.run_migrations().await?;
    tracing::info!("Database migrations applied");

    let state = bootstrap::build_app_state(db, &config);

    let task =
        SolveMessageInconsistenciesTask::new(state.service.clone(), config.running_options())?;
    let task_id = state.task_manager.submit(Arc::new(task));

    let details = tokio::select! {
        details = state.task_manager.await_termination(task_id) => details,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, cancelling reconciliation");
            state.task_manager.cancel(task_id);
            state.task_manager.await_termination(task_id).await
        }
    };

    let details = details.ok_or_else(|| anyhow::anyhow!("task {} vanished", task_id))?;
    println!("{}", serde_json::to_string_pretty(&details)?);

    match details.status {
        TaskStatus::Completed | TaskStatus::Cancelled => Ok(()),
        status => Err(anyhow::anyhow!(
            "reconciliation ended with status {:?}: {}",
            status,
            details.error.unwrap_or_default()
        )),
    }
}
