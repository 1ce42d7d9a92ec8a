use std::sync::Arc;

use crate::application::services::SolveMessageInconsistenciesService;
use crate::config::Config;
use crate::domain::ports::imap_uid_repository::ImapUidRepository;
use crate::domain::ports::message_id_repository::MessageIdRepository;
use crate::domain::ports::task_spawner::TaskSpawner;
use crate::domain::ports::time_service::TimeService;
use crate::infrastructure::persistence::{Database, SqlImapUidRepository, SqlMessageIdRepository};
use crate::infrastructure::runtime::{TokioTaskSpawner, TokioTimeService};
use crate::infrastructure::workers::{TaskFactory, TaskManager};

/// Everything a process needs to submit and follow reconciliation tasks.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub service: Arc<SolveMessageInconsistenciesService>,
    pub task_manager: TaskManager,
    pub task_factory: TaskFactory,
}

pub fn build_app_state(db: Database, config: &Config) -> AppState {
    let time_service = Arc::new(TokioTimeService::new()) as Arc<dyn TimeService>;
    let task_spawner = Arc::new(TokioTaskSpawner::new()) as Arc<dyn TaskSpawner>;

    let imap_uid_repo = Arc::new(SqlImapUidRepository::with_page_size(
        db.clone(),
        config.scan_page_size,
    )) as Arc<dyn ImapUidRepository>;
    let message_id_repo = Arc::new(SqlMessageIdRepository::with_page_size(
        db.clone(),
        config.scan_page_size,
    )) as Arc<dyn MessageIdRepository>;

    let service = Arc::new(
        SolveMessageInconsistenciesService::new(
            imap_uid_repo,
            message_id_repo,
            time_service.clone(),
        )
        .with_retry_policy(config.retry_policy()),
    );
    tracing::info!(
        page_size = config.scan_page_size,
        "Message inconsistencies service initialized"
    );

    let task_manager = TaskManager::new(task_spawner, time_service);
    let task_factory = TaskFactory::new(service.clone());

    AppState {
        db,
        service,
        task_manager,
        task_factory,
    }
}
