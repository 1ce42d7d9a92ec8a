use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::entities::{TaskExecutionDetails, TaskId, TaskResult, TaskStatus};
use crate::domain::ports::task::Task;
use crate::domain::ports::task_spawner::TaskSpawner;
use crate::domain::ports::time_service::TimeService;

struct Execution {
    task: Arc<dyn Task>,
    cancel: CancellationToken,
    status: watch::Sender<TaskStatus>,
    submitted_date: DateTime<Utc>,
    started_date: Option<DateTime<Utc>>,
    completed_date: Option<DateTime<Utc>>,
    failed_date: Option<DateTime<Utc>>,
    cancelled_date: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl Execution {
    fn to_details(&self, task_id: TaskId) -> TaskExecutionDetails {
        TaskExecutionDetails {
            task_id,
            task_type: self.task.task_type(),
            status: *self.status.borrow(),
            submitted_date: self.submitted_date,
            started_date: self.started_date,
            completed_date: self.completed_date,
            failed_date: self.failed_date,
            cancelled_date: self.cancelled_date,
            error: self.error.clone(),
            additional_information: self.task.details(),
        }
    }
}

#[derive(Default)]
struct Executions {
    by_id: HashMap<TaskId, Execution>,
    /// Terminated tasks, oldest first.
    finished: VecDeque<TaskId>,
}

/// In-process host running submitted tasks in the background and answering
/// progress polls while they run.
///
/// Waiting and running tasks are always kept. Only the most recent
/// `retained_finished` terminated tasks stay queryable; older ones are evicted.
#[derive(Clone)]
pub struct TaskManager {
    spawner: Arc<dyn TaskSpawner>,
    time_service: Arc<dyn TimeService>,
    executions: Arc<RwLock<Executions>>,
    retained_finished: usize,
}

impl TaskManager {
    pub const DEFAULT_RETAINED_FINISHED: usize = 100;

    pub fn new(spawner: Arc<dyn TaskSpawner>, time_service: Arc<dyn TimeService>) -> Self {
        Self::with_retention(spawner, time_service, Self::DEFAULT_RETAINED_FINISHED)
    }

    /// At least one finished task is always kept, so `await_termination`
    /// can report the task it waited for.
    pub fn with_retention(
        spawner: Arc<dyn TaskSpawner>,
        time_service: Arc<dyn TimeService>,
        retained_finished: usize,
    ) -> Self {
        Self {
            spawner,
            time_service,
            executions: Arc::new(RwLock::new(Executions::default())),
            retained_finished: retained_finished.max(1),
        }
    }

    pub fn submit(&self, task: Arc<dyn Task>) -> TaskId {
        let task_id = TaskId::generate();
        let cancel = CancellationToken::new();
        let (status, _) = watch::channel(TaskStatus::Waiting);

        info!(%task_id, task_type = %task.task_type(), "Task submitted");
        self.executions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .insert(
                task_id,
                Execution {
                    task: task.clone(),
                    cancel: cancel.clone(),
                    status,
                    submitted_date: self.time_service.now(),
                    started_date: None,
                    completed_date: None,
                    failed_date: None,
                    cancelled_date: None,
                    error: None,
                },
            );

        let manager = self.clone();
        self.spawner.spawn(Box::pin(async move {
            manager.execute(task_id, task, cancel).await;
        }));

        task_id
    }

    async fn execute(&self, task_id: TaskId, task: Arc<dyn Task>, cancel: CancellationToken) {
        if cancel.is_cancelled() {
            info!(%task_id, "Task cancelled before it started");
            self.finish(task_id, TaskStatus::Cancelled, None);
            return;
        }

        let now = self.time_service.now();
        self.update(task_id, |execution| {
            execution.started_date = Some(now);
            execution.status.send_replace(TaskStatus::InProgress);
        });
        info!(%task_id, task_type = %task.task_type(), "Processing task");

        match task.run(cancel).await {
            Ok(TaskResult::Completed) => {
                info!(%task_id, "Task completed successfully");
                self.finish(task_id, TaskStatus::Completed, None);
            }
            Ok(TaskResult::Partial) => {
                warn!(%task_id, "Task completed with failures");
                self.finish(
                    task_id,
                    TaskStatus::Failed,
                    Some("task completed partially".to_string()),
                );
            }
            Ok(TaskResult::Cancelled) => {
                info!(%task_id, "Task cancelled");
                self.finish(task_id, TaskStatus::Cancelled, None);
            }
            Err(e) => {
                error!(%task_id, "Task failed: {}", e);
                self.finish(task_id, TaskStatus::Failed, Some(e.to_string()));
            }
        }
    }

    fn finish(&self, task_id: TaskId, status: TaskStatus, error: Option<String>) {
        let now = self.time_service.now();
        let mut executions = self
            .executions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(execution) = executions.by_id.get_mut(&task_id) else {
            return;
        };
        match status {
            TaskStatus::Completed => execution.completed_date = Some(now),
            TaskStatus::Failed => execution.failed_date = Some(now),
            TaskStatus::Cancelled => execution.cancelled_date = Some(now),
            TaskStatus::Waiting | TaskStatus::InProgress => {}
        }
        execution.error = error;
        execution.status.send_replace(status);

        executions.finished.push_back(task_id);
        while executions.finished.len() > self.retained_finished {
            if let Some(evicted) = executions.finished.pop_front() {
                executions.by_id.remove(&evicted);
                debug!(task_id = %evicted, "Evicted finished task");
            }
        }
    }

    fn update(&self, task_id: TaskId, change: impl FnOnce(&mut Execution)) {
        let mut executions = self
            .executions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(execution) = executions.by_id.get_mut(&task_id) {
            change(execution);
        }
    }

    /// Current state of a task, including its live additional information.
    pub fn details(&self, task_id: TaskId) -> Option<TaskExecutionDetails> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&task_id)
            .map(|execution| execution.to_details(task_id))
    }

    pub fn list(&self) -> Vec<TaskExecutionDetails> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .iter()
            .map(|(task_id, execution)| execution.to_details(*task_id))
            .collect()
    }

    /// Requests cancellation. Returns false for unknown or already finished tasks.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let executions = self
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match executions.by_id.get(&task_id) {
            Some(execution) if !execution.status.borrow().is_terminal() => {
                info!(%task_id, "Cancellation requested");
                execution.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Resolves once the task reached a terminal status.
    pub async fn await_termination(&self, task_id: TaskId) -> Option<TaskExecutionDetails> {
        let mut status = self
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&task_id)?
            .status
            .subscribe();

        // The sender lives as long as the manager, so this only errors on shutdown.
        let _ = status.wait_for(TaskStatus::is_terminal).await;
        self.details(task_id)
    }
}
