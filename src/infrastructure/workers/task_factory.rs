use std::sync::Arc;
use tracing::info;

use crate::application::services::SolveMessageInconsistenciesService;
use crate::application::tasks::solve_message_inconsistencies_task::{
    SolveMessageInconsistenciesTask, SolveMessageInconsistenciesTaskDto,
    SOLVE_MESSAGE_INCONSISTENCIES_TYPE,
};
use crate::domain::entities::Job;
use crate::domain::errors::TaskError;
use crate::domain::ports::task::Task;

/// Rebuilds runnable tasks from persisted job metadata, dispatching on the job type.
#[derive(Clone)]
pub struct TaskFactory {
    solve_message_inconsistencies: Arc<SolveMessageInconsistenciesService>,
}

impl TaskFactory {
    pub fn new(solve_message_inconsistencies: Arc<SolveMessageInconsistenciesService>) -> Self {
        Self {
            solve_message_inconsistencies,
        }
    }

    pub fn from_job(&self, job: &Job) -> Result<Arc<dyn Task>, TaskError> {
        info!("Restoring job {} (type: {})", job.id, job.job_type);
        match job.job_type.as_str() {
            SOLVE_MESSAGE_INCONSISTENCIES_TYPE => {
                let dto: SolveMessageInconsistenciesTaskDto =
                    serde_json::from_value(job.payload.clone())?;
                let task = SolveMessageInconsistenciesTask::from_dto(
                    self.solve_message_inconsistencies.clone(),
                    dto,
                )?;
                Ok(Arc::new(task))
            }
            other => Err(TaskError::UnknownTaskType(other.to_string())),
        }
    }

    /// Persistable metadata for a task.
    pub fn to_job(task: &dyn Task) -> Job {
        Job::new(&task.task_type(), task.payload())
    }
}
