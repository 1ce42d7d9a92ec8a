use crate::domain::entities::{TaskDetails, TaskResult, TaskType};
use crate::domain::errors::TaskError;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A unit of background work the task host knows how to run, poll and persist.
#[async_trait]
pub trait Task: Send + Sync {
    /// Runs to completion. Cancellation is cooperative through `cancel`.
    async fn run(&self, cancel: CancellationToken) -> Result<TaskResult, TaskError>;

    fn task_type(&self) -> TaskType;

    /// Progress or final result, safe to call while `run` is in flight.
    fn details(&self) -> Option<TaskDetails>;

    /// Parameters needed to rebuild this task from a persisted job.
    fn payload(&self) -> Value;
}
