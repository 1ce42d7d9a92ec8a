use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures that abort a reconciliation run. Per-entry failures never get here.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to scan imapUid table: {0}")]
    ImapUidScan(#[source] StoreError),
    #[error("Failed to scan messageId table: {0}")]
    MessageIdScan(#[source] StoreError),
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),
    #[error("Invalid running options: {0}")]
    InvalidOptions(String),
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),
    #[error("Invalid task payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl From<ReconcileError> for TaskError {
    fn from(err: ReconcileError) -> Self {
        TaskError::Failed(err.to_string())
    }
}
