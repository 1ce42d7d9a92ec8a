use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::application::services::inconsistencies_context::Context;
use crate::application::services::message_inconsistencies_service::{
    RunOutcome, RunningOptions, SolveMessageInconsistenciesService,
};
use crate::domain::entities::{MessageIdentity, TaskDetails, TaskResult, TaskType};
use crate::domain::errors::TaskError;
use crate::domain::ports::task::Task;

pub const SOLVE_MESSAGE_INCONSISTENCIES_TYPE: &str = "solve-message-inconsistencies";
pub const SOLVE_MESSAGE_INCONSISTENCIES: TaskType =
    TaskType::of(SOLVE_MESSAGE_INCONSISTENCIES_TYPE);

/// One fixed (or failed) identity as rendered in the result document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInconsistenciesEntry {
    pub mailbox_id: String,
    pub message_id: String,
    pub message_uid: u64,
}

impl From<&MessageIdentity> for MessageInconsistenciesEntry {
    fn from(identity: &MessageIdentity) -> Self {
        Self {
            mailbox_id: identity.mailbox_id.serialize(),
            message_id: identity.message_id.serialize(),
            message_uid: identity.uid.as_u64(),
        }
    }
}

/// Result document of a reconciliation run. Field names are a wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Details {
    pub timestamp: DateTime<Utc>,
    pub processed_imap_uid_entries: u64,
    pub processed_message_id_entries: u64,
    pub added_message_id_entries: u64,
    pub updated_message_id_entries: u64,
    pub removed_message_id_entries: u64,
    pub fixed_inconsistencies: Vec<MessageInconsistenciesEntry>,
    pub errors: Vec<MessageInconsistenciesEntry>,
}

/// Persisted form of the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveMessageInconsistenciesTaskDto {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub running_options: RunningOptions,
}

pub struct SolveMessageInconsistenciesTask {
    service: Arc<SolveMessageInconsistenciesService>,
    running_options: RunningOptions,
    context: Context,
}

impl SolveMessageInconsistenciesTask {
    pub fn new(
        service: Arc<SolveMessageInconsistenciesService>,
        running_options: RunningOptions,
    ) -> Result<Self, TaskError> {
        running_options.validate()?;
        Ok(Self {
            service,
            running_options,
            context: Context::new(),
        })
    }

    pub fn from_dto(
        service: Arc<SolveMessageInconsistenciesService>,
        dto: SolveMessageInconsistenciesTaskDto,
    ) -> Result<Self, TaskError> {
        if dto.task_type != SOLVE_MESSAGE_INCONSISTENCIES_TYPE {
            return Err(TaskError::UnknownTaskType(dto.task_type));
        }
        Self::new(service, dto.running_options)
    }

    pub fn to_dto(&self) -> SolveMessageInconsistenciesTaskDto {
        SolveMessageInconsistenciesTaskDto {
            task_type: SOLVE_MESSAGE_INCONSISTENCIES_TYPE.to_string(),
            running_options: self.running_options,
        }
    }

    /// Renders the live or final progress, stamped with the current time.
    pub fn describe(&self) -> Details {
        let snapshot = self.context.snapshot();
        Details {
            timestamp: self.service.time_service().now(),
            processed_imap_uid_entries: snapshot.processed_imap_uid_entries,
            processed_message_id_entries: snapshot.processed_message_id_entries,
            added_message_id_entries: snapshot.added_message_id_entries,
            updated_message_id_entries: snapshot.updated_message_id_entries,
            removed_message_id_entries: snapshot.removed_message_id_entries,
            fixed_inconsistencies: snapshot
                .fixed_inconsistencies
                .iter()
                .map(MessageInconsistenciesEntry::from)
                .collect(),
            errors: snapshot
                .errors
                .iter()
                .map(MessageInconsistenciesEntry::from)
                .collect(),
        }
    }
}

#[async_trait]
impl Task for SolveMessageInconsistenciesTask {
    async fn run(&self, cancel: CancellationToken) -> Result<TaskResult, TaskError> {
        let outcome = self
            .service
            .fix_message_inconsistencies(&self.context, &self.running_options, &cancel)
            .await?;

        Ok(match outcome {
            RunOutcome::Cancelled => TaskResult::Cancelled,
            RunOutcome::Completed if self.context.snapshot().errors.is_empty() => {
                TaskResult::Completed
            }
            RunOutcome::Completed => TaskResult::Partial,
        })
    }

    fn task_type(&self) -> TaskType {
        SOLVE_MESSAGE_INCONSISTENCIES
    }

    fn details(&self) -> Option<TaskDetails> {
        let details = self.describe();
        match serde_json::to_value(&details) {
            Ok(document) => Some(TaskDetails {
                task_type: SOLVE_MESSAGE_INCONSISTENCIES,
                timestamp: details.timestamp,
                document,
            }),
            Err(e) => {
                tracing::error!("Failed to serialize task details: {}", e);
                None
            }
        }
    }

    fn payload(&self) -> Value {
        serde_json::to_value(self.to_dto()).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::message_inconsistencies_service::RetryPolicy;
    use crate::domain::entities::{
        MailboxId, MessageFlags, MessageId, MessageMetadata, MessageUid, ModSeq,
    };
    use crate::infrastructure::persistence::InMemoryMessageTables;
    use crate::infrastructure::runtime::TokioTimeService;
    use serde_json::json;
    use std::time::Duration;

    fn task_over(tables: &InMemoryMessageTables) -> SolveMessageInconsistenciesTask {
        let service = SolveMessageInconsistenciesService::new(
            Arc::new(tables.imap_uid_repository()),
            Arc::new(tables.message_id_repository()),
            Arc::new(TokioTimeService::new()),
        )
        .with_retry_policy(RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        });
        SolveMessageInconsistenciesTask::new(Arc::new(service), RunningOptions::default()).unwrap()
    }

    fn primary(message_id: MessageId, uid: u64) -> MessageMetadata {
        MessageMetadata::new(
            MessageIdentity::new(MailboxId::new(), message_id, MessageUid::of(uid)),
            ModSeq::of(1),
            MessageFlags::empty(),
        )
    }

    #[test]
    fn test_invalid_running_options_are_rejected() {
        let tables = InMemoryMessageTables::new();
        let service = task_over(&tables).service.clone();
        let options = RunningOptions {
            messages_per_second: None,
            concurrency: 0,
        };
        assert!(matches!(
            SolveMessageInconsistenciesTask::new(service, options),
            Err(TaskError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_run_results() {
        let tables = InMemoryMessageTables::new();
        tables.insert_imap_uid_entry(primary(MessageId::new(), 1));
        let task = task_over(&tables);
        let result = tokio_test::block_on(task.run(CancellationToken::new())).unwrap();
        assert_eq!(result, TaskResult::Completed);

        let failing = MessageId::new();
        tables.insert_imap_uid_entry(primary(failing, 2));
        tables.fail_writes_for(failing);
        let task = task_over(&tables);
        let result = tokio_test::block_on(task.run(CancellationToken::new())).unwrap();
        assert_eq!(result, TaskResult::Partial);
        let details = task.details().unwrap();
        assert_eq!(details.task_type, SOLVE_MESSAGE_INCONSISTENCIES);
        assert_eq!(details.document["errors"].as_array().unwrap().len(), 1);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let task = task_over(&tables);
        let result = tokio_test::block_on(task.run(cancel)).unwrap();
        assert_eq!(result, TaskResult::Cancelled);
        assert_eq!(task.describe().processed_imap_uid_entries, 0);
    }

    #[test]
    fn test_entry_uses_store_native_encodings() {
        let mailbox_id: MailboxId = "464765a0-e4e7-11e4-aba4-710c1de3782b".parse().unwrap();
        let message_id: MessageId = "d2bee791-7e63-11ea-883c-95b84008f979".parse().unwrap();
        let identity = MessageIdentity::new(mailbox_id, message_id, MessageUid::of(2));

        let entry = MessageInconsistenciesEntry::from(&identity);

        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({
                "mailboxId": "464765a0-e4e7-11e4-aba4-710c1de3782b",
                "messageId": "d2bee791-7e63-11ea-883c-95b84008f979",
                "messageUid": 2
            })
        );
    }

    #[test]
    fn test_details_field_names_are_preserved() {
        let details = Details {
            timestamp: "2007-12-03T10:15:30Z".parse().unwrap(),
            processed_imap_uid_entries: 2,
            processed_message_id_entries: 1,
            added_message_id_entries: 1,
            updated_message_id_entries: 0,
            removed_message_id_entries: 1,
            fixed_inconsistencies: vec![MessageInconsistenciesEntry {
                mailbox_id: "551f0580-82fb-11ea-970e-f9c83d4cf8c2".to_string(),
                message_id: "d2bee791-7e63-11ea-883c-95b84008f979".to_string(),
                message_uid: 1,
            }],
            errors: vec![],
        };

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(
            json,
            json!({
                "timestamp": "2007-12-03T10:15:30Z",
                "processedImapUidEntries": 2,
                "processedMessageIdEntries": 1,
                "addedMessageIdEntries": 1,
                "updatedMessageIdEntries": 0,
                "removedMessageIdEntries": 1,
                "fixedInconsistencies": [{
                    "mailboxId": "551f0580-82fb-11ea-970e-f9c83d4cf8c2",
                    "messageId": "d2bee791-7e63-11ea-883c-95b84008f979",
                    "messageUid": 1
                }],
                "errors": []
            })
        );

        let back: Details = serde_json::from_value(json).unwrap();
        assert_eq!(back, details);
    }

    #[test]
    fn test_dto_shape() {
        let dto: SolveMessageInconsistenciesTaskDto = serde_json::from_value(json!({
            "type": "solve-message-inconsistencies",
            "runningOptions": {"messagesPerSecond": 20}
        }))
        .unwrap();

        assert_eq!(dto.task_type, "solve-message-inconsistencies");
        assert_eq!(dto.running_options.messages_per_second, Some(20));
        assert_eq!(dto.running_options.concurrency, 1);
    }
}
