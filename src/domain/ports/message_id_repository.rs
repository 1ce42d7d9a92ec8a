use crate::domain::entities::{MailboxId, MessageId, MessageMetadata};
use crate::domain::errors::StoreResult;
use futures::stream::BoxStream;

/// Denormalized per-message lookup table, keyed by `(message_id, mailbox_id)`.
#[async_trait::async_trait]
pub trait MessageIdRepository: Send + Sync {
    fn scan_all(&self) -> BoxStream<'static, StoreResult<MessageMetadata>>;

    async fn get(
        &self,
        message_id: &MessageId,
        mailbox_id: &MailboxId,
    ) -> StoreResult<Option<MessageMetadata>>;

    /// Insert or overwrite the row keyed by the entry's `(message_id, mailbox_id)`.
    async fn upsert(&self, entry: &MessageMetadata) -> StoreResult<()>;

    async fn delete(&self, message_id: &MessageId, mailbox_id: &MailboxId) -> StoreResult<()>;
}
