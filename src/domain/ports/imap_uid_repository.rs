use crate::domain::entities::{MailboxId, MessageMetadata, MessageUid};
use crate::domain::errors::StoreResult;
use futures::stream::BoxStream;

/// Authoritative per-mailbox table, keyed by `(mailbox_id, uid)`.
#[async_trait::async_trait]
pub trait ImapUidRepository: Send + Sync {
    /// Lazy, finite scan over every row of every mailbox.
    ///
    /// Each call opens its own cursor. A failed item means the scan cannot go on.
    fn scan_all(&self) -> BoxStream<'static, StoreResult<MessageMetadata>>;

    async fn get(&self, mailbox_id: &MailboxId, uid: MessageUid)
        -> StoreResult<Option<MessageMetadata>>;

    async fn upsert(&self, entry: &MessageMetadata) -> StoreResult<()>;

    async fn delete(&self, mailbox_id: &MailboxId, uid: MessageUid) -> StoreResult<()>;
}
