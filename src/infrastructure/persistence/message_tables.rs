use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::domain::entities::{
    MailboxId, MessageFlags, MessageId, MessageIdentity, MessageMetadata, MessageUid, ModSeq,
};
use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::ports::imap_uid_repository::ImapUidRepository;
use crate::domain::ports::message_id_repository::MessageIdRepository;
use crate::infrastructure::persistence::Database;

pub const DEFAULT_PAGE_SIZE: i64 = 500;

fn decode_entry(row: &AnyRow) -> StoreResult<MessageMetadata> {
    let mailbox_id: String = row.try_get("mailbox_id")?;
    let message_id: String = row.try_get("message_id")?;
    let uid: i64 = row.try_get("uid")?;
    let mod_seq: i64 = row.try_get("mod_seq")?;
    let flags: String = row.try_get("flags")?;

    let mailbox_id = mailbox_id
        .parse::<MailboxId>()
        .map_err(|e| StoreError::Decode(format!("mailbox_id '{}': {}", mailbox_id, e)))?;
    let message_id = message_id
        .parse::<MessageId>()
        .map_err(|e| StoreError::Decode(format!("message_id '{}': {}", message_id, e)))?;
    let uid = u64::try_from(uid).map_err(|_| StoreError::Decode(format!("uid {}", uid)))?;
    let mod_seq =
        u64::try_from(mod_seq).map_err(|_| StoreError::Decode(format!("mod_seq {}", mod_seq)))?;

    Ok(MessageMetadata::new(
        MessageIdentity::new(mailbox_id, message_id, MessageUid::of(uid)),
        ModSeq::of(mod_seq),
        MessageFlags::decode(&flags),
    ))
}

fn to_column(value: u64, column: &str) -> StoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::Decode(format!("{} {} out of range", column, value)))
}

/// imapUid table stored in SQL, scanned page by page in key order.
#[derive(Clone)]
pub struct SqlImapUidRepository {
    db: Database,
    page_size: i64,
}

impl SqlImapUidRepository {
    pub fn new(db: Database) -> Self {
        Self::with_page_size(db, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(db: Database, page_size: i64) -> Self {
        Self {
            db,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl ImapUidRepository for SqlImapUidRepository {
    fn scan_all(&self) -> BoxStream<'static, StoreResult<MessageMetadata>> {
        let pool = self.db.pool().clone();
        let page_size = self.page_size;

        // State: None once exhausted, otherwise the key of the last row read.
        stream::try_unfold(Some(None::<(String, i64)>), move |cursor| {
            let pool = pool.clone();
            async move {
                let Some(after) = cursor else {
                    return Ok::<_, StoreError>(None);
                };

                let rows = match &after {
                    None => {
                        sqlx::query(
                            "SELECT mailbox_id, uid, message_id, mod_seq, flags
                             FROM imap_uid_table
                             ORDER BY mailbox_id ASC, uid ASC
                             LIMIT ?",
                        )
                        .bind(page_size)
                        .fetch_all(&pool)
                        .await?
                    }
                    Some((mailbox_id, uid)) => {
                        sqlx::query(
                            "SELECT mailbox_id, uid, message_id, mod_seq, flags
                             FROM imap_uid_table
                             WHERE mailbox_id > ? OR (mailbox_id = ? AND uid > ?)
                             ORDER BY mailbox_id ASC, uid ASC
                             LIMIT ?",
                        )
                        .bind(mailbox_id)
                        .bind(mailbox_id)
                        .bind(*uid)
                        .bind(page_size)
                        .fetch_all(&pool)
                        .await?
                    }
                };

                let page = rows
                    .iter()
                    .map(decode_entry)
                    .collect::<StoreResult<Vec<_>>>()?;
                if page.is_empty() {
                    return Ok(None);
                }

                let next = if (page.len() as i64) < page_size {
                    None
                } else {
                    let last = &page[page.len() - 1];
                    Some((
                        last.mailbox_id().serialize(),
                        to_column(last.uid().as_u64(), "uid")?,
                    ))
                };
                let state = next.map(Some);

                Ok(Some((
                    stream::iter(page.into_iter().map(Ok::<_, StoreError>)),
                    state,
                )))
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn get(
        &self,
        mailbox_id: &MailboxId,
        uid: MessageUid,
    ) -> StoreResult<Option<MessageMetadata>> {
        let row = sqlx::query(
            "SELECT mailbox_id, uid, message_id, mod_seq, flags
             FROM imap_uid_table
             WHERE mailbox_id = ? AND uid = ?",
        )
        .bind(mailbox_id.serialize())
        .bind(to_column(uid.as_u64(), "uid")?)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(decode_entry).transpose()
    }

    async fn upsert(&self, entry: &MessageMetadata) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO imap_uid_table (mailbox_id, uid, message_id, mod_seq, flags)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(mailbox_id, uid) DO UPDATE SET
                message_id = excluded.message_id,
                mod_seq = excluded.mod_seq,
                flags = excluded.flags",
        )
        .bind(entry.mailbox_id().serialize())
        .bind(to_column(entry.uid().as_u64(), "uid")?)
        .bind(entry.message_id().serialize())
        .bind(to_column(entry.mod_seq.as_u64(), "mod_seq")?)
        .bind(entry.flags.encode())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn delete(&self, mailbox_id: &MailboxId, uid: MessageUid) -> StoreResult<()> {
        sqlx::query("DELETE FROM imap_uid_table WHERE mailbox_id = ? AND uid = ?")
            .bind(mailbox_id.serialize())
            .bind(to_column(uid.as_u64(), "uid")?)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }
}

/// messageId table stored in SQL.
#[derive(Clone)]
pub struct SqlMessageIdRepository {
    db: Database,
    page_size: i64,
}

impl SqlMessageIdRepository {
    pub fn new(db: Database) -> Self {
        Self::with_page_size(db, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(db: Database, page_size: i64) -> Self {
        Self {
            db,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl MessageIdRepository for SqlMessageIdRepository {
    fn scan_all(&self) -> BoxStream<'static, StoreResult<MessageMetadata>> {
        let pool = self.db.pool().clone();
        let page_size = self.page_size;

        stream::try_unfold(Some(None::<(String, String)>), move |cursor| {
            let pool = pool.clone();
            async move {
                let Some(after) = cursor else {
                    return Ok::<_, StoreError>(None);
                };

                let rows = match &after {
                    None => {
                        sqlx::query(
                            "SELECT message_id, mailbox_id, uid, mod_seq, flags
                             FROM message_id_table
                             ORDER BY message_id ASC, mailbox_id ASC
                             LIMIT ?",
                        )
                        .bind(page_size)
                        .fetch_all(&pool)
                        .await?
                    }
                    Some((message_id, mailbox_id)) => {
                        sqlx::query(
                            "SELECT message_id, mailbox_id, uid, mod_seq, flags
                             FROM message_id_table
                             WHERE message_id > ? OR (message_id = ? AND mailbox_id > ?)
                             ORDER BY message_id ASC, mailbox_id ASC
                             LIMIT ?",
                        )
                        .bind(message_id)
                        .bind(message_id)
                        .bind(mailbox_id)
                        .bind(page_size)
                        .fetch_all(&pool)
                        .await?
                    }
                };

                let page = rows
                    .iter()
                    .map(decode_entry)
                    .collect::<StoreResult<Vec<_>>>()?;
                if page.is_empty() {
                    return Ok(None);
                }

                let next = if (page.len() as i64) < page_size {
                    None
                } else {
                    let last = &page[page.len() - 1];
                    Some((last.message_id().serialize(), last.mailbox_id().serialize()))
                };
                let state = next.map(Some);

                Ok(Some((
                    stream::iter(page.into_iter().map(Ok::<_, StoreError>)),
                    state,
                )))
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn get(
        &self,
        message_id: &MessageId,
        mailbox_id: &MailboxId,
    ) -> StoreResult<Option<MessageMetadata>> {
        let row = sqlx::query(
            "SELECT message_id, mailbox_id, uid, mod_seq, flags
             FROM message_id_table
             WHERE message_id = ? AND mailbox_id = ?",
        )
        .bind(message_id.serialize())
        .bind(mailbox_id.serialize())
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(decode_entry).transpose()
    }

    async fn upsert(&self, entry: &MessageMetadata) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO message_id_table (message_id, mailbox_id, uid, mod_seq, flags)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(message_id, mailbox_id) DO UPDATE SET
                uid = excluded.uid,
                mod_seq = excluded.mod_seq,
                flags = excluded.flags",
        )
        .bind(entry.message_id().serialize())
        .bind(entry.mailbox_id().serialize())
        .bind(to_column(entry.uid().as_u64(), "uid")?)
        .bind(to_column(entry.mod_seq.as_u64(), "mod_seq")?)
        .bind(entry.flags.encode())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn delete(&self, message_id: &MessageId, mailbox_id: &MailboxId) -> StoreResult<()> {
        sqlx::query("DELETE FROM message_id_table WHERE message_id = ? AND mailbox_id = ?")
            .bind(message_id.serialize())
            .bind(mailbox_id.serialize())
            .execute(self.db.pool())
            .await?;

        Ok(())
    }
}
