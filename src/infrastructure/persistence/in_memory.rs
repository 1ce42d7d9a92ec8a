//! Process-local implementation of both metadata tables.
//!
//! Backs tests and dry runs. Faults can be injected per message to simulate
//! an unreliable store.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::entities::{MailboxId, MessageId, MessageMetadata, MessageUid};
use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::ports::imap_uid_repository::ImapUidRepository;
use crate::domain::ports::message_id_repository::MessageIdRepository;

const DEFAULT_PAGE_SIZE: usize = 100;

type ImapUidKey = (MailboxId, MessageUid);
type MessageIdKey = (MessageId, MailboxId);

#[derive(Default)]
struct Tables {
    imap_uid: BTreeMap<ImapUidKey, MessageMetadata>,
    message_id: BTreeMap<MessageIdKey, MessageMetadata>,
}

#[derive(Default)]
struct Faults {
    /// messageId table writes that always fail.
    failing_writes: HashSet<MessageId>,
    /// messageId table writes that fail this many more times, then succeed.
    transient_write_failures: HashMap<MessageId, u32>,
    /// Point reads (both tables) that always fail.
    failing_reads: HashSet<MessageId>,
    imap_uid_scan_failure_after: Option<usize>,
    message_id_scan_failure_after: Option<usize>,
    message_id_write_attempts: u64,
}

impl Faults {
    fn check_write(&mut self, message_id: &MessageId) -> StoreResult<()> {
        self.message_id_write_attempts += 1;
        if self.failing_writes.contains(message_id) {
            return Err(StoreError::Unavailable(format!(
                "write rejected for message {}",
                message_id
            )));
        }
        if let Some(remaining) = self.transient_write_failures.get_mut(message_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Unavailable(format!(
                    "transient write failure for message {}",
                    message_id
                )));
            }
        }
        Ok(())
    }

    fn check_read(&self, message_id: &MessageId) -> StoreResult<()> {
        if self.failing_reads.contains(message_id) {
            return Err(StoreError::Unavailable(format!(
                "read rejected for message {}",
                message_id
            )));
        }
        Ok(())
    }
}

/// Shared state behind [`InMemoryImapUidRepository`] and [`InMemoryMessageIdRepository`].
#[derive(Clone)]
pub struct InMemoryMessageTables {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<RwLock<Faults>>,
    page_size: usize,
}

impl Default for InMemoryMessageTables {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageTables {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            faults: Arc::new(RwLock::new(Faults::default())),
            page_size: page_size.max(1),
        }
    }

    pub fn imap_uid_repository(&self) -> InMemoryImapUidRepository {
        InMemoryImapUidRepository {
            tables: self.clone(),
        }
    }

    pub fn message_id_repository(&self) -> InMemoryMessageIdRepository {
        InMemoryMessageIdRepository {
            tables: self.clone(),
        }
    }

    /// Writes an imapUid row directly, bypassing fault injection.
    pub fn insert_imap_uid_entry(&self, entry: MessageMetadata) {
        self.write_tables()
            .imap_uid
            .insert((entry.mailbox_id(), entry.uid()), entry);
    }

    /// Writes a messageId row directly, bypassing fault injection.
    pub fn insert_message_id_entry(&self, entry: MessageMetadata) {
        self.write_tables()
            .message_id
            .insert((entry.message_id(), entry.mailbox_id()), entry);
    }

    pub fn remove_imap_uid_entry(&self, mailbox_id: &MailboxId, uid: MessageUid) {
        self.write_tables().imap_uid.remove(&(*mailbox_id, uid));
    }

    pub fn imap_uid_entries(&self) -> Vec<MessageMetadata> {
        self.read_tables().imap_uid.values().cloned().collect()
    }

    pub fn message_id_entries(&self) -> Vec<MessageMetadata> {
        self.read_tables().message_id.values().cloned().collect()
    }

    pub fn message_id_entry(
        &self,
        message_id: &MessageId,
        mailbox_id: &MailboxId,
    ) -> Option<MessageMetadata> {
        self.read_tables()
            .message_id
            .get(&(*message_id, *mailbox_id))
            .cloned()
    }

    pub fn fail_writes_for(&self, message_id: MessageId) {
        self.write_faults().failing_writes.insert(message_id);
    }

    pub fn fail_writes_times(&self, message_id: MessageId, times: u32) {
        self.write_faults()
            .transient_write_failures
            .insert(message_id, times);
    }

    pub fn fail_reads_for(&self, message_id: MessageId) {
        self.write_faults().failing_reads.insert(message_id);
    }

    /// The imapUid scan errors once `entries` rows have been yielded.
    pub fn fail_imap_uid_scan_after(&self, entries: usize) {
        self.write_faults().imap_uid_scan_failure_after = Some(entries);
    }

    /// The messageId scan errors once `entries` rows have been yielded.
    pub fn fail_message_id_scan_after(&self, entries: usize) {
        self.write_faults().message_id_scan_failure_after = Some(entries);
    }

    pub fn clear_faults(&self) {
        *self.write_faults() = Faults::default();
    }

    /// Attempted writes against the messageId table, failed ones included.
    pub fn message_id_write_attempts(&self) -> u64 {
        self.faults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .message_id_write_attempts
    }

    fn read_tables(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tables(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_faults(&self) -> std::sync::RwLockWriteGuard<'_, Faults> {
        self.faults.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_read(&self, message_id: &MessageId) -> StoreResult<()> {
        self.faults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .check_read(message_id)
    }

    fn check_write(&self, message_id: &MessageId) -> StoreResult<()> {
        self.write_faults().check_write(message_id)
    }

    fn scan_failure_after(&self, select: fn(&Faults) -> Option<usize>) -> Option<usize> {
        select(&self.faults.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Pages through one table in key order, re-reading the map for every page
    /// so concurrent writes behind the cursor are tolerated.
    fn paginated_scan<K>(
        &self,
        table: fn(&Tables) -> &BTreeMap<K, MessageMetadata>,
        failure_after: Option<usize>,
    ) -> BoxStream<'static, StoreResult<MessageMetadata>>
    where
        K: Ord + Copy + Send + Sync + 'static,
    {
        let tables = self.tables.clone();
        let page_size = self.page_size;

        // (cursor, yielded so far, exhausted)
        stream::try_unfold((None::<K>, 0usize, false), move |(cursor, yielded, done)| {
            let tables = tables.clone();
            async move {
                if done {
                    return Ok::<_, StoreError>(None);
                }

                let limit = match failure_after {
                    Some(after) if yielded >= after => {
                        return Err(StoreError::Unavailable("scan interrupted".to_string()))
                    }
                    Some(after) => page_size.min(after - yielded),
                    None => page_size,
                };

                let page: Vec<(K, MessageMetadata)> = {
                    let guard = tables.read().unwrap_or_else(PoisonError::into_inner);
                    let lower = match cursor {
                        Some(key) => Bound::Excluded(key),
                        None => Bound::Unbounded,
                    };
                    table(&guard)
                        .range((lower, Bound::Unbounded))
                        .take(limit)
                        .map(|(key, entry)| (*key, entry.clone()))
                        .collect()
                };

                if page.is_empty() {
                    return Ok(None);
                }

                // A short page means the end of the table, unless it was cut
                // short for fault injection.
                let exhausted = page.len() < limit && failure_after.is_none();
                let next_cursor = page.last().map(|(key, _)| *key);
                let yielded = yielded + page.len();
                let entries = page.into_iter().map(|(_, entry)| Ok::<_, StoreError>(entry));

                Ok(Some((
                    stream::iter(entries),
                    (next_cursor, yielded, exhausted),
                )))
            }
        })
        .try_flatten()
        .boxed()
    }
}

#[derive(Clone)]
pub struct InMemoryImapUidRepository {
    tables: InMemoryMessageTables,
}

#[async_trait]
impl ImapUidRepository for InMemoryImapUidRepository {
    fn scan_all(&self) -> BoxStream<'static, StoreResult<MessageMetadata>> {
        let failure_after = self
            .tables
            .scan_failure_after(|faults| faults.imap_uid_scan_failure_after);
        self.tables
            .paginated_scan(|tables| &tables.imap_uid, failure_after)
    }

    async fn get(
        &self,
        mailbox_id: &MailboxId,
        uid: MessageUid,
    ) -> StoreResult<Option<MessageMetadata>> {
        let entry = self
            .tables
            .read_tables()
            .imap_uid
            .get(&(*mailbox_id, uid))
            .cloned();
        if let Some(entry) = &entry {
            self.tables.check_read(&entry.message_id())?;
        }
        Ok(entry)
    }

    async fn upsert(&self, entry: &MessageMetadata) -> StoreResult<()> {
        self.tables.insert_imap_uid_entry(entry.clone());
        Ok(())
    }

    async fn delete(&self, mailbox_id: &MailboxId, uid: MessageUid) -> StoreResult<()> {
        self.tables.remove_imap_uid_entry(mailbox_id, uid);
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryMessageIdRepository {
    tables: InMemoryMessageTables,
}

#[async_trait]
impl MessageIdRepository for InMemoryMessageIdRepository {
    fn scan_all(&self) -> BoxStream<'static, StoreResult<MessageMetadata>> {
        let failure_after = self
            .tables
            .scan_failure_after(|faults| faults.message_id_scan_failure_after);
        self.tables
            .paginated_scan(|tables| &tables.message_id, failure_after)
    }

    async fn get(
        &self,
        message_id: &MessageId,
        mailbox_id: &MailboxId,
    ) -> StoreResult<Option<MessageMetadata>> {
        self.tables.check_read(message_id)?;
        Ok(self.tables.message_id_entry(message_id, mailbox_id))
    }

    async fn upsert(&self, entry: &MessageMetadata) -> StoreResult<()> {
        self.tables.check_write(&entry.message_id())?;
        self.tables.insert_message_id_entry(entry.clone());
        Ok(())
    }

    async fn delete(&self, message_id: &MessageId, mailbox_id: &MailboxId) -> StoreResult<()> {
        self.tables.check_write(message_id)?;
        self.tables
            .write_tables()
            .message_id
            .remove(&(*message_id, *mailbox_id));
        Ok(())
    }
}
