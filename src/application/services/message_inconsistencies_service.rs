//! Detects and repairs drift between the imapUid table and the messageId table.
//!
//! The imapUid table (keyed by mailbox and uid) is the source of truth. The
//! messageId table (keyed by message and mailbox) is a projection of it that
//! can diverge after partial failures. A run makes two passes:
//!
//! 1. every imapUid entry must have an identical messageId entry (add or update it);
//! 2. every messageId entry must point at an imapUid entry (remove orphans).
//!
//! Every fix is an idempotent upsert or delete, so a run can be interrupted and
//! simply started again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::services::inconsistencies_context::Context;
use crate::domain::entities::{MessageIdentity, MessageMetadata};
use crate::domain::errors::{ReconcileError, StoreError, StoreResult, TaskError};
use crate::domain::ports::imap_uid_repository::ImapUidRepository;
use crate::domain::ports::message_id_repository::MessageIdRepository;
use crate::domain::ports::time_service::TimeService;

fn default_concurrency() -> u32 {
    1
}

/// Knobs an operator can set when starting a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningOptions {
    /// Upper bound on scanned entries per second, per pass. `None` disables throttling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_per_second: Option<u32>,
    /// Entries fixed at once within a pass.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl Default for RunningOptions {
    fn default() -> Self {
        Self {
            messages_per_second: None,
            concurrency: default_concurrency(),
        }
    }
}

impl RunningOptions {
    pub fn new(messages_per_second: Option<u32>, concurrency: u32) -> Result<Self, TaskError> {
        let options = Self {
            messages_per_second,
            concurrency,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        if self.messages_per_second == Some(0) {
            return Err(TaskError::InvalidOptions(
                "messagesPerSecond must be strictly positive".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(TaskError::InvalidOptions(
                "concurrency must be strictly positive".to_string(),
            ));
        }
        Ok(())
    }

    fn parallelism(&self) -> usize {
        self.concurrency.max(1) as usize
    }
}

/// How store writes are retried before an entry is reported as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Drift of a messageId entry relative to its imapUid entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inconsistency {
    /// No messageId entry exists for the imapUid entry.
    MissingMessageIdEntry,
    /// The messageId entry exists but its uid, modseq or flags differ.
    OutdatedMessageIdEntry,
}

/// Classifies the messageId entry found for `imap_uid_entry`.
pub fn detect_inconsistency(
    imap_uid_entry: &MessageMetadata,
    message_id_entry: Option<&MessageMetadata>,
) -> Option<Inconsistency> {
    match message_id_entry {
        None => Some(Inconsistency::MissingMessageIdEntry),
        Some(entry) if entry.mirrors(imap_uid_entry) => None,
        Some(_) => Some(Inconsistency::OutdatedMessageIdEntry),
    }
}

/// A messageId entry is orphaned when the imapUid slot it points at is empty
/// or holds another message.
pub fn is_orphan(
    message_id_entry: &MessageMetadata,
    imap_uid_entry: Option<&MessageMetadata>,
) -> bool {
    match imap_uid_entry {
        None => true,
        Some(entry) => entry.message_id() != message_id_entry.message_id(),
    }
}

fn throttled(
    entries: BoxStream<'static, StoreResult<MessageMetadata>>,
    options: &RunningOptions,
) -> BoxStream<'static, StoreResult<MessageMetadata>> {
    match options.messages_per_second.filter(|rate| *rate > 0) {
        Some(rate) => {
            tokio_stream::StreamExt::throttle(entries, Duration::from_secs(1) / rate).boxed()
        }
        None => entries,
    }
}

pub struct SolveMessageInconsistenciesService {
    imap_uid_repo: Arc<dyn ImapUidRepository>,
    message_id_repo: Arc<dyn MessageIdRepository>,
    time_service: Arc<dyn TimeService>,
    retry_policy: RetryPolicy,
}

impl SolveMessageInconsistenciesService {
    pub fn new(
        imap_uid_repo: Arc<dyn ImapUidRepository>,
        message_id_repo: Arc<dyn MessageIdRepository>,
        time_service: Arc<dyn TimeService>,
    ) -> Self {
        Self {
            imap_uid_repo,
            message_id_repo,
            time_service,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn time_service(&self) -> &Arc<dyn TimeService> {
        &self.time_service
    }

    /// Runs both passes, recording progress into `context`.
    ///
    /// Returns `Cancelled` as soon as `cancel` fires; entries already in flight
    /// are finished, nothing is rolled back. Only a failing scan is an error.
    pub async fn fix_message_inconsistencies(
        &self,
        context: &Context,
        options: &RunningOptions,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, ReconcileError> {
        info!(?options, "Starting message inconsistencies reconciliation");

        let outcome = match self
            .fix_imap_uid_inconsistencies(context, options, cancel)
            .await?
        {
            RunOutcome::Completed => {
                self.fix_message_id_inconsistencies(context, options, cancel)
                    .await?
            }
            RunOutcome::Cancelled => RunOutcome::Cancelled,
        };

        let snapshot = context.snapshot();
        info!(
            ?outcome,
            processed_imap_uid_entries = snapshot.processed_imap_uid_entries,
            processed_message_id_entries = snapshot.processed_message_id_entries,
            added = snapshot.added_message_id_entries,
            updated = snapshot.updated_message_id_entries,
            removed = snapshot.removed_message_id_entries,
            errors = snapshot.errors.len(),
            "Message inconsistencies reconciliation finished"
        );
        Ok(outcome)
    }

    /// Forward pass: make the messageId table mirror every imapUid entry.
    pub async fn fix_imap_uid_inconsistencies(
        &self,
        context: &Context,
        options: &RunningOptions,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, ReconcileError> {
        throttled(self.imap_uid_repo.scan_all(), options)
            .take_until(cancel.cancelled())
            .map(|entry| async move {
                let entry = entry.map_err(ReconcileError::ImapUidScan)?;
                context.increment_processed_imap_uid_entries();
                self.fix_imap_uid_entry(entry, context).await;
                Ok::<(), ReconcileError>(())
            })
            .buffer_unordered(options.parallelism())
            .try_for_each(|()| future::ok(()))
            .await?;

        Ok(Self::outcome(cancel))
    }

    /// Reverse pass: drop messageId entries no imapUid entry backs.
    pub async fn fix_message_id_inconsistencies(
        &self,
        context: &Context,
        options: &RunningOptions,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, ReconcileError> {
        throttled(self.message_id_repo.scan_all(), options)
            .take_until(cancel.cancelled())
            .map(|entry| async move {
                let entry = entry.map_err(ReconcileError::MessageIdScan)?;
                context.increment_processed_message_id_entries();
                self.fix_message_id_entry(entry, context).await;
                Ok::<(), ReconcileError>(())
            })
            .buffer_unordered(options.parallelism())
            .try_for_each(|()| future::ok(()))
            .await?;

        Ok(Self::outcome(cancel))
    }

    fn outcome(cancel: &CancellationToken) -> RunOutcome {
        if cancel.is_cancelled() {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Completed
        }
    }

    async fn fix_imap_uid_entry(&self, entry: MessageMetadata, context: &Context) {
        let identity = entry.identity.clone();

        let lookup = self
            .message_id_repo
            .get(&identity.message_id, &identity.mailbox_id)
            .await;
        let message_id_entry = match lookup {
            Ok(found) => found,
            Err(e) => return self.record_error(context, identity, "read messageId entry", &e),
        };

        if detect_inconsistency(&entry, message_id_entry.as_ref()).is_none() {
            return;
        }

        // The scanned row may be stale by now: mirror what the table holds.
        let confirmation = self
            .imap_uid_repo
            .get(&identity.mailbox_id, identity.uid)
            .await;
        let up_to_date = match confirmation {
            Ok(Some(current)) if current.message_id() == identity.message_id => current,
            Ok(_) => {
                debug!(%identity, "imapUid entry moved or expunged concurrently, skipping");
                return;
            }
            Err(e) => return self.record_error(context, identity, "re-read imapUid entry", &e),
        };

        let Some(inconsistency) = detect_inconsistency(&up_to_date, message_id_entry.as_ref())
        else {
            return;
        };

        let written = self
            .with_retries(|| self.message_id_repo.upsert(&up_to_date))
            .await;
        match written {
            Ok(()) => {
                match inconsistency {
                    Inconsistency::MissingMessageIdEntry => {
                        context.record_added(up_to_date.identity.clone());
                        metrics::counter!("message_inconsistencies_fixed_total", "kind" => "add")
                            .increment(1);
                    }
                    Inconsistency::OutdatedMessageIdEntry => {
                        context.record_updated(up_to_date.identity.clone());
                        metrics::counter!("message_inconsistencies_fixed_total", "kind" => "update")
                            .increment(1);
                    }
                }
                debug!(%identity, ?inconsistency, "Fixed messageId entry");
            }
            Err(e) => self.record_error(context, identity, "write messageId entry", &e),
        }
    }

    async fn fix_message_id_entry(&self, entry: MessageMetadata, context: &Context) {
        let identity = entry.identity.clone();

        let lookup = self
            .imap_uid_repo
            .get(&identity.mailbox_id, identity.uid)
            .await;
        let imap_uid_entry = match lookup {
            Ok(found) => found,
            Err(e) => return self.record_error(context, identity, "read imapUid entry", &e),
        };

        if !is_orphan(&entry, imap_uid_entry.as_ref()) {
            return;
        }

        // Only delete what was actually scanned.
        let confirmation = self
            .message_id_repo
            .get(&identity.message_id, &identity.mailbox_id)
            .await;
        match confirmation {
            Ok(Some(current)) if current == entry => {}
            Ok(_) => {
                debug!(%identity, "messageId entry changed concurrently, skipping");
                return;
            }
            Err(e) => return self.record_error(context, identity, "re-read messageId entry", &e),
        }

        let deleted = self
            .with_retries(|| {
                self.message_id_repo
                    .delete(&identity.message_id, &identity.mailbox_id)
            })
            .await;
        match deleted {
            Ok(()) => {
                debug!(%identity, "Removed orphan messageId entry");
                metrics::counter!("message_inconsistencies_fixed_total", "kind" => "remove")
                    .increment(1);
                context.record_removed(identity);
            }
            Err(e) => self.record_error(context, identity, "delete orphan messageId entry", &e),
        }
    }

    async fn with_retries<F, Fut>(&self, mut operation: F) -> StoreResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<()>>,
    {
        let mut backoff = self.retry_policy.initial_backoff;
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retry_policy.max_attempts => {
                    debug!(attempt, error = %e, "Store write failed, retrying");
                    self.time_service.sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn record_error(
        &self,
        context: &Context,
        identity: MessageIdentity,
        action: &str,
        error: &StoreError,
    ) {
        warn!(
            mailbox_id = %identity.mailbox_id,
            message_id = %identity.message_id,
            uid = identity.uid.as_u64(),
            error = %error,
            "Failed to {}",
            action
        );
        metrics::counter!("message_inconsistencies_errors_total").increment(1);
        context.add_error(identity);
    }
}
