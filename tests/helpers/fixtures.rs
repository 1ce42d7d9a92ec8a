use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use message_inconsistencies::application::services::{
    Context, RetryPolicy, RunOutcome, RunningOptions, SolveMessageInconsistenciesService,
};
use message_inconsistencies::domain::entities::{
    MailboxId, MessageFlags, MessageId, MessageIdentity, MessageMetadata, MessageUid, ModSeq,
};
use message_inconsistencies::domain::errors::ReconcileError;
use message_inconsistencies::domain::ports::time_service::TimeService;
use message_inconsistencies::infrastructure::persistence::InMemoryMessageTables;

pub const M1: &str = "464765a0-e4e7-11e4-aba4-710c1de3782b";
pub const M2: &str = "551f0580-82fb-11ea-970e-f9c83d4cf8c2";
pub const X: &str = "d2bee791-7e63-11ea-883c-95b84008f979";
pub const Y: &str = "ffffffff-7e63-11ea-883c-95b84008f979";

pub fn mailbox(raw: &str) -> MailboxId {
    raw.parse().expect("valid mailbox id")
}

pub fn message(raw: &str) -> MessageId {
    raw.parse().expect("valid message id")
}

pub fn identity(mailbox_id: MailboxId, message_id: MessageId, uid: u64) -> MessageIdentity {
    MessageIdentity::new(mailbox_id, message_id, MessageUid::of(uid))
}

pub fn entry(mailbox_id: MailboxId, message_id: MessageId, uid: u64) -> MessageMetadata {
    MessageMetadata::new(
        identity(mailbox_id, message_id, uid),
        ModSeq::of(uid),
        MessageFlags::empty(),
    )
}

pub fn entry_with(
    mailbox_id: MailboxId,
    message_id: MessageId,
    uid: u64,
    mod_seq: u64,
    flags: MessageFlags,
) -> MessageMetadata {
    MessageMetadata::new(
        identity(mailbox_id, message_id, uid),
        ModSeq::of(mod_seq),
        flags,
    )
}

/// Clock frozen at a fixed instant whose sleeps return immediately.
#[derive(Default)]
pub struct FrozenTimeService {
    sleeps: AtomicU64,
}

impl FrozenTimeService {
    pub const NOW: &'static str = "2007-12-03T10:15:30Z";

    pub fn sleeps(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeService for FrozenTimeService {
    async fn sleep(&self, _duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }

    fn now(&self) -> DateTime<Utc> {
        Self::NOW.parse().expect("valid timestamp")
    }
}

pub fn service_for(tables: &InMemoryMessageTables) -> Arc<SolveMessageInconsistenciesService> {
    service_with_clock(tables, Arc::new(FrozenTimeService::default()))
}

pub fn service_with_clock(
    tables: &InMemoryMessageTables,
    time_service: Arc<FrozenTimeService>,
) -> Arc<SolveMessageInconsistenciesService> {
    Arc::new(
        SolveMessageInconsistenciesService::new(
            Arc::new(tables.imap_uid_repository()),
            Arc::new(tables.message_id_repository()),
            time_service,
        )
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        }),
    )
}

/// Runs one full reconciliation with default options.
pub async fn reconcile(
    service: &SolveMessageInconsistenciesService,
) -> (Result<RunOutcome, ReconcileError>, Context) {
    reconcile_with(service, &RunningOptions::default()).await
}

pub async fn reconcile_with(
    service: &SolveMessageInconsistenciesService,
    options: &RunningOptions,
) -> (Result<RunOutcome, ReconcileError>, Context) {
    let context = Context::new();
    let outcome = service
        .fix_message_inconsistencies(&context, options, &CancellationToken::new())
        .await;
    (outcome, context)
}

/// Every imapUid row is mirrored exactly and every messageId row is backed by
/// the imapUid row it points at.
pub fn assert_tables_consistent(tables: &InMemoryMessageTables) {
    let imap_uid_entries = tables.imap_uid_entries();
    let message_id_entries = tables.message_id_entries();

    for primary in &imap_uid_entries {
        let secondary = tables
            .message_id_entry(&primary.message_id(), &primary.mailbox_id())
            .unwrap_or_else(|| panic!("missing messageId entry for {}", primary.identity));
        assert!(
            secondary.mirrors(primary),
            "messageId entry {:?} does not mirror {:?}",
            secondary,
            primary
        );
    }

    for secondary in &message_id_entries {
        let backed = imap_uid_entries.iter().any(|primary| {
            primary.mailbox_id() == secondary.mailbox_id()
                && primary.uid() == secondary.uid()
                && primary.message_id() == secondary.message_id()
        });
        assert!(backed, "orphan messageId entry {}", secondary.identity);
    }
}
