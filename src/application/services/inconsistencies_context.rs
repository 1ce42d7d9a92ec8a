//! Run-scoped progress accounting for message inconsistency reconciliation.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::entities::MessageIdentity;

/// Thread-safe accumulator shared by every worker of one reconciliation run.
///
/// Counters only ever grow. Nothing here can fail. Every update and every
/// snapshot goes through the same lock, so a fix counter and the matching
/// `fixed_inconsistencies` entry are never observed apart.
#[derive(Debug, Default)]
pub struct Context {
    state: Mutex<Snapshot>,
}

/// Immutable copy of a [`Context`] taken at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub processed_imap_uid_entries: u64,
    pub processed_message_id_entries: u64,
    pub added_message_id_entries: u64,
    pub updated_message_id_entries: u64,
    pub removed_message_id_entries: u64,
    pub fixed_inconsistencies: Vec<MessageIdentity>,
    pub errors: Vec<MessageIdentity>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Snapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increment_processed_imap_uid_entries(&self) {
        self.state().processed_imap_uid_entries += 1;
    }

    pub fn increment_processed_message_id_entries(&self) {
        self.state().processed_message_id_entries += 1;
    }

    /// A missing messageId entry was written.
    pub fn record_added(&self, identity: MessageIdentity) {
        let mut state = self.state();
        state.added_message_id_entries += 1;
        state.fixed_inconsistencies.push(identity);
    }

    /// An outdated messageId entry was overwritten.
    pub fn record_updated(&self, identity: MessageIdentity) {
        let mut state = self.state();
        state.updated_message_id_entries += 1;
        state.fixed_inconsistencies.push(identity);
    }

    /// An orphan messageId entry was deleted.
    pub fn record_removed(&self, identity: MessageIdentity) {
        let mut state = self.state();
        state.removed_message_id_entries += 1;
        state.fixed_inconsistencies.push(identity);
    }

    pub fn add_error(&self, identity: MessageIdentity) {
        self.state().errors.push(identity);
    }

    /// Copies every counter and collection; later mutation never shows through.
    pub fn snapshot(&self) -> Snapshot {
        self.state().clone()
    }
}

impl Snapshot {
    /// Number of fixes applied, regardless of their kind.
    pub fn total_fixed(&self) -> u64 {
        self.added_message_id_entries
            + self.updated_message_id_entries
            + self.removed_message_id_entries
    }
}
