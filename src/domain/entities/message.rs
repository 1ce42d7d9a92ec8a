use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a mailbox container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MailboxId(Uuid);

impl MailboxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Store-native string encoding.
    pub fn serialize(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for MailboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for MailboxId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Globally unique message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Store-native string encoding.
    pub fn serialize(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Mailbox-local, monotonically increasing sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageUid(u64);

impl MessageUid {
    pub const fn of(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModSeq(u64);

impl ModSeq {
    pub const fn of(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Ordered set of system and user flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageFlags(BTreeSet<String>);

impl MessageFlags {
    pub const SEEN: &'static str = "\\Seen";
    pub const FLAGGED: &'static str = "\\Flagged";

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, flag: impl Into<String>) -> Self {
        self.0.insert(flag.into());
        self
    }

    /// Space separated storage encoding. Flag names never contain whitespace.
    pub fn encode(&self) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(" ")
    }

    pub fn decode(raw: &str) -> Self {
        Self(raw.split_whitespace().map(str::to_string).collect())
    }
}

/// Identifies one message instance within one mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageIdentity {
    pub mailbox_id: MailboxId,
    pub message_id: MessageId,
    pub uid: MessageUid,
}

impl MessageIdentity {
    pub fn new(mailbox_id: MailboxId, message_id: MessageId, uid: MessageUid) -> Self {
        Self {
            mailbox_id,
            message_id,
            uid,
        }
    }
}

impl fmt::Display for MessageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.mailbox_id, self.message_id, self.uid)
    }
}

/// A row of either metadata table.
///
/// The per-mailbox table keys it by `(mailbox_id, uid)` and is authoritative.
/// The per-message table keys it by `(message_id, mailbox_id)` and mirrors
/// `uid`, `mod_seq` and `flags` of the authoritative row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub identity: MessageIdentity,
    pub mod_seq: ModSeq,
    pub flags: MessageFlags,
}

impl MessageMetadata {
    pub fn new(identity: MessageIdentity, mod_seq: ModSeq, flags: MessageFlags) -> Self {
        Self {
            identity,
            mod_seq,
            flags,
        }
    }

    pub fn mailbox_id(&self) -> MailboxId {
        self.identity.mailbox_id
    }

    pub fn message_id(&self) -> MessageId {
        self.identity.message_id
    }

    pub fn uid(&self) -> MessageUid {
        self.identity.uid
    }

    /// True when `self`, read from the per-message table, mirrors `authoritative`.
    pub fn mirrors(&self, authoritative: &MessageMetadata) -> bool {
        self.identity == authoritative.identity
            && self.mod_seq == authoritative.mod_seq
            && self.flags == authoritative.flags
    }
}
