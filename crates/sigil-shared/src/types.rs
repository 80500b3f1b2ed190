use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Wallet address of the owning user.  The partition key for every local
/// record; normalized to lowercase so key derivation and storage keys are
/// insensitive to checksum casing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OwnerAddress(String);

impl OwnerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn short(&self) -> String {
        self.0.chars().take(10).collect()
    }
}

impl std::fmt::Display for OwnerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Time-derived stable id: unix ms plus a short random suffix so two
    /// conversations created in the same millisecond never collide.
    pub fn generate() -> Self {
        Self(generate_time_id())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(generate_time_id())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content identifier addressing an immutable encrypted blob in
/// decentralized storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Cid(pub String);

impl std::fmt::Display for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn generate_time_id() -> String {
    let mut suffix = [0u8; 2];
    rand::rngs::OsRng.fill_bytes(&mut suffix);
    format!("{}-{}", unix_ms_now(), hex::encode(suffix))
}

/// Current wall-clock time in unix milliseconds, the timestamp unit used
/// across all records and sync watermarks.
pub fn unix_ms_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// One chat thread.  Persisted locally only as ciphertext; this decrypted
/// view exists in memory for the lifetime of an operation.
///
/// Field names serialize camelCase: the same JSON shape round-trips through
/// the remote blob storage written by other clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub owner_address: OwnerAddress,
    pub created_at: i64,
    pub title: String,
    /// Soft-delete tombstone; conversations are never hard-deleted locally.
    #[serde(default)]
    pub is_deleted: bool,
    pub last_updated_at: i64,
    /// Timestamp of the newest message, `None` for an empty thread.
    #[serde(default)]
    pub last_message_created_at: Option<i64>,
    /// Plaintext snippet shown in the thread list.
    #[serde(default)]
    pub last_message_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branched_from_conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branched_at_message_id: Option<MessageId>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One step of assistant reasoning, streamed in while a reply is pending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningStep {
    pub title: String,
    pub description: String,
}

/// A cited source attached to an assistant reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceLink {
    pub title: String,
    pub url: String,
}

/// One conversation turn.  `parent_id` links messages into a tree so edits
/// and branches can fork history without rewriting it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
    pub role: Role,
    /// `None` on an assistant message means "still generating".
    pub content: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub reasoning: Vec<ReasoningStep>,
    #[serde(default)]
    pub reasoning_duration: Option<i64>,
    #[serde(default)]
    pub sources: Vec<SourceLink>,
}

impl Message {
    /// An assistant message whose content has not arrived yet.
    pub fn is_pending(&self) -> bool {
        self.role == Role::Assistant && self.content.is_none()
    }
}
