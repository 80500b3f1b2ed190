//! Row structs persisted in the local database.
//!
//! Everything sensitive is a sealed (encrypted) string produced by
//! `sigil-shared`'s record codec; this crate stores and retrieves it
//! opaquely.

use serde::{Deserialize, Serialize};
use sigil_shared::{ConversationId, OwnerAddress};

/// A sealed conversation record, one per (owner, conversation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredConversation {
    pub owner_address: OwnerAddress,
    pub id: ConversationId,
    /// Opaque ciphertext of the [`sigil_shared::Conversation`] record.
    pub sealed_record: String,
}

/// A cached, sealed full message list for one conversation.
///
/// This is a cache, not a source of truth: a missing row means "not yet
/// fetched", never "empty conversation".  At most
/// [`sigil_shared::constants::MESSAGE_CACHE_LIMIT`] rows exist per owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCacheEntry {
    pub owner_address: OwnerAddress,
    pub conversation_id: ConversationId,
    /// Opaque ciphertext of the serialized `Vec<Message>`.
    pub sealed_messages: String,
    /// Unix ms of the last read or write; drives eviction.
    pub last_accessed_at: i64,
}

/// The sealed per-owner search index record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSearchIndex {
    pub owner_address: OwnerAddress,
    pub sealed_index: String,
}

/// Per-owner sync watermarks.
///
/// An explicit struct with defined defaults, decoded and encoded as a
/// whole.  Watermarks are monotonically non-decreasing and advanced only
/// after a sync round completes successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoints {
    /// Everything before this has been reconciled into local conversations.
    pub conversations_last_synced_at: i64,
    /// Everything before this has been merged into the search index.
    pub search_last_synced_at: i64,
}

impl Default for SyncCheckpoints {
    fn default() -> Self {
        Self {
            conversations_last_synced_at: 0,
            search_last_synced_at: 0,
        }
    }
}
