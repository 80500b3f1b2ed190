//! Contracts for the three remote collaborators.
//!
//! The orchestrator is generic over these traits so the whole sync flow is
//! testable against in-memory fakes; the production implementations live in
//! [`crate::http`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sigil_shared::{Cid, ConversationId, MessageId, OwnerAddress};

use crate::error::RemoteError;

/// One changed conversation as reported by the event-indexing service,
/// carrying content ids for everything that needs hydration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationChange {
    pub id: ConversationId,
    /// Immutable conversation content blob.
    pub conversation_cid: Cid,
    /// Mutable metadata blob (title, tombstone, preview).
    pub conversation_metadata_cid: Cid,
    pub last_message_created_at: i64,
    #[serde(default)]
    pub messages: Vec<MessageChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageChange {
    pub id: MessageId,
    pub message_cid: Cid,
    #[serde(default)]
    pub search_delta: Option<SearchDeltaRef>,
}

/// Reference to a precomputed search-keyword delta blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchDeltaRef {
    pub id: String,
    pub search_delta_cid: Cid,
}

/// A message-finalization event from the live on-chain feed.  The sync
/// layer only inspects the ids; the payload is not interpreted further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub message_cid: Cid,
}

/// The event-indexing (graph-style) query API.
#[async_trait]
pub trait EventIndexClient: Send + Sync {
    /// Change records for `owner` strictly newer than `updated_after`,
    /// ordered by `last_message_created_at` descending, paged by
    /// `limit`/`offset`.
    async fn changed_conversations(
        &self,
        owner: &OwnerAddress,
        updated_after: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationChange>, RemoteError>;
}

/// Content-addressed blob storage.
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Fetch the opaque encrypted string behind a content id.
    /// `Ok(None)` means the blob does not exist (yet).
    async fn fetch(&self, cid: &Cid) -> Result<Option<String>, RemoteError>;
}
