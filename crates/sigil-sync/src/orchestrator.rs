//! The watermark-driven sync state machine.
//!
//! One orchestrator per login session.  A round fetches change records
//! newer than the owner's watermark, hydrates every referenced blob in
//! parallel, writes the results through the store and search index, and
//! advances the watermark to the timestamp captured at round start — a
//! change landing *during* the round is therefore picked up by the next
//! one.  Any failure before that final step leaves the watermark untouched;
//! there is no in-call retry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use sigil_search::{MessageIndexEntry, SearchIndexSession};
use sigil_shared::crypto::{decrypt_record, encrypt_record};
use sigil_shared::{unix_ms_now, Cid, Conversation, Message, OwnerAddress, SessionKey};
use sigil_store::{Database, MessageCacheEntry, StoreError, StoredConversation};

use crate::error::Result;
use crate::remote::{BlobClient, ChainEvent, ConversationChange, EventIndexClient, MessageChange};

/// Precomputed keyword delta as stored in a search-delta blob.
type SearchDelta = HashMap<String, MessageIndexEntry>;

/// Result of one `sync` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another round was already in progress; this call did nothing.
    Skipped,
    /// A chain event referenced a message the cache already has in full.
    UpToDate,
    /// The remote had nothing newer than the watermark.
    NoChanges,
    /// A round ran to completion.
    Completed {
        conversations: usize,
        messages: usize,
    },
}

/// Mutable-metadata blob overlaid on the immutable conversation record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationMetadata {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    is_deleted: Option<bool>,
    #[serde(default)]
    last_updated_at: Option<i64>,
    #[serde(default)]
    last_message_created_at: Option<i64>,
    #[serde(default)]
    last_message_preview: Option<String>,
}

struct HydratedConversation {
    conversation: Conversation,
    messages: Vec<Message>,
    deltas: Vec<SearchDelta>,
}

pub struct SyncOrchestrator<E, B> {
    event_index: E,
    blobs: B,
    db: Arc<Mutex<Database>>,
    search: Arc<SearchIndexSession>,
    page_size: u32,
    /// Re-entrancy guard: a concurrent sync for this orchestrator is
    /// skipped, not queued.
    syncing: AtomicBool,
}

impl<E: EventIndexClient, B: BlobClient> SyncOrchestrator<E, B> {
    pub fn new(
        event_index: E,
        blobs: B,
        db: Arc<Mutex<Database>>,
        search: Arc<SearchIndexSession>,
        page_size: u32,
    ) -> Self {
        Self {
            event_index,
            blobs,
            db,
            search,
            page_size,
            syncing: AtomicBool::new(false),
        }
    }

    /// Run one sync round for the owner.
    ///
    /// Errors are logged here (the top of the round) and returned;
    /// the watermark only moves on success.
    pub async fn sync(&self, key: &SessionKey, owner: &OwnerAddress) -> Result<SyncOutcome> {
        if self.syncing.swap(true, Ordering::SeqCst) {
            tracing::debug!(owner = %owner.short(), "sync already in progress, skipping");
            return Ok(SyncOutcome::Skipped);
        }
        let _guard = SyncGuard {
            flag: &self.syncing,
        };

        let result = self.run_round(key, owner).await;
        if let Err(e) = &result {
            tracing::error!(
                owner = %owner.short(),
                error = %e,
                "sync round failed, watermark unchanged"
            );
        }
        result
    }

    /// React to a live on-chain message-finalization event: trigger a full
    /// round iff the message is absent from the cache or still pending.
    pub async fn handle_chain_event(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        event: &ChainEvent,
    ) -> Result<SyncOutcome> {
        if !self.needs_resync(key, owner, event)? {
            return Ok(SyncOutcome::UpToDate);
        }
        tracing::debug!(
            conversation = %event.conversation_id,
            message = %event.message_id,
            "chain event for unfetched message, triggering sync"
        );
        self.sync(key, owner).await
    }

    /// True when the event's message is not cached in final form: cache
    /// miss, unreadable cache entry, unknown message id, or a message
    /// still awaiting content.
    fn needs_resync(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        event: &ChainEvent,
    ) -> Result<bool> {
        let db = self.db.lock().expect("database lock");
        let entry = match db.get_message_cache(owner, &event.conversation_id) {
            Ok(entry) => entry,
            Err(StoreError::NotFound) => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        let messages: Vec<Message> = match decrypt_record(key, &entry.sealed_messages) {
            Ok(messages) => messages,
            Err(_) => return Ok(true),
        };

        Ok(match messages.iter().find(|m| m.id == event.message_id) {
            None => true,
            Some(message) => message.content.is_none(),
        })
    }

    async fn run_round(&self, key: &SessionKey, owner: &OwnerAddress) -> Result<SyncOutcome> {
        let round_started_at = unix_ms_now();
        let watermark = {
            let db = self.db.lock().expect("database lock");
            db.get_checkpoints(owner)?.conversations_last_synced_at
        };

        // Page through everything newer than the watermark.
        let mut changes: Vec<ConversationChange> = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .event_index
                .changed_conversations(owner, watermark, self.page_size, offset)
                .await?;
            let page_len = page.len() as u32;
            changes.extend(page);
            if page_len < self.page_size {
                break;
            }
            offset += self.page_size;
        }

        if changes.is_empty() {
            // Nothing changed; move the watermark up so an idle account
            // does not re-query the same empty window forever.
            self.advance_watermark(owner, unix_ms_now())?;
            tracing::debug!(owner = %owner.short(), "sync found no changes");
            return Ok(SyncOutcome::NoChanges);
        }

        tracing::info!(
            owner = %owner.short(),
            changed = changes.len(),
            watermark,
            "sync round hydrating changes"
        );

        // Hydrate all conversations in parallel; failed items degrade to
        // absent instead of aborting the round.
        let hydrated: Vec<HydratedConversation> = futures::future::join_all(
            changes
                .iter()
                .map(|change| self.hydrate_conversation(key, owner, change)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        let conversation_count = hydrated.len();
        let message_count = hydrated.iter().map(|h| h.messages.len()).sum();

        // Write-through: conversations first, then each message list into
        // the cache (which refreshes recency and re-checks the bound).
        let mut deltas: Vec<SearchDelta> = Vec::new();
        {
            let mut db = self.db.lock().expect("database lock");

            let stored: Vec<StoredConversation> = hydrated
                .iter()
                .map(|h| {
                    Ok(StoredConversation {
                        owner_address: owner.clone(),
                        id: h.conversation.id.clone(),
                        sealed_record: encrypt_record(key, &h.conversation)?,
                    })
                })
                .collect::<Result<_>>()?;
            db.bulk_upsert_conversations(&stored)?;

            for h in &hydrated {
                // A metadata-only change (rename, tombstone) hydrates no
                // messages; writing the empty list would clobber cached
                // history that the watermark will never re-fetch.
                if h.messages.is_empty() {
                    continue;
                }
                db.put_message_cache(&MessageCacheEntry {
                    owner_address: owner.clone(),
                    conversation_id: h.conversation.id.clone(),
                    sealed_messages: encrypt_record(key, &h.messages)?,
                    last_accessed_at: unix_ms_now(),
                })?;
            }
        }
        for h in hydrated {
            deltas.extend(h.deltas);
        }

        {
            let db = self.db.lock().expect("database lock");
            self.search.merge_deltas(&db, key, deltas)?;
        }

        // The round-start timestamp, not "now": a change that landed while
        // we were hydrating stays ahead of the watermark.
        self.advance_watermark(owner, round_started_at)?;

        tracing::info!(
            owner = %owner.short(),
            conversations = conversation_count,
            messages = message_count,
            "sync round completed"
        );
        Ok(SyncOutcome::Completed {
            conversations: conversation_count,
            messages: message_count,
        })
    }

    /// Advance both watermarks, never moving them backwards.
    fn advance_watermark(&self, owner: &OwnerAddress, to: i64) -> Result<()> {
        let db = self.db.lock().expect("database lock");
        let mut checkpoints = db.get_checkpoints(owner)?;
        checkpoints.conversations_last_synced_at = checkpoints.conversations_last_synced_at.max(to);
        checkpoints.search_last_synced_at = checkpoints.search_last_synced_at.max(to);
        db.put_checkpoints(owner, &checkpoints)?;
        Ok(())
    }

    /// Hydrate one changed conversation: the conversation blob, its
    /// metadata overlay, and every changed message (plus search delta) are
    /// fetched in parallel.  Returns `None` when the conversation content
    /// itself is unavailable.
    async fn hydrate_conversation(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        change: &ConversationChange,
    ) -> Option<HydratedConversation> {
        let (base, metadata, message_results) = tokio::join!(
            self.fetch_sealed::<Conversation>(key, &change.conversation_cid),
            self.fetch_sealed::<ConversationMetadata>(key, &change.conversation_metadata_cid),
            futures::future::join_all(
                change
                    .messages
                    .iter()
                    .map(|message| self.fetch_message(key, message)),
            ),
        );

        let mut conversation = match base {
            Some(conversation) => conversation,
            None => {
                tracing::warn!(
                    conversation = %change.id,
                    "conversation blob unavailable, dropped from this round"
                );
                return None;
            }
        };
        conversation.owner_address = owner.clone();

        if let Some(metadata) = metadata {
            apply_metadata(&mut conversation, metadata);
        }

        let mut messages = Vec::new();
        let mut deltas = Vec::new();
        for (message, delta) in message_results.into_iter().flatten() {
            messages.push(message);
            if let Some(delta) = delta {
                deltas.push(delta);
            }
        }
        messages.sort_by_key(|m| m.created_at);

        Some(HydratedConversation {
            conversation,
            messages,
            deltas,
        })
    }

    /// Fetch one message blob and, when referenced, its search delta.
    /// Either blob failing degrades to absent.
    async fn fetch_message(
        &self,
        key: &SessionKey,
        change: &MessageChange,
    ) -> Option<(Message, Option<SearchDelta>)> {
        let delta_cid = change.search_delta.as_ref().map(|r| &r.search_delta_cid);

        let (message, delta) = tokio::join!(
            self.fetch_sealed::<Message>(key, &change.message_cid),
            async {
                match delta_cid {
                    Some(cid) => self.fetch_sealed::<SearchDelta>(key, cid).await,
                    None => None,
                }
            },
        );

        Some((message?, delta))
    }

    /// Fetch and decrypt one blob; any failure is logged and reported as
    /// absent so a single bad record never aborts its siblings.
    async fn fetch_sealed<T: DeserializeOwned>(&self, key: &SessionKey, cid: &Cid) -> Option<T> {
        match self.blobs.fetch(cid).await {
            Ok(Some(sealed)) => match decrypt_record(key, &sealed) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(cid = %cid, error = %e, "blob failed to decrypt, treating as absent");
                    None
                }
            },
            Ok(None) => {
                tracing::debug!(cid = %cid, "blob not found");
                None
            }
            Err(e) => {
                tracing::warn!(cid = %cid, error = %e, "blob fetch failed, treating as absent");
                None
            }
        }
    }
}

fn apply_metadata(conversation: &mut Conversation, metadata: ConversationMetadata) {
    if let Some(title) = metadata.title {
        conversation.title = title;
    }
    if let Some(is_deleted) = metadata.is_deleted {
        conversation.is_deleted = is_deleted;
    }
    if let Some(last_updated_at) = metadata.last_updated_at {
        conversation.last_updated_at = last_updated_at;
    }
    if let Some(ts) = metadata.last_message_created_at {
        conversation.last_message_created_at = Some(ts);
    }
    if let Some(preview) = metadata.last_message_preview {
        conversation.last_message_preview = Some(preview);
    }
}

/// Clears the in-progress flag when a round exits, error paths included.
struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
