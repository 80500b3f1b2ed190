//! The conversation data service.
//!
//! Every operation follows the same shape: decrypt, mutate in memory,
//! re-encrypt, persist whole records, then reflect the change in the live
//! search index.  Writes are whole-record replaces, so a failed
//! re-encryption leaves the prior record intact.
//!
//! Ordering within one call: the message-cache write happens before the
//! conversation record update, which happens before the search-index
//! update.  A caller that awaited `add_message` may rely on the message
//! existing in the cache.

use std::sync::{Arc, Mutex};

use sigil_search::SearchIndexSession;
use sigil_shared::crypto::{decrypt_record, encrypt_record};
use sigil_shared::{
    unix_ms_now, Conversation, ConversationId, Message, MessageId, OwnerAddress, Role, SessionKey,
};
use sigil_store::{Database, MessageCacheEntry, StoreError, StoredConversation};
use tokio::sync::mpsc;

use crate::error::{Result, ServiceError};
use crate::events::ResponseEvent;

/// Conversation titles derived from the first message are capped here.
const DERIVED_TITLE_MAX_CHARS: usize = 60;

/// A freshly written user turn: the user message plus its paired pending
/// assistant placeholder.  The placeholder's id is what the response
/// generator addresses its events to.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub conversation: Conversation,
    pub user_message: Message,
    pub assistant_message: Message,
}

pub struct ConversationDataService {
    db: Arc<Mutex<Database>>,
    search: Arc<SearchIndexSession>,
}

impl ConversationDataService {
    pub fn new(db: Arc<Mutex<Database>>, search: Arc<SearchIndexSession>) -> Self {
        Self { db, search }
    }

    /// All live (non-tombstoned) conversations for the owner, newest
    /// activity first.  A record that fails to decrypt is logged and
    /// skipped; it does not poison the rest of the list.
    pub async fn list_conversations(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
    ) -> Result<Vec<Conversation>> {
        let stored = {
            let db = self.db.lock().expect("database lock");
            db.list_conversations(owner)?
        };

        let mut conversations: Vec<Conversation> = stored
            .iter()
            .filter_map(|record| match decrypt_record(key, &record.sealed_record) {
                Ok(conversation) => Some(conversation),
                Err(e) => {
                    tracing::warn!(
                        conversation = %record.id,
                        error = %e,
                        "conversation record unreadable, skipping"
                    );
                    None
                }
            })
            .filter(|c: &Conversation| !c.is_deleted)
            .collect();

        // Threads with no messages yet sort last.
        conversations.sort_by_key(|c| std::cmp::Reverse(c.last_message_created_at.unwrap_or(0)));
        Ok(conversations)
    }

    /// Cache-only read.  An empty result means "not cached", never
    /// "empty conversation"; the caller decides whether to trigger a sync.
    pub async fn get_messages(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>> {
        let entry = {
            let db = self.db.lock().expect("database lock");
            match db.get_message_cache(owner, conversation_id) {
                Ok(entry) => entry,
                Err(StoreError::NotFound) => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            }
        };

        match decrypt_record(key, &entry.sealed_messages) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                tracing::warn!(
                    conversation = %conversation_id,
                    error = %e,
                    "cached message list unreadable, treating as uncached"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Start a new thread from the user's first message.  Writes the user
    /// message and a pending assistant placeholder, titles the thread from
    /// the message content, and seeds the live search index.
    pub async fn create_conversation(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        content: &str,
    ) -> Result<PendingTurn> {
        let now = unix_ms_now();
        let conversation_id = ConversationId::generate();

        let user_message = Message {
            id: MessageId::generate(),
            conversation_id: conversation_id.clone(),
            parent_id: None,
            role: Role::User,
            content: Some(content.to_string()),
            created_at: now,
            reasoning: Vec::new(),
            reasoning_duration: None,
            sources: Vec::new(),
        };
        let assistant_message = pending_assistant(&conversation_id, &user_message.id, now);

        let conversation = Conversation {
            id: conversation_id,
            owner_address: owner.clone(),
            created_at: now,
            title: derive_title(content),
            is_deleted: false,
            last_updated_at: now,
            last_message_created_at: Some(now),
            // A pending placeholder previews its parent's content.
            last_message_preview: Some(content.to_string()),
            branched_from_conversation_id: None,
            branched_at_message_id: None,
        };

        let messages = vec![user_message.clone(), assistant_message.clone()];
        self.persist_turn(key, owner, &conversation, &messages)?;
        self.search.apply_live_delta(&user_message, &conversation);

        tracing::debug!(
            owner = %owner.short(),
            conversation = %conversation.id,
            "conversation created"
        );
        Ok(PendingTurn {
            conversation,
            user_message,
            assistant_message,
        })
    }

    /// Append a user message and its pending assistant placeholder to an
    /// existing thread.  The stored cache record is replaced wholesale.
    pub async fn add_message(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
        content: &str,
    ) -> Result<PendingTurn> {
        let mut conversation = self.load_conversation(key, owner, conversation_id)?;
        let mut messages = self.load_cached_or_empty(key, owner, conversation_id)?;

        let now = unix_ms_now();
        let parent_id = messages.last().map(|m| m.id.clone());
        let user_message = Message {
            id: MessageId::generate(),
            conversation_id: conversation_id.clone(),
            parent_id,
            role: Role::User,
            content: Some(content.to_string()),
            created_at: now,
            reasoning: Vec::new(),
            reasoning_duration: None,
            sources: Vec::new(),
        };
        let assistant_message = pending_assistant(conversation_id, &user_message.id, now);

        messages.push(user_message.clone());
        messages.push(assistant_message.clone());

        conversation.last_updated_at = now;
        conversation.last_message_created_at = Some(now);
        conversation.last_message_preview = Some(content.to_string());

        self.persist_turn(key, owner, &conversation, &messages)?;
        self.search.apply_live_delta(&user_message, &conversation);

        Ok(PendingTurn {
            conversation,
            user_message,
            assistant_message,
        })
    }

    /// Edit a previously sent user message.  History is never rewritten:
    /// the edit forks the tree by appending a new user message that shares
    /// the edited message's parent, plus a fresh placeholder.
    pub async fn edit_user_message(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        new_content: &str,
    ) -> Result<PendingTurn> {
        let mut conversation = self.load_conversation(key, owner, conversation_id)?;
        let mut messages = self.load_cached_messages(key, owner, conversation_id)?;

        let edited = messages
            .iter()
            .find(|m| &m.id == message_id && m.role == Role::User)
            .ok_or(ServiceError::NotFound)?;
        let fork_parent = edited.parent_id.clone();

        let now = unix_ms_now();
        let user_message = Message {
            id: MessageId::generate(),
            conversation_id: conversation_id.clone(),
            parent_id: fork_parent,
            role: Role::User,
            content: Some(new_content.to_string()),
            created_at: now,
            reasoning: Vec::new(),
            reasoning_duration: None,
            sources: Vec::new(),
        };
        let assistant_message = pending_assistant(conversation_id, &user_message.id, now);

        messages.push(user_message.clone());
        messages.push(assistant_message.clone());

        conversation.last_updated_at = now;
        conversation.last_message_created_at = Some(now);
        conversation.last_message_preview = Some(new_content.to_string());

        self.persist_turn(key, owner, &conversation, &messages)?;
        self.search.apply_live_delta(&user_message, &conversation);

        Ok(PendingTurn {
            conversation,
            user_message,
            assistant_message,
        })
    }

    /// Request a new answer for an already-answered turn: appends a fresh
    /// pending placeholder as a sibling of the previous assistant message.
    pub async fn regenerate(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
        assistant_message_id: &MessageId,
    ) -> Result<Message> {
        let mut conversation = self.load_conversation(key, owner, conversation_id)?;
        let mut messages = self.load_cached_messages(key, owner, conversation_id)?;

        let previous = messages
            .iter()
            .find(|m| &m.id == assistant_message_id && m.role == Role::Assistant)
            .ok_or(ServiceError::NotFound)?;
        let parent_id = previous.parent_id.clone();

        // The placeholder previews its parent user message, not null.
        let parent_content = parent_id
            .as_ref()
            .and_then(|pid| messages.iter().find(|m| &m.id == pid))
            .and_then(|m| m.content.clone());

        let now = unix_ms_now();
        let replacement = Message {
            id: MessageId::generate(),
            conversation_id: conversation_id.clone(),
            parent_id,
            role: Role::Assistant,
            content: None,
            created_at: now,
            reasoning: Vec::new(),
            reasoning_duration: None,
            sources: Vec::new(),
        };
        messages.push(replacement.clone());

        conversation.last_updated_at = now;
        conversation.last_message_created_at = Some(now);
        if let Some(preview) = parent_content {
            conversation.last_message_preview = Some(preview);
        }

        self.persist_turn(key, owner, &conversation, &messages)?;
        Ok(replacement)
    }

    /// Rename a thread.  Fails with [`ServiceError::NotFound`] when no
    /// record exists; there is nothing to mutate.
    pub async fn rename_conversation(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
        title: &str,
    ) -> Result<Conversation> {
        let mut conversation = self.load_conversation(key, owner, conversation_id)?;
        conversation.title = title.to_string();
        conversation.last_updated_at = unix_ms_now();

        self.persist_conversation(key, owner, &conversation)?;
        self.search.apply_title_change(&conversation);
        Ok(conversation)
    }

    /// Soft-delete a thread: the record is tombstoned, never erased; the
    /// search entries and cached messages are purged.
    pub async fn delete_conversation(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
    ) -> Result<()> {
        let mut conversation = self.load_conversation(key, owner, conversation_id)?;
        conversation.is_deleted = true;
        conversation.last_updated_at = unix_ms_now();

        self.persist_conversation(key, owner, &conversation)?;
        self.search.remove_conversation(conversation_id);
        {
            let db = self.db.lock().expect("database lock");
            db.delete_message_cache(owner, conversation_id)?;
        }

        tracing::debug!(
            owner = %owner.short(),
            conversation = %conversation_id,
            "conversation tombstoned"
        );
        Ok(())
    }

    /// Fork a thread at a message: the parent chain is walked backwards
    /// from `at_message_id` and the resulting history becomes a new
    /// conversation referencing its origin.  A broken link in the chain
    /// ends the walk early instead of failing.
    pub async fn branch_conversation(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        source_conversation_id: &ConversationId,
        at_message_id: &MessageId,
    ) -> Result<Conversation> {
        let source = self.load_conversation(key, owner, source_conversation_id)?;
        let source_messages = self.load_cached_messages(key, owner, source_conversation_id)?;

        let history = walk_parent_chain(&source_messages, at_message_id);
        if history.is_empty() {
            return Err(ServiceError::NotFound);
        }

        let now = unix_ms_now();
        let conversation_id = ConversationId::generate();

        // Message ids are stable across the fork; only the thread they
        // belong to changes.
        let messages: Vec<Message> = history
            .into_iter()
            .map(|m| Message {
                conversation_id: conversation_id.clone(),
                ..m.clone()
            })
            .collect();

        let last = messages.last().expect("non-empty branch history");
        let conversation = Conversation {
            id: conversation_id,
            owner_address: owner.clone(),
            created_at: now,
            title: source.title.clone(),
            is_deleted: false,
            last_updated_at: now,
            last_message_created_at: Some(last.created_at),
            last_message_preview: last.content.clone(),
            branched_from_conversation_id: Some(source_conversation_id.clone()),
            branched_at_message_id: Some(at_message_id.clone()),
        };

        self.persist_turn(key, owner, &conversation, &messages)?;
        // Copied messages keep their ids, so re-indexing them would steal
        // the origin's content entries; only the new title is indexed.
        self.search.apply_title_change(&conversation);

        tracing::debug!(
            owner = %owner.short(),
            source = %source_conversation_id,
            branch = %conversation.id,
            messages = messages.len(),
            "conversation branched"
        );
        Ok(conversation)
    }

    /// Apply one streamed response event to its pending assistant message.
    /// An event for a conversation whose cache entry is gone (evicted or
    /// never present) is dropped with a warning.
    pub async fn apply_response_event(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        event: ResponseEvent,
    ) -> Result<()> {
        let conversation_id = event.conversation_id().clone();
        let mut messages = match self.load_cached_or_missing(key, owner, &conversation_id)? {
            Some(messages) => messages,
            None => {
                tracing::warn!(
                    conversation = %conversation_id,
                    "response event for uncached conversation, dropped"
                );
                return Ok(());
            }
        };

        match event {
            ResponseEvent::ReasoningStep {
                message_id, step, ..
            } => {
                let Some(message) = messages.iter_mut().find(|m| m.id == message_id) else {
                    tracing::warn!(message = %message_id, "reasoning step for unknown message, dropped");
                    return Ok(());
                };
                message.reasoning.push(step);
                self.persist_cache(key, owner, &conversation_id, &messages)?;
            }
            ResponseEvent::FinalAnswer {
                message_id,
                content,
                reasoning_duration,
                sources,
                ..
            } => {
                let Some(message) = messages.iter_mut().find(|m| m.id == message_id) else {
                    tracing::warn!(message = %message_id, "final answer for unknown message, dropped");
                    return Ok(());
                };
                message.content = Some(content.clone());
                message.reasoning_duration = reasoning_duration;
                message.sources = sources;

                self.persist_cache(key, owner, &conversation_id, &messages)?;

                // The thread now previews the answer instead of the prompt.
                let mut conversation = self.load_conversation(key, owner, &conversation_id)?;
                conversation.last_message_preview = Some(content);
                conversation.last_updated_at = unix_ms_now();
                self.persist_conversation(key, owner, &conversation)?;
            }
        }
        Ok(())
    }

    /// Drain a response-event channel, applying each event in order.
    /// Runs until the sender side is dropped.
    pub async fn run_response_events(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        mut events: mpsc::UnboundedReceiver<ResponseEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.apply_response_event(key, owner, event).await {
                tracing::error!(error = %e, "failed to apply response event");
            }
        }
    }

    // -- persistence helpers ------------------------------------------------

    fn load_conversation(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
    ) -> Result<Conversation> {
        let record = {
            let db = self.db.lock().expect("database lock");
            db.get_conversation(owner, conversation_id)?
        };
        Ok(decrypt_record(key, &record.sealed_record)?)
    }

    /// Cached list for a mutating operation: the record must exist and
    /// must decrypt.
    fn load_cached_messages(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>> {
        self.load_cached_or_missing(key, owner, conversation_id)?
            .ok_or(ServiceError::NotFound)
    }

    /// Cached list for an appending operation: a miss starts from an
    /// empty list (the append does not require prior history).
    fn load_cached_or_empty(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>> {
        Ok(self
            .load_cached_or_missing(key, owner, conversation_id)?
            .unwrap_or_default())
    }

    fn load_cached_or_missing(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
    ) -> Result<Option<Vec<Message>>> {
        let entry = {
            let db = self.db.lock().expect("database lock");
            match db.get_message_cache(owner, conversation_id) {
                Ok(entry) => entry,
                Err(StoreError::NotFound) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        };
        Ok(Some(decrypt_record(key, &entry.sealed_messages)?))
    }

    /// Cache write first, then the conversation record.
    fn persist_turn(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation: &Conversation,
        messages: &[Message],
    ) -> Result<()> {
        self.persist_cache(key, owner, &conversation.id, messages)?;
        self.persist_conversation(key, owner, conversation)
    }

    fn persist_cache(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> Result<()> {
        let sealed_messages = encrypt_record(key, &messages)?;
        let db = self.db.lock().expect("database lock");
        db.put_message_cache(&MessageCacheEntry {
            owner_address: owner.clone(),
            conversation_id: conversation_id.clone(),
            sealed_messages,
            last_accessed_at: unix_ms_now(),
        })?;
        Ok(())
    }

    fn persist_conversation(
        &self,
        key: &SessionKey,
        owner: &OwnerAddress,
        conversation: &Conversation,
    ) -> Result<()> {
        let sealed_record = encrypt_record(key, conversation)?;
        let db = self.db.lock().expect("database lock");
        db.upsert_conversation(&StoredConversation {
            owner_address: owner.clone(),
            id: conversation.id.clone(),
            sealed_record,
        })?;
        Ok(())
    }
}

fn pending_assistant(
    conversation_id: &ConversationId,
    parent_id: &MessageId,
    created_at: i64,
) -> Message {
    Message {
        id: MessageId::generate(),
        conversation_id: conversation_id.clone(),
        parent_id: Some(parent_id.clone()),
        role: Role::Assistant,
        content: None,
        created_at,
        reasoning: Vec::new(),
        reasoning_duration: None,
        sources: Vec::new(),
    }
}

fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return "New conversation".to_string();
    }
    trimmed.chars().take(DERIVED_TITLE_MAX_CHARS).collect()
}

/// Walk `parent_id` links backwards from `from`, returning the visited
/// messages oldest first.  A link to a missing id ends the walk; the
/// prefix gathered so far is still valid history.
fn walk_parent_chain(messages: &[Message], from: &MessageId) -> Vec<Message> {
    let by_id: std::collections::HashMap<&MessageId, &Message> =
        messages.iter().map(|m| (&m.id, m)).collect();

    let mut history = Vec::new();
    let mut cursor = by_id.get(from).copied();
    while let Some(message) = cursor {
        history.push(message.clone());
        cursor = message
            .parent_id
            .as_ref()
            .and_then(|pid| by_id.get(pid).copied());
    }
    history.reverse();
    history
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_shared::crypto::derive_session_key;

    fn setup() -> (
        ConversationDataService,
        SessionKey,
        OwnerAddress,
        Arc<SearchIndexSession>,
    ) {
        let owner = OwnerAddress::new("0xAbc123");
        let key = derive_session_key("signature-entropy", &owner).unwrap();
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let search = Arc::new(SearchIndexSession::new(owner.clone()));
        let service = ConversationDataService::new(db, Arc::clone(&search));
        (service, key, owner, search)
    }

    #[tokio::test]
    async fn first_message_creates_user_and_pending_assistant() {
        let (service, key, owner, _) = setup();

        let turn = service
            .create_conversation(&key, &owner, "Hello")
            .await
            .unwrap();

        let messages = service
            .get_messages(&key, &owner, &turn.conversation.id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content.as_deref(), Some("Hello"));
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].is_pending());
        assert_eq!(messages[1].parent_id, Some(messages[0].id.clone()));

        // The pending placeholder previews the prompt, not null.
        assert_eq!(
            turn.conversation.last_message_preview.as_deref(),
            Some("Hello")
        );
    }

    #[tokio::test]
    async fn sequential_adds_accumulate_not_overwrite() {
        let (service, key, owner, _) = setup();

        let turn = service
            .create_conversation(&key, &owner, "first")
            .await
            .unwrap();
        let id = turn.conversation.id.clone();

        service
            .add_message(&key, &owner, &id, "second")
            .await
            .unwrap();

        let messages = service.get_messages(&key, &owner, &id).await.unwrap();
        assert_eq!(messages.len(), 4);
        assert!(messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        // The second user message chains onto the previous turn.
        assert_eq!(messages[2].parent_id, Some(messages[1].id.clone()));
    }

    #[tokio::test]
    async fn list_filters_tombstones_and_sorts_by_activity() {
        let (service, key, owner, _) = setup();

        let a = service
            .create_conversation(&key, &owner, "older")
            .await
            .unwrap();
        let b = service
            .create_conversation(&key, &owner, "newer")
            .await
            .unwrap();
        let doomed = service
            .create_conversation(&key, &owner, "doomed")
            .await
            .unwrap();

        // Force distinct activity timestamps regardless of clock granularity.
        {
            let mut newer = b.conversation.clone();
            newer.last_message_created_at = Some(unix_ms_now() + 10);
            service.persist_conversation(&key, &owner, &newer).unwrap();
        }
        service
            .delete_conversation(&key, &owner, &doomed.conversation.id)
            .await
            .unwrap();

        let listed = service.list_conversations(&key, &owner).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.conversation.id);
        assert_eq!(listed[1].id, a.conversation.id);
        assert!(listed.iter().all(|c| !c.is_deleted));
    }

    #[tokio::test]
    async fn get_messages_misses_degrade_to_empty() {
        let (service, key, owner, _) = setup();

        let messages = service
            .get_messages(&key, &owner, &ConversationId("never-cached".into()))
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn rename_of_missing_record_fails_loudly() {
        let (service, key, owner, _) = setup();

        let result = service
            .rename_conversation(&key, &owner, &ConversationId("ghost".into()), "anything")
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound)));
    }

    #[tokio::test]
    async fn delete_tombstones_and_purges_cache() {
        let (service, key, owner, search) = setup();

        let turn = service
            .create_conversation(&key, &owner, "ethereum gas fees question")
            .await
            .unwrap();
        let id = turn.conversation.id.clone();
        assert!(!search.search("gas fees").is_empty());

        service.delete_conversation(&key, &owner, &id).await.unwrap();

        assert!(service.list_conversations(&key, &owner).await.unwrap().is_empty());
        assert!(service.get_messages(&key, &owner, &id).await.unwrap().is_empty());
        assert!(search.search("gas fees").is_empty());
    }

    #[tokio::test]
    async fn edit_forks_history_instead_of_rewriting() {
        let (service, key, owner, _) = setup();

        let turn = service
            .create_conversation(&key, &owner, "original question")
            .await
            .unwrap();
        let id = turn.conversation.id.clone();

        service
            .edit_user_message(&key, &owner, &id, &turn.user_message.id, "revised question")
            .await
            .unwrap();

        let messages = service.get_messages(&key, &owner, &id).await.unwrap();
        assert_eq!(messages.len(), 4);
        // The original survives untouched.
        assert_eq!(messages[0].content.as_deref(), Some("original question"));
        // The fork shares the edited message's parent (here, the root).
        assert_eq!(messages[2].content.as_deref(), Some("revised question"));
        assert_eq!(messages[2].parent_id, messages[0].parent_id);
    }

    #[tokio::test]
    async fn regenerate_appends_sibling_placeholder() {
        let (service, key, owner, _) = setup();

        let turn = service
            .create_conversation(&key, &owner, "question")
            .await
            .unwrap();
        let id = turn.conversation.id.clone();

        let replacement = service
            .regenerate(&key, &owner, &id, &turn.assistant_message.id)
            .await
            .unwrap();
        assert!(replacement.is_pending());
        assert_eq!(replacement.parent_id, Some(turn.user_message.id.clone()));

        let messages = service.get_messages(&key, &owner, &id).await.unwrap();
        assert_eq!(messages.len(), 3);
    }

    #[tokio::test]
    async fn branch_copies_walked_history_to_new_thread() {
        let (service, key, owner, _) = setup();

        let first = service
            .create_conversation(&key, &owner, "first")
            .await
            .unwrap();
        let id = first.conversation.id.clone();
        let second = service
            .add_message(&key, &owner, &id, "second")
            .await
            .unwrap();

        let branch = service
            .branch_conversation(&key, &owner, &id, &second.user_message.id)
            .await
            .unwrap();

        assert_eq!(branch.branched_from_conversation_id, Some(id.clone()));
        assert_eq!(
            branch.branched_at_message_id,
            Some(second.user_message.id.clone())
        );

        let copied = service.get_messages(&key, &owner, &branch.id).await.unwrap();
        // Walk: second user -> first assistant -> first user, reversed.
        assert_eq!(copied.len(), 3);
        assert_eq!(copied[0].content.as_deref(), Some("first"));
        assert_eq!(copied[2].content.as_deref(), Some("second"));
        assert!(copied.iter().all(|m| m.conversation_id == branch.id));
        // Ids are stable across the fork.
        assert_eq!(copied[2].id, second.user_message.id);
    }

    #[tokio::test]
    async fn branch_with_broken_parent_link_keeps_prefix() {
        let (service, key, owner, _) = setup();

        let turn = service
            .create_conversation(&key, &owner, "orphaned")
            .await
            .unwrap();
        let id = turn.conversation.id.clone();

        // Corrupt the chain: point the user message at an ancestor that
        // does not exist locally.
        let mut messages = service.get_messages(&key, &owner, &id).await.unwrap();
        messages[0].parent_id = Some(MessageId("missing-ancestor".into()));
        service.persist_cache(&key, &owner, &id, &messages).unwrap();

        let branch = service
            .branch_conversation(&key, &owner, &id, &messages[1].id)
            .await
            .unwrap();

        let copied = service.get_messages(&key, &owner, &branch.id).await.unwrap();
        assert_eq!(copied.len(), 2);
        assert_eq!(copied[0].content.as_deref(), Some("orphaned"));
    }

    #[tokio::test]
    async fn response_events_patch_pending_message_in_place() {
        let (service, key, owner, _) = setup();

        let turn = service
            .create_conversation(&key, &owner, "question")
            .await
            .unwrap();
        let id = turn.conversation.id.clone();
        let pending_id = turn.assistant_message.id.clone();

        service
            .apply_response_event(
                &key,
                &owner,
                ResponseEvent::ReasoningStep {
                    conversation_id: id.clone(),
                    message_id: pending_id.clone(),
                    step: sigil_shared::ReasoningStep {
                        title: "Considering".into(),
                        description: "weighing options".into(),
                    },
                },
            )
            .await
            .unwrap();

        service
            .apply_response_event(
                &key,
                &owner,
                ResponseEvent::FinalAnswer {
                    conversation_id: id.clone(),
                    message_id: pending_id.clone(),
                    content: "the answer".into(),
                    reasoning_duration: Some(1200),
                    sources: Vec::new(),
                },
            )
            .await
            .unwrap();

        let messages = service.get_messages(&key, &owner, &id).await.unwrap();
        let answered = messages.iter().find(|m| m.id == pending_id).unwrap();
        assert!(!answered.is_pending());
        assert_eq!(answered.content.as_deref(), Some("the answer"));
        assert_eq!(answered.reasoning.len(), 1);
        assert_eq!(answered.reasoning_duration, Some(1200));

        let listed = service.list_conversations(&key, &owner).await.unwrap();
        assert_eq!(listed[0].last_message_preview.as_deref(), Some("the answer"));
    }

    #[tokio::test]
    async fn channel_pump_applies_events_in_order() {
        let (service, key, owner, _) = setup();

        let turn = service
            .create_conversation(&key, &owner, "question")
            .await
            .unwrap();
        let id = turn.conversation.id.clone();
        let pending_id = turn.assistant_message.id.clone();

        let (tx, rx) = crate::events::response_channel();
        tx.send(ResponseEvent::FinalAnswer {
            conversation_id: id.clone(),
            message_id: pending_id.clone(),
            content: "pumped".into(),
            reasoning_duration: None,
            sources: Vec::new(),
        })
        .unwrap();
        drop(tx);

        service.run_response_events(&key, &owner, rx).await;

        let messages = service.get_messages(&key, &owner, &id).await.unwrap();
        let answered = messages.iter().find(|m| m.id == pending_id).unwrap();
        assert_eq!(answered.content.as_deref(), Some("pumped"));
    }

    #[tokio::test]
    async fn events_for_uncached_conversations_are_dropped() {
        let (service, key, owner, _) = setup();

        // No cache entry exists; the event must not error.
        service
            .apply_response_event(
                &key,
                &owner,
                ResponseEvent::FinalAnswer {
                    conversation_id: ConversationId("evicted".into()),
                    message_id: MessageId("m".into()),
                    content: "late".into(),
                    reasoning_duration: None,
                    sources: Vec::new(),
                },
            )
            .await
            .unwrap();
    }
}
