//! The per-login search session.
//!
//! Owns the in-memory search structure for exactly one owner.  Created at
//! login, dropped at logout; nothing here is process-global, so two owners
//! in one process can never see each other's index.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use sigil_shared::crypto::{decrypt_record, encrypt_record};
use sigil_shared::{Conversation, ConversationId, Message, OwnerAddress, Role, SessionKey};
use sigil_store::{Database, StoreError, StoredSearchIndex};

use crate::error::Result;
use crate::index::{ConversationIndexEntry, MessageIndexEntry, SearchIndexData};
use crate::keywords::keywordize;

/// Titles count double against message content when ranking.
const TITLE_WEIGHT: f64 = 2.0;
const CONTENT_WEIGHT: f64 = 1.0;

/// Minimum unweighted text score for an entry to be considered a hit.
const MIN_SCORE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Title,
    Content,
}

#[derive(Debug, Clone)]
struct IndexedEntry {
    /// Message id for content entries, conversation id for title entries.
    key: String,
    conversation_id: ConversationId,
    kind: EntryKind,
    keywords: String,
}

/// In-memory search state for one owner's session.
pub struct SearchIndexSession {
    owner: OwnerAddress,
    entries: Mutex<Vec<IndexedEntry>>,
    /// Set while a rebuild or delta merge is replacing the in-memory
    /// structure; live updates are dropped during that window so a stale
    /// snapshot cannot overwrite them right back.
    refreshing: AtomicBool,
}

impl SearchIndexSession {
    pub fn new(owner: OwnerAddress) -> Self {
        Self {
            owner,
            entries: Mutex::new(Vec::new()),
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn owner(&self) -> &OwnerAddress {
        &self.owner
    }

    /// Load the persisted index into memory (typically right after login).
    /// A missing record starts the session empty.
    pub fn load(&self, db: &Database, key: &SessionKey) -> Result<()> {
        let data = match db.get_search_index(&self.owner) {
            Ok(stored) => decrypt_record::<SearchIndexData>(key, &stored.sealed_index)?,
            Err(StoreError::NotFound) => SearchIndexData::default(),
            Err(e) => return Err(e.into()),
        };
        self.install(&data);
        Ok(())
    }

    /// Rebuild the whole index from decrypted records, persist it sealed,
    /// and swap the in-memory structure.
    pub fn rebuild(
        &self,
        db: &Database,
        key: &SessionKey,
        conversations: &[Conversation],
        messages: &[Message],
    ) -> Result<()> {
        let _guard = self.begin_refresh();

        let mut data = SearchIndexData::default();
        for conversation in conversations {
            if conversation.is_deleted {
                continue;
            }
            data.conversations.insert(
                conversation.id.0.clone(),
                ConversationIndexEntry {
                    title: keywordize(&conversation.title),
                },
            );
        }
        for message in messages {
            // Only user-authored content is indexed.
            let Some(content) = message.content.as_deref() else {
                continue;
            };
            if message.role != Role::User {
                continue;
            }
            data.messages.insert(
                message.id.0.clone(),
                MessageIndexEntry {
                    conversation_id: message.conversation_id.clone(),
                    content: keywordize(content),
                },
            );
        }

        self.persist(db, key, &data)?;
        self.install(&data);

        tracing::debug!(
            owner = %self.owner.short(),
            conversations = data.conversations.len(),
            messages = data.messages.len(),
            "search index rebuilt"
        );
        Ok(())
    }

    /// Shallow-merge precomputed message-keyword deltas (from remote sync)
    /// into the persisted index, then refresh the in-memory structure.
    pub fn merge_deltas(
        &self,
        db: &Database,
        key: &SessionKey,
        deltas: Vec<HashMap<String, MessageIndexEntry>>,
    ) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }

        let _guard = self.begin_refresh();

        let mut data = match db.get_search_index(&self.owner) {
            Ok(stored) => decrypt_record::<SearchIndexData>(key, &stored.sealed_index)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "persisted search index unreadable, starting fresh");
                    SearchIndexData::default()
                }),
            Err(StoreError::NotFound) => SearchIndexData::default(),
            Err(e) => return Err(e.into()),
        };

        for delta in deltas {
            data.merge_message_delta(delta);
        }

        self.persist(db, key, &data)?;
        self.install(&data);
        Ok(())
    }

    /// Reflect a freshly written local message in the live index.
    /// In-memory only; dropped while a rebuild/merge is in flight.
    pub fn apply_live_delta(&self, message: &Message, conversation: &Conversation) {
        if self.refreshing.load(Ordering::Acquire) {
            return;
        }
        let Some(content) = message.content.as_deref() else {
            return;
        };
        if message.role != Role::User {
            return;
        }

        let mut entries = self.entries.lock().expect("search index lock");
        upsert(
            &mut entries,
            IndexedEntry {
                key: message.id.0.clone(),
                conversation_id: message.conversation_id.clone(),
                kind: EntryKind::Content,
                keywords: keywordize(content),
            },
        );
        upsert(
            &mut entries,
            IndexedEntry {
                key: conversation.id.0.clone(),
                conversation_id: conversation.id.clone(),
                kind: EntryKind::Title,
                keywords: keywordize(&conversation.title),
            },
        );
    }

    /// Reflect a rename in the live index.
    pub fn apply_title_change(&self, conversation: &Conversation) {
        if self.refreshing.load(Ordering::Acquire) {
            return;
        }
        let mut entries = self.entries.lock().expect("search index lock");
        upsert(
            &mut entries,
            IndexedEntry {
                key: conversation.id.0.clone(),
                conversation_id: conversation.id.clone(),
                kind: EntryKind::Title,
                keywords: keywordize(&conversation.title),
            },
        );
    }

    /// Drop a deleted conversation from the live index.
    pub fn remove_conversation(&self, conversation_id: &ConversationId) {
        if self.refreshing.load(Ordering::Acquire) {
            return;
        }
        let mut entries = self.entries.lock().expect("search index lock");
        entries.retain(|e| &e.conversation_id != conversation_id);
    }

    /// Fuzzy weighted search: returns matching conversation ids in
    /// relevance order, deduplicated, titles ranked above content.
    pub fn search(&self, query: &str) -> Vec<ConversationId> {
        let query_keywords = keywordize(query);
        if query_keywords.is_empty() {
            return Vec::new();
        }

        let entries = self.entries.lock().expect("search index lock");

        let mut scored: Vec<(f64, &IndexedEntry)> = entries
            .iter()
            .filter_map(|entry| {
                let score = text_score(&query_keywords, &entry.keywords);
                if score < MIN_SCORE {
                    return None;
                }
                let weight = match entry.kind {
                    EntryKind::Title => TITLE_WEIGHT,
                    EntryKind::Content => CONTENT_WEIGHT,
                };
                Some((score * weight, entry))
            })
            .collect();

        // Stable relevance order; key as tie-breaker for determinism.
        scored.sort_by(|(a, ea), (b, eb)| {
            b.partial_cmp(a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ea.key.cmp(&eb.key))
        });

        let mut seen = HashSet::new();
        scored
            .into_iter()
            .filter_map(|(_, entry)| {
                seen.insert(entry.conversation_id.clone())
                    .then(|| entry.conversation_id.clone())
            })
            .collect()
    }

    fn persist(&self, db: &Database, key: &SessionKey, data: &SearchIndexData) -> Result<()> {
        let sealed_index = encrypt_record(key, data)?;
        db.put_search_index(&StoredSearchIndex {
            owner_address: self.owner.clone(),
            sealed_index,
        })?;
        Ok(())
    }

    fn install(&self, data: &SearchIndexData) {
        let mut entries = Vec::with_capacity(data.conversations.len() + data.messages.len());
        for (id, entry) in &data.conversations {
            entries.push(IndexedEntry {
                key: id.clone(),
                conversation_id: ConversationId(id.clone()),
                kind: EntryKind::Title,
                keywords: entry.title.clone(),
            });
        }
        for (id, entry) in &data.messages {
            entries.push(IndexedEntry {
                key: id.clone(),
                conversation_id: entry.conversation_id.clone(),
                kind: EntryKind::Content,
                keywords: entry.content.clone(),
            });
        }
        *self.entries.lock().expect("search index lock") = entries;
    }

    fn begin_refresh(&self) -> RefreshGuard<'_> {
        self.refreshing.store(true, Ordering::Release);
        RefreshGuard { flag: &self.refreshing }
    }
}

/// Clears the refresh flag when a rebuild/merge exits, error paths included.
struct RefreshGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn upsert(entries: &mut Vec<IndexedEntry>, entry: IndexedEntry) {
    match entries
        .iter_mut()
        .find(|e| e.key == entry.key && e.kind == entry.kind)
    {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Blend of exact token containment and trigram similarity in [0, 1].
/// Containment carries most of the weight; trigrams absorb typos.
fn text_score(query_keywords: &str, entry_keywords: &str) -> f64 {
    if entry_keywords.is_empty() {
        return 0.0;
    }
    0.7 * token_containment(query_keywords, entry_keywords)
        + 0.3 * trigram_similarity(query_keywords, entry_keywords)
}

/// Fraction of query tokens present verbatim in the entry.
fn token_containment(query_keywords: &str, entry_keywords: &str) -> f64 {
    let entry_tokens: HashSet<&str> = entry_keywords.split(' ').collect();
    let query_tokens: Vec<&str> = query_keywords.split(' ').collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let hits = query_tokens
        .iter()
        .filter(|t| entry_tokens.contains(**t))
        .count();
    hits as f64 / query_tokens.len() as f64
}

fn trigrams(text: &str) -> HashSet<String> {
    if text.is_empty() {
        return HashSet::new();
    }
    let padded = format!("  {text}  ");
    let chars: Vec<char> = padded.chars().collect();
    let mut set = HashSet::new();
    if chars.len() < 3 {
        set.insert(padded);
        return set;
    }
    for i in 0..=(chars.len() - 3) {
        let tri = [chars[i], chars[i + 1], chars[i + 2]];
        set.insert(tri.iter().collect::<String>());
    }
    set
}

/// Jaccard-style trigram similarity in [0, 1].
fn trigram_similarity(a: &str, b: &str) -> f64 {
    let a_set = trigrams(a);
    let b_set = trigrams(b);
    if a_set.is_empty() || b_set.is_empty() {
        return 0.0;
    }
    let intersection = a_set.intersection(&b_set).count() as f64;
    let union = a_set.union(&b_set).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_shared::crypto::derive_session_key;
    use sigil_shared::unix_ms_now;

    fn key() -> SessionKey {
        derive_session_key("entropy", &OwnerAddress::new("0xa")).unwrap()
    }

    fn conversation(id: &str, title: &str) -> Conversation {
        Conversation {
            id: ConversationId(id.to_string()),
            owner_address: OwnerAddress::new("0xa"),
            created_at: unix_ms_now(),
            title: title.to_string(),
            is_deleted: false,
            last_updated_at: unix_ms_now(),
            last_message_created_at: None,
            last_message_preview: None,
            branched_from_conversation_id: None,
            branched_at_message_id: None,
        }
    }

    fn user_message(id: &str, conversation_id: &str, content: &str) -> Message {
        Message {
            id: sigil_shared::MessageId(id.to_string()),
            conversation_id: ConversationId(conversation_id.to_string()),
            parent_id: None,
            role: Role::User,
            content: Some(content.to_string()),
            created_at: unix_ms_now(),
            reasoning: Vec::new(),
            reasoning_duration: None,
            sources: Vec::new(),
        }
    }

    fn assistant_message(id: &str, conversation_id: &str, content: Option<&str>) -> Message {
        Message {
            role: Role::Assistant,
            content: content.map(String::from),
            ..user_message(id, conversation_id, "")
        }
    }

    #[test]
    fn search_precision_on_titles() {
        let session = SearchIndexSession::new(OwnerAddress::new("0xa"));
        let db = Database::open_in_memory().unwrap();

        session
            .rebuild(
                &db,
                &key(),
                &[
                    conversation("a", "Ethereum Gas Fees"),
                    conversation("b", "Bitcoin Whales"),
                ],
                &[],
            )
            .unwrap();

        let hits = session.search("gas fees");
        assert_eq!(hits, vec![ConversationId("a".into())]);
    }

    #[test]
    fn assistant_content_is_not_indexed() {
        let session = SearchIndexSession::new(OwnerAddress::new("0xa"));
        let db = Database::open_in_memory().unwrap();

        session
            .rebuild(
                &db,
                &key(),
                &[conversation("a", "untitled")],
                &[
                    user_message("m1", "a", "tell me about staking rewards"),
                    assistant_message("m2", "a", Some("staking rewards are paid to validators")),
                ],
            )
            .unwrap();

        // Matching only on assistant vocabulary must not hit.
        assert!(session.search("validators").is_empty());
        assert_eq!(session.search("staking rewards"), vec![ConversationId("a".into())]);
    }

    #[test]
    fn tombstoned_conversations_are_skipped_on_rebuild() {
        let session = SearchIndexSession::new(OwnerAddress::new("0xa"));
        let db = Database::open_in_memory().unwrap();

        let mut deleted = conversation("a", "Ethereum Gas Fees");
        deleted.is_deleted = true;

        session.rebuild(&db, &key(), &[deleted], &[]).unwrap();
        assert!(session.search("gas fees").is_empty());
    }

    #[test]
    fn title_hits_rank_above_content_hits() {
        let session = SearchIndexSession::new(OwnerAddress::new("0xa"));
        let db = Database::open_in_memory().unwrap();

        session
            .rebuild(
                &db,
                &key(),
                &[
                    conversation("content-hit", "unrelated"),
                    conversation("title-hit", "gas fees"),
                ],
                &[user_message("m1", "content-hit", "gas fees")],
            )
            .unwrap();

        let hits = session.search("gas fees");
        assert_eq!(
            hits,
            vec![
                ConversationId("title-hit".into()),
                ConversationId("content-hit".into()),
            ]
        );
    }

    #[test]
    fn rebuild_persists_and_reloads() {
        let owner = OwnerAddress::new("0xa");
        let db = Database::open_in_memory().unwrap();
        let key = key();

        let session = SearchIndexSession::new(owner.clone());
        session
            .rebuild(&db, &key, &[conversation("a", "Ethereum Gas Fees")], &[])
            .unwrap();

        // A fresh session sees the persisted index.
        let relogin = SearchIndexSession::new(owner);
        relogin.load(&db, &key).unwrap();
        assert_eq!(relogin.search("gas fees"), vec![ConversationId("a".into())]);
    }

    #[test]
    fn merge_deltas_extends_persisted_index() {
        let owner = OwnerAddress::new("0xa");
        let db = Database::open_in_memory().unwrap();
        let key = key();

        let session = SearchIndexSession::new(owner);
        session
            .rebuild(&db, &key, &[conversation("a", "existing")], &[])
            .unwrap();

        let delta = HashMap::from([(
            "m-remote".to_string(),
            MessageIndexEntry {
                conversation_id: ConversationId("b".into()),
                content: keywordize("merged from remote sync"),
            },
        )]);
        session.merge_deltas(&db, &key, vec![delta]).unwrap();

        assert_eq!(session.search("merged remote"), vec![ConversationId("b".into())]);
        // Pre-existing entries survive the merge.
        assert_eq!(session.search("existing"), vec![ConversationId("a".into())]);
    }

    #[test]
    fn live_delta_is_searchable_without_rebuild() {
        let session = SearchIndexSession::new(OwnerAddress::new("0xa"));

        let conv = conversation("a", "Wallet setup");
        let msg = user_message("m1", "a", "how do I restore a seed phrase");
        session.apply_live_delta(&msg, &conv);

        assert_eq!(session.search("seed phrase"), vec![ConversationId("a".into())]);
    }

    #[test]
    fn live_updates_are_dropped_while_refreshing() {
        let session = SearchIndexSession::new(OwnerAddress::new("0xa"));

        session.refreshing.store(true, Ordering::Release);
        session.apply_live_delta(
            &user_message("m1", "a", "lost update"),
            &conversation("a", "lost"),
        );
        session.refreshing.store(false, Ordering::Release);

        assert!(session.search("lost update").is_empty());
    }

    #[test]
    fn remove_conversation_drops_all_entries() {
        let session = SearchIndexSession::new(OwnerAddress::new("0xa"));

        let conv = conversation("a", "Gas fees");
        session.apply_live_delta(&user_message("m1", "a", "gas fees question"), &conv);
        session.remove_conversation(&ConversationId("a".into()));

        assert!(session.search("gas fees").is_empty());
    }

    #[test]
    fn rename_updates_title_entry() {
        let session = SearchIndexSession::new(OwnerAddress::new("0xa"));

        let mut conv = conversation("a", "Old title");
        session.apply_title_change(&conv);
        assert_eq!(session.search("old title"), vec![ConversationId("a".into())]);

        conv.title = "Brand new name".to_string();
        session.apply_title_change(&conv);
        assert!(session.search("old title").is_empty());
        assert_eq!(session.search("brand new name"), vec![ConversationId("a".into())]);
    }

    #[test]
    fn fuzzy_match_tolerates_typos() {
        let session = SearchIndexSession::new(OwnerAddress::new("0xa"));
        let db = Database::open_in_memory().unwrap();

        session
            .rebuild(&db, &key(), &[conversation("a", "Ethereum Gas Fees")], &[])
            .unwrap();

        // "ethereun" misses exact containment but trigrams still overlap
        // thanks to the exact "gas" token.
        assert_eq!(session.search("ethereun gas"), vec![ConversationId("a".into())]);
    }
}
