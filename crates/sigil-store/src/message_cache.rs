//! The bounded message cache.
//!
//! One row per (owner, conversation) holding the sealed full message list.
//! The cache keeps at most [`MESSAGE_CACHE_LIMIT`] rows per owner; every
//! write re-checks the bound and evicts the least-recently-accessed rows,
//! and every read refreshes the row's recency.

use rusqlite::params;
use sigil_shared::constants::MESSAGE_CACHE_LIMIT;
use sigil_shared::{unix_ms_now, ConversationId, OwnerAddress};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::MessageCacheEntry;

impl Database {
    /// Insert or replace a cache entry, then enforce the per-owner bound.
    ///
    /// The stored record is the whole sealed message list; callers replace
    /// it entirely on every append.
    pub fn put_message_cache(&self, entry: &MessageCacheEntry) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO message_cache
                 (owner_address, conversation_id, sealed_messages, last_accessed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.owner_address.as_str(),
                entry.conversation_id.0,
                entry.sealed_messages,
                entry.last_accessed_at,
            ],
        )?;

        self.evict_message_cache(&entry.owner_address)
    }

    /// Fetch a cache entry and refresh its recency.
    ///
    /// `StoreError::NotFound` means "not cached"; the caller must not treat
    /// that as an empty conversation.
    pub fn get_message_cache(
        &self,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
    ) -> Result<MessageCacheEntry> {
        let entry = self
            .conn()
            .query_row(
                "SELECT owner_address, conversation_id, sealed_messages, last_accessed_at
                 FROM message_cache
                 WHERE owner_address = ?1 AND conversation_id = ?2",
                params![owner.as_str(), conversation_id.0],
                row_to_entry,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        // A read counts as access for eviction purposes.
        self.conn().execute(
            "UPDATE message_cache SET last_accessed_at = ?3
             WHERE owner_address = ?1 AND conversation_id = ?2",
            params![owner.as_str(), conversation_id.0, unix_ms_now()],
        )?;

        Ok(entry)
    }

    /// Remove a conversation's cache entry.  Returns `true` if a row was
    /// deleted.
    pub fn delete_message_cache(
        &self,
        owner: &OwnerAddress,
        conversation_id: &ConversationId,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM message_cache WHERE owner_address = ?1 AND conversation_id = ?2",
            params![owner.as_str(), conversation_id.0],
        )?;
        Ok(affected > 0)
    }

    /// Count cache rows for an owner.
    pub fn message_cache_count(&self, owner: &OwnerAddress) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM message_cache WHERE owner_address = ?1",
            params![owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Conversation ids currently cached for an owner, most recent first.
    pub fn message_cache_keys(&self, owner: &OwnerAddress) -> Result<Vec<ConversationId>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id FROM message_cache
             WHERE owner_address = ?1
             ORDER BY last_accessed_at DESC",
        )?;

        let rows = stmt.query_map(params![owner.as_str()], |row| {
            let id: String = row.get(0)?;
            Ok(ConversationId(id))
        })?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Delete oldest-by-recency rows until the owner is back at the bound.
    fn evict_message_cache(&self, owner: &OwnerAddress) -> Result<()> {
        let evicted = self.conn().execute(
            "DELETE FROM message_cache
             WHERE owner_address = ?1
               AND conversation_id NOT IN (
                   SELECT conversation_id FROM message_cache
                   WHERE owner_address = ?1
                   ORDER BY last_accessed_at DESC
                   LIMIT ?2
               )",
            params![owner.as_str(), MESSAGE_CACHE_LIMIT as i64],
        )?;

        if evicted > 0 {
            tracing::debug!(owner = %owner.short(), evicted, "evicted message cache entries");
        }
        Ok(())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageCacheEntry> {
    let owner: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let sealed_messages: String = row.get(2)?;
    let last_accessed_at: i64 = row.get(3)?;

    Ok(MessageCacheEntry {
        owner_address: OwnerAddress::new(owner),
        conversation_id: ConversationId(conversation_id),
        sealed_messages,
        last_accessed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(owner: &str, id: &str, accessed: i64) -> MessageCacheEntry {
        MessageCacheEntry {
            owner_address: OwnerAddress::new(owner),
            conversation_id: ConversationId(id.to_string()),
            sealed_messages: "sealed".to_string(),
            last_accessed_at: accessed,
        }
    }

    #[test]
    fn cache_bound_is_enforced_after_every_insert() {
        let db = Database::open_in_memory().unwrap();
        let owner = OwnerAddress::new("0xa");

        for i in 0..8 {
            db.put_message_cache(&entry("0xa", &format!("c{i}"), 1000 + i)).unwrap();
            assert!(db.message_cache_count(&owner).unwrap() <= MESSAGE_CACHE_LIMIT);
        }

        // The five most recently accessed entries survive.
        let keys = db.message_cache_keys(&owner).unwrap();
        let names: Vec<_> = keys.iter().map(|k| k.0.as_str()).collect();
        assert_eq!(names, vec!["c7", "c6", "c5", "c4", "c3"]);
    }

    #[test]
    fn read_refreshes_recency() {
        let db = Database::open_in_memory().unwrap();
        let owner = OwnerAddress::new("0xa");

        for i in 0..5 {
            db.put_message_cache(&entry("0xa", &format!("c{i}"), 1000 + i)).unwrap();
        }

        // Touch the oldest entry, then insert a new one; the untouched
        // second-oldest is the one evicted.
        db.get_message_cache(&owner, &ConversationId("c0".into())).unwrap();
        db.put_message_cache(&entry("0xa", "c5", unix_ms_now())).unwrap();

        let keys = db.message_cache_keys(&owner).unwrap();
        assert!(keys.contains(&ConversationId("c0".into())));
        assert!(!keys.contains(&ConversationId("c1".into())));
    }

    #[test]
    fn miss_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .get_message_cache(&OwnerAddress::new("0xa"), &ConversationId("nope".into()))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn owners_evict_independently() {
        let db = Database::open_in_memory().unwrap();

        for i in 0..6 {
            db.put_message_cache(&entry("0xa", &format!("a{i}"), 1000 + i)).unwrap();
            db.put_message_cache(&entry("0xb", &format!("b{i}"), 1000 + i)).unwrap();
        }

        assert_eq!(db.message_cache_count(&OwnerAddress::new("0xa")).unwrap(), 5);
        assert_eq!(db.message_cache_count(&OwnerAddress::new("0xb")).unwrap(), 5);
    }

    #[test]
    fn delete_removes_entry() {
        let db = Database::open_in_memory().unwrap();
        let owner = OwnerAddress::new("0xa");

        db.put_message_cache(&entry("0xa", "c1", 1000)).unwrap();
        assert!(db.delete_message_cache(&owner, &ConversationId("c1".into())).unwrap());
        assert!(!db.delete_message_cache(&owner, &ConversationId("c1".into())).unwrap());
    }
}
