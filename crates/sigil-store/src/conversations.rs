//! CRUD operations for sealed [`StoredConversation`] records.

use rusqlite::params;
use sigil_shared::{ConversationId, OwnerAddress};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::StoredConversation;

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert or replace a sealed conversation record.
    ///
    /// Writes are whole-record replaces: a failed re-encryption upstream
    /// simply leaves the previous sealed record in place.
    pub fn upsert_conversation(&self, record: &StoredConversation) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO conversations (owner_address, id, sealed_record)
             VALUES (?1, ?2, ?3)",
            params![
                record.owner_address.as_str(),
                record.id.0,
                record.sealed_record,
            ],
        )?;
        Ok(())
    }

    /// Insert or replace a batch of sealed conversation records in one
    /// transaction.  Used by the sync layer after hydrating a round.
    pub fn bulk_upsert_conversations(&mut self, records: &[StoredConversation]) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO conversations (owner_address, id, sealed_record)
                 VALUES (?1, ?2, ?3)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.owner_address.as_str(),
                    record.id.0,
                    record.sealed_record,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single sealed conversation record.
    pub fn get_conversation(
        &self,
        owner: &OwnerAddress,
        id: &ConversationId,
    ) -> Result<StoredConversation> {
        self.conn()
            .query_row(
                "SELECT owner_address, id, sealed_record
                 FROM conversations
                 WHERE owner_address = ?1 AND id = ?2",
                params![owner.as_str(), id.0],
                row_to_conversation,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List every sealed conversation record for an owner.
    ///
    /// Ordering is by insertion id; the caller sorts after decryption since
    /// the sort key lives inside the sealed record.
    pub fn list_conversations(&self, owner: &OwnerAddress) -> Result<Vec<StoredConversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT owner_address, id, sealed_record
             FROM conversations
             WHERE owner_address = ?1
             ORDER BY id",
        )?;

        let rows = stmt.query_map(params![owner.as_str()], row_to_conversation)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Count conversations stored for an owner (tombstones included).
    pub fn conversation_count(&self, owner: &OwnerAddress) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM conversations WHERE owner_address = ?1",
            params![owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Map a `rusqlite::Row` to a [`StoredConversation`].
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredConversation> {
    let owner: String = row.get(0)?;
    let id: String = row.get(1)?;
    let sealed_record: String = row.get(2)?;

    Ok(StoredConversation {
        owner_address: OwnerAddress::new(owner),
        id: ConversationId(id),
        sealed_record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(owner: &str, id: &str, sealed: &str) -> StoredConversation {
        StoredConversation {
            owner_address: OwnerAddress::new(owner),
            id: ConversationId(id.to_string()),
            sealed_record: sealed.to_string(),
        }
    }

    #[test]
    fn upsert_replaces_whole_record() {
        let db = Database::open_in_memory().unwrap();
        let owner = OwnerAddress::new("0xa");

        db.upsert_conversation(&record("0xa", "c1", "sealed-v1")).unwrap();
        db.upsert_conversation(&record("0xa", "c1", "sealed-v2")).unwrap();

        let got = db.get_conversation(&owner, &ConversationId("c1".into())).unwrap();
        assert_eq!(got.sealed_record, "sealed-v2");
        assert_eq!(db.conversation_count(&owner).unwrap(), 1);
    }

    #[test]
    fn records_are_partitioned_by_owner() {
        let db = Database::open_in_memory().unwrap();

        db.upsert_conversation(&record("0xa", "c1", "sealed-a")).unwrap();
        db.upsert_conversation(&record("0xb", "c1", "sealed-b")).unwrap();

        let a = db.list_conversations(&OwnerAddress::new("0xa")).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].sealed_record, "sealed-a");
    }

    #[test]
    fn missing_record_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .get_conversation(&OwnerAddress::new("0xa"), &ConversationId("nope".into()))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn bulk_upsert_is_transactional() {
        let mut db = Database::open_in_memory().unwrap();
        let records: Vec<_> = (0..10)
            .map(|i| record("0xa", &format!("c{i}"), "sealed"))
            .collect();

        db.bulk_upsert_conversations(&records).unwrap();
        assert_eq!(db.conversation_count(&OwnerAddress::new("0xa")).unwrap(), 10);
    }
}
