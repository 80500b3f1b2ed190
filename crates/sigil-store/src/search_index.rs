//! Persistence for the sealed per-owner search index record.

use rusqlite::params;
use sigil_shared::OwnerAddress;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::StoredSearchIndex;

impl Database {
    /// Insert or replace the owner's sealed search index.
    pub fn put_search_index(&self, index: &StoredSearchIndex) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO search_index (owner_address, sealed_index)
             VALUES (?1, ?2)",
            params![index.owner_address.as_str(), index.sealed_index],
        )?;
        Ok(())
    }

    /// Fetch the owner's sealed search index.
    pub fn get_search_index(&self, owner: &OwnerAddress) -> Result<StoredSearchIndex> {
        self.conn()
            .query_row(
                "SELECT owner_address, sealed_index
                 FROM search_index
                 WHERE owner_address = ?1",
                params![owner.as_str()],
                |row| {
                    let owner: String = row.get(0)?;
                    let sealed_index: String = row.get(1)?;
                    Ok(StoredSearchIndex {
                        owner_address: OwnerAddress::new(owner),
                        sealed_index,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}
