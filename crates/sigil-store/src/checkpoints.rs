//! Per-owner sync checkpoints (watermarks).
//!
//! Reading an owner with no row yields [`SyncCheckpoints::default`] so a
//! first sync starts from the epoch; writes replace the whole row.

use rusqlite::{params, OptionalExtension};
use sigil_shared::OwnerAddress;

use crate::database::Database;
use crate::error::Result;
use crate::models::SyncCheckpoints;

impl Database {
    /// Fetch the owner's checkpoints, defaulting to the epoch when absent.
    pub fn get_checkpoints(&self, owner: &OwnerAddress) -> Result<SyncCheckpoints> {
        let row = self
            .conn()
            .query_row(
                "SELECT conversations_last_synced_at, search_last_synced_at
                 FROM user_metadata
                 WHERE owner_address = ?1",
                params![owner.as_str()],
                |row| {
                    Ok(SyncCheckpoints {
                        conversations_last_synced_at: row.get(0)?,
                        search_last_synced_at: row.get(1)?,
                    })
                },
            )
            .optional()?;

        Ok(row.unwrap_or_default())
    }

    /// Replace the owner's checkpoints.
    pub fn put_checkpoints(
        &self,
        owner: &OwnerAddress,
        checkpoints: &SyncCheckpoints,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO user_metadata
                 (owner_address, conversations_last_synced_at, search_last_synced_at)
             VALUES (?1, ?2, ?3)",
            params![
                owner.as_str(),
                checkpoints.conversations_last_synced_at,
                checkpoints.search_last_synced_at,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_owner_defaults_to_epoch() {
        let db = Database::open_in_memory().unwrap();
        let cp = db.get_checkpoints(&OwnerAddress::new("0xa")).unwrap();
        assert_eq!(cp, SyncCheckpoints::default());
        assert_eq!(cp.conversations_last_synced_at, 0);
    }

    #[test]
    fn checkpoints_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let owner = OwnerAddress::new("0xa");

        let cp = SyncCheckpoints {
            conversations_last_synced_at: 1_700_000_000_000,
            search_last_synced_at: 1_700_000_000_500,
        };
        db.put_checkpoints(&owner, &cp).unwrap();

        assert_eq!(db.get_checkpoints(&owner).unwrap(), cp);
    }
}
