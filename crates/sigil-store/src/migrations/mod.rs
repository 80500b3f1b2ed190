//! Schema migrations, keyed off SQLite's `user_version` pragma.
//!
//! Every [`crate::Database`] constructor calls [`run_migrations`], so an
//! older vault file is upgraded in place the first time a newer build
//! opens it, and a re-open is a no-op.  Adding a migration means a new
//! `vNNN_*` module, a `current < N` block below, and bumping
//! [`CURRENT_VERSION`].

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

const CURRENT_VERSION: u32 = 1;

/// Bring the connection's schema up to [`CURRENT_VERSION`].
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::info!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    if current < 1 {
        tracing::info!("applying migration v001_initial");
        v001_initial::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}
