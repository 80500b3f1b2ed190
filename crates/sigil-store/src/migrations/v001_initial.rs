//! v001: the initial vault schema.
//!
//! Four per-owner tables: `conversations`, `message_cache`, `search_index`
//! and `user_metadata`.

use rusqlite::Connection;

/// Applied when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations (sealed records, tombstoned via the record itself)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    owner_address TEXT NOT NULL,              -- lowercase wallet address
    id            TEXT NOT NULL,              -- time-derived conversation id
    sealed_record TEXT NOT NULL,              -- base64(nonce):base64(ciphertext)

    PRIMARY KEY (owner_address, id)
);

-- ----------------------------------------------------------------
-- Message cache (bounded per owner, evicted by recency)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_cache (
    owner_address    TEXT NOT NULL,
    conversation_id  TEXT NOT NULL,
    sealed_messages  TEXT NOT NULL,           -- sealed full message list
    last_accessed_at INTEGER NOT NULL,        -- unix ms

    PRIMARY KEY (owner_address, conversation_id)
);

CREATE INDEX IF NOT EXISTS idx_message_cache_recency
    ON message_cache(owner_address, last_accessed_at);

-- ----------------------------------------------------------------
-- Search index (one sealed keyword-map record per owner)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS search_index (
    owner_address TEXT PRIMARY KEY NOT NULL,
    sealed_index  TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- User metadata (sync checkpoints; plaintext watermarks)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS user_metadata (
    owner_address                TEXT PRIMARY KEY NOT NULL,
    conversations_last_synced_at INTEGER NOT NULL DEFAULT 0,  -- unix ms
    search_last_synced_at        INTEGER NOT NULL DEFAULT 0   -- unix ms
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
