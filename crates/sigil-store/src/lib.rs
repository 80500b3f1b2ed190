//! # sigil-store
//!
//! Local persistent storage for the Sigil conversation vault, backed by
//! SQLite.
//!
//! Four logical tables, all partitioned by owner address: `conversations`
//! (sealed conversation records), `message_cache` (sealed full message
//! lists, bounded and evicted by recency), `search_index` (one sealed
//! keyword-map record per owner) and `user_metadata` (plaintext sync
//! checkpoints).  Every record value arrives here already encrypted; this
//! crate never sees plaintext conversation data.

pub mod checkpoints;
pub mod conversations;
pub mod database;
pub mod message_cache;
pub mod migrations;
pub mod models;
pub mod search_index;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
