//! # sigil-search
//!
//! Lightweight full-text search over decrypted conversation titles and
//! user-authored message content.
//!
//! The persisted form is a single sealed keyword-map record per owner; the
//! live form is an in-memory structure owned by a [`SearchIndexSession`]
//! created at login.  The session supports full rebuilds, shallow delta
//! merges from remote sync, and synchronous live updates on local writes.

pub mod index;
pub mod keywords;
pub mod session;

mod error;

pub use error::SearchError;
pub use index::{ConversationIndexEntry, MessageIndexEntry, SearchIndexData};
pub use keywords::keywordize;
pub use session::SearchIndexSession;
