//! # sigil-sync
//!
//! Reconciliation of local state with the three remote sources of truth:
//! an event-indexing service, content-addressed blob storage, and the live
//! on-chain event feed.
//!
//! The [`SyncOrchestrator`] pulls change records newer than a per-owner
//! watermark, hydrates the encrypted blobs behind them in parallel, writes
//! the results through the local store and search index, and only then
//! advances the watermark.  A failed round leaves the watermark untouched
//! so the next scheduled round retries the same window.

pub mod config;
pub mod http;
pub mod orchestrator;
pub mod remote;

mod error;

pub use config::SyncConfig;
pub use error::{RemoteError, SyncError};
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
pub use remote::{BlobClient, ChainEvent, ConversationChange, EventIndexClient};
