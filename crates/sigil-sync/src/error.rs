use thiserror::Error;

/// Failures reaching the event-indexing service or blob storage.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote returned status {0}")]
    Status(u16),
}

/// Top-level failure of a sync round.  The watermark is never advanced on
/// any of these.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] sigil_store::StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] sigil_shared::CryptoError),

    #[error("Search index error: {0}")]
    Search(#[from] sigil_search::SearchError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
