use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Store error: {0}")]
    Store(#[from] sigil_store::StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] sigil_shared::CryptoError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SearchError>;
