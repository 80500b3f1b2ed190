use thiserror::Error;

/// Failures surfaced by the session façade.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The referenced conversation or message has no local record.
    /// Mutating operations fail with this; plain reads degrade instead.
    #[error("Record not found")]
    NotFound,

    #[error("Crypto error: {0}")]
    Crypto(#[from] sigil_shared::CryptoError),

    #[error("Store error: {0}")]
    Store(sigil_store::StoreError),

    #[error("Search index error: {0}")]
    Search(#[from] sigil_search::SearchError),

    #[error("Sync error: {0}")]
    Sync(#[from] sigil_sync::SyncError),
}

impl From<sigil_store::StoreError> for ServiceError {
    fn from(e: sigil_store::StoreError) -> Self {
        match e {
            sigil_store::StoreError::NotFound => ServiceError::NotFound,
            other => ServiceError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
