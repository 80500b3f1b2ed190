//! Sync configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a client can start with zero
//! configuration against a local development stack.

/// Remote endpoint configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// URL of the event-indexing query endpoint.
    /// Env: `SIGIL_EVENT_INDEX_URL`
    /// Default: `http://127.0.0.1:8080/query`
    pub event_index_url: String,

    /// Base URL of the content-addressed blob gateway; blobs are fetched
    /// as `{gateway}/{cid}`.
    /// Env: `SIGIL_BLOB_GATEWAY_URL`
    /// Default: `http://127.0.0.1:8080/blobs`
    pub blob_gateway_url: String,

    /// Page size for change-record queries.
    /// Env: `SIGIL_SYNC_PAGE_SIZE`
    /// Default: `50`
    pub page_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            event_index_url: "http://127.0.0.1:8080/query".to_string(),
            blob_gateway_url: "http://127.0.0.1:8080/blobs".to_string(),
            page_size: 50,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SIGIL_EVENT_INDEX_URL") {
            config.event_index_url = url;
        }

        if let Ok(url) = std::env::var("SIGIL_BLOB_GATEWAY_URL") {
            config.blob_gateway_url = url;
        }

        if let Ok(val) = std::env::var("SIGIL_SYNC_PAGE_SIZE") {
            if let Ok(n) = val.parse::<u32>() {
                if n > 0 {
                    config.page_size = n;
                }
            } else {
                tracing::warn!(value = %val, "Invalid SIGIL_SYNC_PAGE_SIZE, using default");
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.page_size, 50);
        assert!(config.blob_gateway_url.ends_with("/blobs"));
    }
}
