//! HTTP implementations of the remote contracts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sigil_shared::{Cid, OwnerAddress};

use crate::config::SyncConfig;
use crate::error::RemoteError;
use crate::remote::{BlobClient, ConversationChange, EventIndexClient};

/// Query body posted to the event-indexing service.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangeQuery<'a> {
    owner: &'a str,
    last_sync: i64,
    limit: u32,
    offset: u32,
}

#[derive(Debug, Deserialize)]
struct ChangeResponse {
    conversations: Vec<ConversationChange>,
}

/// Event-index client over a graph-style JSON query endpoint.
#[derive(Debug, Clone)]
pub struct HttpEventIndexClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpEventIndexClient {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.event_index_url.clone(),
        }
    }
}

#[async_trait]
impl EventIndexClient for HttpEventIndexClient {
    async fn changed_conversations(
        &self,
        owner: &OwnerAddress,
        updated_after: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationChange>, RemoteError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&ChangeQuery {
                owner: owner.as_str(),
                last_sync: updated_after,
                limit,
                offset,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let body: ChangeResponse = response.json().await?;
        Ok(body.conversations)
    }
}

/// Blob client over a content-addressed HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpBlobClient {
    http: reqwest::Client,
    gateway: String,
}

impl HttpBlobClient {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            gateway: config.blob_gateway_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobClient for HttpBlobClient {
    async fn fetch(&self, cid: &Cid) -> Result<Option<String>, RemoteError> {
        let url = format!("{}/{}", self.gateway, cid);
        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        Ok(Some(response.text().await?))
    }
}
