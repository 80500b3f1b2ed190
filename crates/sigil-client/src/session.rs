//! Per-login session wiring.
//!
//! A [`ClientSession`] is created when a wallet signature arrives and
//! dropped at logout.  It derives the session key, loads the persisted
//! search index, and owns the data service and sync orchestrator for one
//! owner.  Nothing here is process-global: two owners in one process get
//! two fully independent sessions.

use std::sync::{Arc, Mutex};

use sigil_search::SearchIndexSession;
use sigil_shared::crypto::derive_session_key;
use sigil_shared::{ConversationId, OwnerAddress, SessionKey};
use sigil_store::Database;
use sigil_sync::http::{HttpBlobClient, HttpEventIndexClient};
use sigil_sync::{ChainEvent, SyncConfig, SyncOrchestrator, SyncOutcome};

use crate::error::Result;
use crate::service::ConversationDataService;

pub struct ClientSession {
    owner: OwnerAddress,
    key: SessionKey,
    db: Arc<Mutex<Database>>,
    search: Arc<SearchIndexSession>,
    service: ConversationDataService,
    sync: SyncOrchestrator<HttpEventIndexClient, HttpBlobClient>,
}

impl ClientSession {
    /// Derive the session key from wallet-provided entropy, load the
    /// owner's persisted search index, and wire up the service layers.
    pub fn login(
        entropy: &str,
        owner: OwnerAddress,
        db: Database,
        config: &SyncConfig,
    ) -> Result<Self> {
        let key = derive_session_key(entropy, &owner)?;
        let db = Arc::new(Mutex::new(db));
        let search = Arc::new(SearchIndexSession::new(owner.clone()));

        {
            let db = db.lock().expect("database lock");
            search.load(&db, &key)?;
        }

        let service = ConversationDataService::new(Arc::clone(&db), Arc::clone(&search));
        let sync = SyncOrchestrator::new(
            HttpEventIndexClient::new(config),
            HttpBlobClient::new(config),
            Arc::clone(&db),
            Arc::clone(&search),
            config.page_size,
        );

        tracing::info!(owner = %owner.short(), "session established");
        Ok(Self {
            owner,
            key,
            db,
            search,
            service,
            sync,
        })
    }

    pub fn owner(&self) -> &OwnerAddress {
        &self.owner
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// The conversation CRUD façade.
    pub fn data(&self) -> &ConversationDataService {
        &self.service
    }

    /// Matching conversation ids for a free-text query, most relevant
    /// first.
    pub fn search(&self, query: &str) -> Vec<ConversationId> {
        self.search.search(query)
    }

    /// Rebuild the search index wholesale from everything decryptable
    /// locally, persisting the result.  Live in-memory deltas are not
    /// persisted on their own; this is what makes them durable.
    pub async fn rebuild_search_index(&self) -> Result<()> {
        let conversations = self.service.list_conversations(&self.key, &self.owner).await?;
        let mut messages = Vec::new();
        for conversation in &conversations {
            messages.extend(
                self.service
                    .get_messages(&self.key, &self.owner, &conversation.id)
                    .await?,
            );
        }

        let db = self.db.lock().expect("database lock");
        self.search
            .rebuild(&db, &self.key, &conversations, &messages)?;
        Ok(())
    }

    /// Run one sync round against the remote sources.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        Ok(self.sync.sync(&self.key, &self.owner).await?)
    }

    /// React to a live on-chain message-finalization event.
    pub async fn handle_chain_event(&self, event: &ChainEvent) -> Result<SyncOutcome> {
        Ok(self
            .sync
            .handle_chain_event(&self.key, &self.owner, event)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_rejects_empty_entropy() {
        let db = Database::open_in_memory().unwrap();
        let result = ClientSession::login(
            "",
            OwnerAddress::new("0xa"),
            db,
            &SyncConfig::default(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn session_state_survives_relogin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigil.db");
        let owner = OwnerAddress::new("0xa");
        let config = SyncConfig::default();

        let id = {
            let db = Database::open_at(&path).unwrap();
            let session =
                ClientSession::login("signature", owner.clone(), db, &config).unwrap();
            let turn = session
                .data()
                .create_conversation(session.key(), session.owner(), "persistent question")
                .await
                .unwrap();
            session.rebuild_search_index().await.unwrap();
            turn.conversation.id
        };

        // Same entropy and owner: the derived key decrypts prior records
        // and the persisted search index comes back.
        let db = Database::open_at(&path).unwrap();
        let session = ClientSession::login("signature", owner, db, &config).unwrap();
        let listed = session
            .data()
            .list_conversations(session.key(), session.owner())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(session.search("persistent question"), vec![id]);
    }

    #[tokio::test]
    async fn wrong_entropy_cannot_read_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigil.db");
        let owner = OwnerAddress::new("0xa");
        let config = SyncConfig::default();

        {
            let db = Database::open_at(&path).unwrap();
            let session =
                ClientSession::login("signature", owner.clone(), db, &config).unwrap();
            session
                .data()
                .create_conversation(session.key(), session.owner(), "secret")
                .await
                .unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        let session = ClientSession::login("other-signature", owner, db, &config).unwrap();
        // Undecryptable records are skipped, not exposed.
        let listed = session
            .data()
            .list_conversations(session.key(), session.owner())
            .await
            .unwrap();
        assert!(listed.is_empty());
    }
}
