//! Engine context - one-shot wiring of the sync components
//!
//! Constructed once at process start with the three boundary collaborators
//! (durable storage, remote API, identity) injected, then handed to
//! consumers. There are no lazily-initialized globals; the engine's lifetime
//! is the process's lifetime.

use std::sync::Arc;

use tracing::info;

use crate::api::{AuthProvider, DurableStorage, RemotePoemApi};
use crate::cache::PoemCache;
use crate::config::EngineConfig;
use crate::error::{Result, ValidationError};
use crate::gateway::SyncGateway;
use crate::record::{PoemRecord, UserId};
use crate::reconciler::Reconciler;

/// The assembled sync engine
pub struct Engine {
    cache: Arc<PoemCache>,
    gateway: SyncGateway,
    reconciler: Reconciler,
    auth: Arc<dyn AuthProvider>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn DurableStorage>,
        api: Arc<dyn RemotePoemApi>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        let cache = Arc::new(PoemCache::new(storage));
        let gateway = SyncGateway::new(
            Arc::clone(&cache),
            api,
            Arc::clone(&auth),
            config,
        );
        let reconciler = Reconciler::new(Arc::clone(&cache), Arc::clone(&auth));
        Self {
            cache,
            gateway,
            reconciler,
            auth,
        }
    }

    /// Hydrate the cache from durable storage. Call once before serving.
    pub async fn load(&self) -> Result<usize> {
        let count = self.cache.hydrate().await?;
        info!(count, "engine loaded");
        Ok(count)
    }

    /// Create a bare draft owned by the signed-in user
    pub async fn create_draft(&self, title: &str, body: &str) -> Result<PoemRecord> {
        let author = self.current_user()?;
        self.cache.create_draft(title, body, author).await
    }

    /// Local cache manager: queries and local-only mutations
    pub fn cache(&self) -> &Arc<PoemCache> {
        &self.cache
    }

    /// Remote sync gateway: publish, like, edit, delete, feed refresh
    pub fn gateway(&self) -> &SyncGateway {
        &self.gateway
    }

    /// Realtime reconciler: feed it the push event stream
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn current_user(&self) -> Result<UserId> {
        self.auth
            .current_user_id()
            .ok_or_else(|| ValidationError::NotSignedIn.into())
    }
}
