//! Local cache manager - the owner of the poem store
//!
//! `PoemCache` holds the only mutable copy of the record set. Every other
//! component goes through its operations; nothing else holds a reference
//! that can mutate records in place.
//!
//! Contract for every mutating operation:
//! 1. apply the change in memory,
//! 2. persist the full store through `DurableStorage` before returning,
//! 3. on a failed durable write, roll the in-memory change back and surface
//!    `EngineError::Persistence` - memory and disk never diverge.
//!
//! Queries return cloned snapshots; later mutations do not alter a sequence
//! already handed out. All store access serializes through one async mutex,
//! which is the crate's single logical thread of control for local state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::DurableStorage;
use crate::error::{EngineError, Result, ValidationError};
use crate::record::{PoemId, PoemPatch, PoemRecord, PoemState, UserId};
use crate::{lifecycle, lifecycle::SaveOutcome};

/// Owner of the in-memory poem store, mirrored to durable storage
pub struct PoemCache {
    state: Mutex<HashMap<PoemId, PoemRecord>>,
    storage: Arc<dyn DurableStorage>,
}

impl PoemCache {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            storage,
        }
    }

    /// Load the store from durable storage. Records that violate the
    /// structural invariants are dropped with a warning rather than
    /// poisoning the cache. Returns the number of records loaded.
    pub async fn hydrate(&self) -> Result<usize> {
        let records = self.storage.load_all().await?;
        let mut state = self.state.lock().await;
        state.clear();
        for record in records {
            if let Err(violation) = record.check_invariants() {
                warn!(id = %record.id, violation, "dropping invalid record from storage");
                continue;
            }
            state.insert(record.id, record);
        }
        debug!(count = state.len(), "hydrated poem cache");
        Ok(state.len())
    }

    /// Create a bare draft owned by `author` and persist it
    pub async fn create_draft(
        &self,
        title: &str,
        body: &str,
        author: UserId,
    ) -> Result<PoemRecord> {
        let record = PoemRecord::new_draft(title, body, author, Utc::now());
        self.upsert(record.clone()).await?;
        debug!(id = %record.id, "created draft");
        Ok(record)
    }

    /// Apply a content patch through the lifecycle rules
    pub async fn update(&self, id: &PoemId, patch: &PoemPatch) -> Result<PoemRecord> {
        self.mutate(id, |record| {
            lifecycle::apply_edit(record, patch, Utc::now())?;
            Ok(record.clone())
        })
        .await
    }

    /// Save a poem into the author's collection; idempotent
    pub async fn save_to_collection(&self, id: &PoemId) -> Result<SaveOutcome> {
        self.mutate(id, |record| lifecycle::save_to_collection(record, Utc::now()))
            .await
    }

    /// Run a validated mutation against one record, flushing before return.
    /// The closure sees a scratch copy; a validation error or a failed
    /// durable write leaves the store untouched.
    pub async fn mutate<T>(
        &self,
        id: &PoemId,
        f: impl FnOnce(&mut PoemRecord) -> std::result::Result<T, ValidationError>,
    ) -> Result<T> {
        let mut state = self.state.lock().await;
        let current = state.get(id).ok_or(EngineError::NotFound(*id))?;
        let mut updated = current.clone();
        let out = f(&mut updated)?;
        let prior = state.insert(*id, updated);
        if let Err(err) = self.flush(&state).await {
            if let Some(prior) = prior {
                state.insert(*id, prior);
            }
            return Err(err);
        }
        Ok(out)
    }

    /// Insert or replace a whole record. Used for reconciler merges and for
    /// restoring a pre-intent snapshot after a failed remote call.
    pub async fn upsert(&self, record: PoemRecord) -> Result<()> {
        let id = record.id;
        let mut state = self.state.lock().await;
        let prior = state.insert(id, record);
        if let Err(err) = self.flush(&state).await {
            match prior {
                Some(prior) => {
                    state.insert(id, prior);
                }
                None => {
                    state.remove(&id);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Replace the local record only if `incoming` is strictly newer by
    /// `updated_at` (last-writer-wins). Returns whether it was applied; an
    /// equal-or-older record is presumed a stale echo and dropped.
    pub async fn merge_newer(&self, incoming: PoemRecord) -> Result<bool> {
        let id = incoming.id;
        let mut state = self.state.lock().await;
        if let Some(local) = state.get(&id) {
            if incoming.updated_at <= local.updated_at {
                return Ok(false);
            }
        }
        let prior = state.insert(id, incoming);
        if let Err(err) = self.flush(&state).await {
            match prior {
                Some(prior) => {
                    state.insert(id, prior);
                }
                None => {
                    state.remove(&id);
                }
            }
            return Err(err);
        }
        Ok(true)
    }

    /// Remove a record. Returns the removed record, or `None` when the id
    /// was unknown.
    pub async fn remove(&self, id: &PoemId) -> Result<Option<PoemRecord>> {
        let mut state = self.state.lock().await;
        let Some(prior) = state.remove(id) else {
            return Ok(None);
        };
        if let Err(err) = self.flush(&state).await {
            state.insert(*id, prior);
            return Err(err);
        }
        Ok(Some(prior))
    }

    pub async fn get(&self, id: &PoemId) -> Option<PoemRecord> {
        self.state.lock().await.get(id).cloned()
    }

    /// Snapshot of every record matching `pred`, newest first
    pub async fn query(&self, pred: impl Fn(&PoemRecord) -> bool) -> Vec<PoemRecord> {
        let state = self.state.lock().await;
        let mut out: Vec<PoemRecord> = state.values().filter(|r| pred(r)).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    /// Bare drafts owned by `author`
    pub async fn my_drafts(&self, author: &UserId) -> Vec<PoemRecord> {
        let author = author.clone();
        self.query(move |r| r.author_id == author && r.state() == PoemState::Draft)
            .await
    }

    /// The author's personal library
    pub async fn my_collection(&self, author: &UserId) -> Vec<PoemRecord> {
        let author = author.clone();
        self.query(move |r| r.author_id == author && r.in_collection)
            .await
    }

    /// Poems by `author` visible in the square
    pub async fn published_by(&self, author: &UserId) -> Vec<PoemRecord> {
        let author = author.clone();
        self.query(move |r| r.author_id == author && r.state() == PoemState::Published)
            .await
    }

    /// Case-insensitive keyword search over title and body
    pub async fn search(&self, keyword: &str) -> Vec<PoemRecord> {
        let needle = keyword.to_lowercase();
        self.query(move |r| {
            r.title.to_lowercase().contains(&needle) || r.body.to_lowercase().contains(&needle)
        })
        .await
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_empty()
    }

    /// Persist the full store. Ordering is deterministic so identical
    /// states always produce identical blobs.
    async fn flush(&self, state: &HashMap<PoemId, PoemRecord>) -> Result<()> {
        let mut records: Vec<PoemRecord> = state.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Err(err) = self.storage.save_all(&records).await {
            warn!(error = %err, "durable write failed, rolling back");
            return Err(err.into());
        }
        Ok(())
    }
}
