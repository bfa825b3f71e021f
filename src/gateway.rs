//! Remote sync gateway - optimistic intents against the remote store
//!
//! Every local intent (publish, like, unlike, favorite, unfavorite, comment,
//! edit, delete) maps to exactly one outbound request and runs through one
//! generic executor:
//!
//! 1. apply the optimistic local mutation and flush, so the UI reflects the
//!    action with no perceived latency,
//! 2. issue the remote request under the configured timeout,
//! 3. on success, reconcile the authoritative fields the response carries
//!    back over the optimistic guess,
//! 4. on failure, undo the optimistic mutation and surface the error. When
//!    nothing else touched the record the exact pre-intent snapshot comes
//!    back; when the reconciler merged a newer record while the request was
//!    in flight, only the fields the intent changed are undone and the
//!    merged record stands - never a blind re-fetch, never a lost remote
//!    update.
//!
//! Requests for a single poem are serialized through a per-id async mutex;
//! tokio's mutex wakes waiters in FIFO order, so a second intent on the same
//! id queues behind the first instead of interleaving with it. A timed-out
//! call is a failure like any other and triggers the same rollback.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{AuthProvider, RemotePoemApi, SocialAck};
use crate::cache::PoemCache;
use crate::config::EngineConfig;
use crate::error::{EngineError, RemoteError, Result, ValidationError};
use crate::lifecycle::{self, SaveOutcome};
use crate::record::{AuditStatus, PoemId, PoemPatch, PoemRecord, PoemState, UserId};
use crate::wire::{FeedParams, PoemContentPatch, RemotePoemRecord};

/// Outcome of the optimistic apply step
enum IntentStep {
    /// Local state changed; issue the remote request
    Proceed,
    /// The record already reflected the intent; skip the remote request and
    /// report success
    AlreadyApplied,
}

/// Gateway between local intents and the remote poem store
pub struct SyncGateway {
    cache: Arc<PoemCache>,
    api: Arc<dyn RemotePoemApi>,
    auth: Arc<dyn AuthProvider>,
    config: EngineConfig,
    /// Per-poem intent serialization; a missing entry means no request is in
    /// flight for that id
    inflight: DashMap<PoemId, Arc<Mutex<()>>>,
}

impl SyncGateway {
    pub fn new(
        cache: Arc<PoemCache>,
        api: Arc<dyn RemotePoemApi>,
        auth: Arc<dyn AuthProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            cache,
            api,
            auth,
            config,
            inflight: DashMap::new(),
        }
    }

    /// Save a poem into the collection. The collection is local-first: the
    /// lifecycle transition commits locally, then the poem is backed up to
    /// the author's cloud library best-effort. A failed backup is logged and
    /// never undoes the local save.
    pub async fn save_to_collection(&self, id: &PoemId) -> Result<SaveOutcome> {
        let lock = self.intent_lock(id);
        let guard = lock.lock().await;
        let res = self.save_to_collection_locked(id).await;
        drop(guard);
        self.prune_intent_lock(id, lock);
        res
    }

    async fn save_to_collection_locked(&self, id: &PoemId) -> Result<SaveOutcome> {
        let outcome = self.cache.save_to_collection(id).await?;
        if outcome == SaveOutcome::Saved {
            if let Some(record) = self.cache.get(id).await {
                let wire = RemotePoemRecord::from_record(&record);
                if let Err(err) = self.with_timeout(self.api.create_draft(&wire)).await {
                    warn!(%id, error = %err, "cloud backup of collection save failed");
                }
            }
        }
        Ok(outcome)
    }

    /// Publish a poem to the square. A bare draft is collected and published
    /// in one step; an already-published poem is rejected before any request
    /// goes out.
    pub async fn publish(&self, id: &PoemId) -> Result<()> {
        let api = Arc::clone(&self.api);
        let poem = *id;
        self.run_intent(
            poem,
            |record| {
                lifecycle::request_publish(record, Utc::now())?;
                Ok(IntentStep::Proceed)
            },
            async move { api.publish(&poem).await },
            |record, remote: RemotePoemRecord| {
                record.audit_status = remote.audit_state;
                if remote.published_at.is_some() {
                    record.square_published_at = remote.published_at;
                }
                record.square_like_count = remote.like_count;
                record.square_comment_count = remote.comment_count;
            },
            |record, snapshot| {
                record.in_collection = snapshot.in_collection;
                record.in_square = snapshot.in_square;
                record.audit_status = snapshot.audit_status;
                record.square_published_at = snapshot.square_published_at;
            },
            false,
        )
        .await?;
        info!(%id, "publish submitted");
        Ok(())
    }

    /// Edit a poem's content. Unpublished poems are edited locally only;
    /// a poem in the square also pushes the patch remotely, flagged for
    /// re-review when it was already published. Both branches run under the
    /// per-id intent lock, so an edit queues behind an in-flight publish
    /// instead of racing its rollback.
    pub async fn edit(&self, id: &PoemId, patch: PoemPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let lock = self.intent_lock(id);
        let guard = lock.lock().await;
        let res = self.edit_locked(id, patch).await;
        drop(guard);
        self.prune_intent_lock(id, lock);
        res
    }

    async fn edit_locked(&self, id: &PoemId, patch: PoemPatch) -> Result<()> {
        let current = self.cache.get(id).await.ok_or(EngineError::NotFound(*id))?;
        if !current.in_square {
            self.cache.update(id, &patch).await?;
            return Ok(());
        }

        let wire_patch = PoemContentPatch {
            title: patch.title.clone(),
            content: patch.body.clone(),
            audit_state: (current.state() == PoemState::Published).then_some(AuditStatus::Pending),
        };
        let api = Arc::clone(&self.api);
        let poem = *id;
        self.run_intent_locked(
            poem,
            move |record| {
                lifecycle::apply_edit(record, &patch, Utc::now())?;
                Ok(IntentStep::Proceed)
            },
            async move { api.update_poem(&poem, &wire_patch).await },
            |record, remote: RemotePoemRecord| {
                record.audit_status = remote.audit_state;
                record.square_like_count = remote.like_count;
                record.square_comment_count = remote.comment_count;
            },
            |record, snapshot| {
                record.title = snapshot.title.clone();
                record.body = snapshot.body.clone();
                record.audit_status = snapshot.audit_status;
                record.has_unpublished_changes = snapshot.has_unpublished_changes;
            },
            false,
        )
        .await
    }

    /// Like a poem as the current viewer. Already-liked is a no-op; a
    /// duplicate reported by the remote is success, the optimistic state
    /// was already correct.
    pub async fn like(&self, id: &PoemId) -> Result<()> {
        let viewer = self.viewer()?;
        let api = Arc::clone(&self.api);
        let poem = *id;
        self.run_intent(
            poem,
            |record| {
                if record.is_liked_by_viewer {
                    return Ok(IntentStep::AlreadyApplied);
                }
                record.is_liked_by_viewer = true;
                record.square_like_count = record.square_like_count.saturating_add(1);
                Ok(IntentStep::Proceed)
            },
            async move { api.like(&viewer, &poem).await },
            |record, ack: SocialAck| {
                if let Some(count) = ack.like_count {
                    record.square_like_count = count;
                }
            },
            |record, snapshot| {
                record.is_liked_by_viewer = snapshot.is_liked_by_viewer;
                record.square_like_count = record.square_like_count.saturating_sub(1);
            },
            true,
        )
        .await
    }

    /// Withdraw the viewer's like
    pub async fn unlike(&self, id: &PoemId) -> Result<()> {
        let viewer = self.viewer()?;
        let api = Arc::clone(&self.api);
        let poem = *id;
        self.run_intent(
            poem,
            |record| {
                if !record.is_liked_by_viewer {
                    return Ok(IntentStep::AlreadyApplied);
                }
                record.is_liked_by_viewer = false;
                record.square_like_count = record.square_like_count.saturating_sub(1);
                Ok(IntentStep::Proceed)
            },
            async move { api.unlike(&viewer, &poem).await },
            |record, ack: SocialAck| {
                if let Some(count) = ack.like_count {
                    record.square_like_count = count;
                }
            },
            |record, snapshot| {
                record.is_liked_by_viewer = snapshot.is_liked_by_viewer;
                record.square_like_count = record.square_like_count.saturating_add(1);
            },
            true,
        )
        .await
    }

    /// Mark the poem as a favorite of the current viewer
    pub async fn favorite(&self, id: &PoemId) -> Result<()> {
        let viewer = self.viewer()?;
        let api = Arc::clone(&self.api);
        let poem = *id;
        self.run_intent(
            poem,
            |record| {
                if record.is_favorited_by_viewer {
                    return Ok(IntentStep::AlreadyApplied);
                }
                record.is_favorited_by_viewer = true;
                Ok(IntentStep::Proceed)
            },
            async move { api.favorite(&viewer, &poem).await },
            |_record, _ack: ()| {},
            |record, snapshot| {
                record.is_favorited_by_viewer = snapshot.is_favorited_by_viewer;
            },
            true,
        )
        .await
    }

    pub async fn unfavorite(&self, id: &PoemId) -> Result<()> {
        let viewer = self.viewer()?;
        let api = Arc::clone(&self.api);
        let poem = *id;
        self.run_intent(
            poem,
            |record| {
                if !record.is_favorited_by_viewer {
                    return Ok(IntentStep::AlreadyApplied);
                }
                record.is_favorited_by_viewer = false;
                Ok(IntentStep::Proceed)
            },
            async move { api.unfavorite(&viewer, &poem).await },
            |_record, _ack: ()| {},
            |record, snapshot| {
                record.is_favorited_by_viewer = snapshot.is_favorited_by_viewer;
            },
            true,
        )
        .await
    }

    /// Comment on a poem. The local comment count is bumped optimistically
    /// and reconciled from the ack.
    pub async fn add_comment(&self, id: &PoemId, body: &str) -> Result<()> {
        if body.trim().is_empty() {
            return Err(ValidationError::EmptyComment.into());
        }
        let viewer = self.viewer()?;
        let api = Arc::clone(&self.api);
        let poem = *id;
        let body = body.to_string();
        self.run_intent(
            poem,
            |record| {
                record.square_comment_count = record.square_comment_count.saturating_add(1);
                Ok(IntentStep::Proceed)
            },
            async move { api.add_comment(&viewer, &poem, &body).await },
            |record, ack: SocialAck| {
                if let Some(count) = ack.comment_count {
                    record.square_comment_count = count;
                }
            },
            |record, _snapshot| {
                record.square_comment_count = record.square_comment_count.saturating_sub(1);
            },
            false,
        )
        .await
    }

    /// Delete a poem everywhere. The local record is removed optimistically;
    /// if the poem has a remote counterpart and the remote delete fails, the
    /// record is reinstated. A record the reconciler re-added with newer
    /// content while the request was in flight wins over the snapshot.
    pub async fn delete(&self, id: &PoemId) -> Result<()> {
        let lock = self.intent_lock(id);
        let guard = lock.lock().await;
        let res = self.delete_locked(id).await;
        drop(guard);
        self.prune_intent_lock(id, lock);
        res
    }

    async fn delete_locked(&self, id: &PoemId) -> Result<()> {
        let Some(snapshot) = self.cache.remove(id).await? else {
            return Ok(());
        };
        // A bare draft never left this device
        if !snapshot.in_collection && !snapshot.in_square {
            return Ok(());
        }
        match self.with_timeout(self.api.delete_poem(id)).await {
            Ok(()) => {
                debug!(%id, "deleted remotely");
                Ok(())
            }
            Err(err) if err.is_duplicate() => Ok(()),
            Err(err) => {
                warn!(%id, error = %err, "remote delete failed, reinstating record");
                self.cache.merge_newer(snapshot).await?;
                Err(err.into())
            }
        }
    }

    /// Fetch a feed page and merge it into the cache last-writer-wins.
    /// Read-only reconciliation, so a transient failure is retried once.
    /// Returns the number of records that were applied.
    pub async fn refresh_feed(&self, params: &FeedParams) -> Result<usize> {
        let page = match self.with_timeout(self.api.fetch_feed(params)).await {
            Ok(page) => page,
            Err(RemoteError::Network(_)) | Err(RemoteError::Timeout) => {
                debug!("feed fetch failed, retrying once");
                self.with_timeout(self.api.fetch_feed(params)).await?
            }
            Err(err) => return Err(err.into()),
        };

        let mut applied = 0;
        for raw in page {
            let local = match PoemId::parse(&raw.id) {
                Some(id) => self.cache.get(&id).await,
                None => None,
            };
            let record = match raw.into_record_with_local(local.as_ref()) {
                Ok(record) => record,
                Err(err) => {
                    warn!(error = %err, "skipping malformed feed record");
                    continue;
                }
            };
            if let Err(violation) = record.check_invariants() {
                warn!(id = %record.id, violation, "skipping invariant-violating feed record");
                continue;
            }
            if self.cache.merge_newer(record).await? {
                applied += 1;
            }
        }
        debug!(applied, "feed refresh merged");
        Ok(applied)
    }

    /// First page of the public feed with the configured page size
    pub fn default_feed_params(&self) -> FeedParams {
        FeedParams::page(0, self.config.feed_page_size)
    }

    fn viewer(&self) -> Result<UserId> {
        self.auth
            .current_user_id()
            .ok_or_else(|| ValidationError::NotSignedIn.into())
    }

    fn intent_lock(&self, id: &PoemId) -> Arc<Mutex<()>> {
        let entry = self
            .inflight
            .entry(*id)
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(entry.value())
    }

    /// Drop the caller's handle and drop the map entry when no other task
    /// holds or awaits the lock, so the map does not grow with every poem
    /// ever touched. `remove_if` holds the shard lock, so a concurrent
    /// `intent_lock` cannot clone the entry mid-check.
    fn prune_intent_lock(&self, id: &PoemId, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.inflight
            .remove_if(id, |_, entry| Arc::strong_count(entry) == 1);
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = std::result::Result<T, RemoteError>>,
    ) -> std::result::Result<T, RemoteError> {
        match tokio::time::timeout(self.config.remote_timeout(), fut).await {
            Ok(res) => res,
            Err(_) => Err(RemoteError::Timeout),
        }
    }

    /// The generic optimistic-intent executor. `apply` runs against the
    /// local record under the per-id lock, `remote` is the single outbound
    /// request, `reconcile` folds the authoritative response back in, and
    /// `revert` undoes exactly the fields `apply` touched.
    async fn run_intent<T, Fut>(
        &self,
        id: PoemId,
        apply: impl FnOnce(&mut PoemRecord) -> std::result::Result<IntentStep, ValidationError>,
        remote: Fut,
        reconcile: impl FnOnce(&mut PoemRecord, T),
        revert: impl FnOnce(&mut PoemRecord, &PoemRecord),
        duplicate_ok: bool,
    ) -> Result<()>
    where
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
    {
        let lock = self.intent_lock(&id);
        let guard = lock.lock().await;
        let res = self
            .run_intent_locked(id, apply, remote, reconcile, revert, duplicate_ok)
            .await;
        drop(guard);
        self.prune_intent_lock(&id, lock);
        res
    }

    async fn run_intent_locked<T, Fut>(
        &self,
        id: PoemId,
        apply: impl FnOnce(&mut PoemRecord) -> std::result::Result<IntentStep, ValidationError>,
        remote: Fut,
        reconcile: impl FnOnce(&mut PoemRecord, T),
        revert: impl FnOnce(&mut PoemRecord, &PoemRecord),
        duplicate_ok: bool,
    ) -> Result<()>
    where
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
    {
        let snapshot = self.cache.get(&id).await.ok_or(EngineError::NotFound(id))?;
        let (step, optimistic) = self
            .cache
            .mutate(&id, |record| {
                let step = apply(record)?;
                Ok((step, record.clone()))
            })
            .await?;
        if matches!(step, IntentStep::AlreadyApplied) {
            return Ok(());
        }

        match self.with_timeout(remote).await {
            Ok(response) => {
                self.cache
                    .mutate(&id, |record| {
                        reconcile(record, response);
                        Ok(())
                    })
                    .await?;
                Ok(())
            }
            Err(err) if duplicate_ok && err.is_duplicate() => {
                debug!(%id, "duplicate acknowledged, optimistic state stands");
                Ok(())
            }
            Err(err) => {
                warn!(%id, error = %err, "remote call failed, rolling back");
                // The reconciler bypasses the intent lock, so a newer record
                // may have merged while the request was in flight. Untouched
                // means the whole snapshot comes back; otherwise only the
                // optimistic delta is undone and the merged record stands.
                let restore = self
                    .cache
                    .mutate(&id, |record| {
                        if *record == optimistic {
                            *record = snapshot.clone();
                        } else {
                            revert(record, &snapshot);
                        }
                        Ok(())
                    })
                    .await;
                match restore {
                    Ok(()) => {}
                    // A remote delete event removed the record mid-flight
                    Err(EngineError::NotFound(_)) => {}
                    Err(other) => return Err(other),
                }
                Err(err.into())
            }
        }
    }
}
