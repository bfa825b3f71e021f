//! Realtime reconciler - merges push events into the local cache
//!
//! Consumes the asynchronous stream of remote change events (poem
//! inserts/updates/deletes and like inserts/deletes) and folds them into the
//! cache. Conflict policy is last-writer-wins by `updated_at`: an incoming
//! poem only replaces the local one when strictly newer, so echoes of the
//! client's own writes fall out naturally.
//!
//! Like events adjust `square_like_count` only. They never touch
//! `is_liked_by_viewer` - that flag changes solely through the viewer's own
//! gateway intents - and an event for the viewer's own like is an echo of an
//! action already applied optimistically, so it is dropped.
//!
//! Nothing in here surfaces an error to the user. A malformed or stale event
//! is logged and dropped; the stream's liveness is its transport's problem.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::AuthProvider;
use crate::cache::PoemCache;
use crate::record::PoemId;
use crate::wire::{ChangeEvent, ChangeOp, ChangeTable, RemoteLikeRecord, RemotePoemKey, RemotePoemRecord};

/// Why an event was not applied. Internal only - reconciliation failures are
/// logged, never surfaced.
#[derive(Debug, Error)]
enum ReconcileDrop {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("stale update (local copy is newer)")]
    Stale,

    #[error("echo of the viewer's own action")]
    OwnEcho,

    #[error("unknown poem {0}")]
    UnknownPoem(PoemId),

    #[error("persistence failed: {0}")]
    Persistence(String),
}

/// Background merger of realtime change events
pub struct Reconciler {
    cache: Arc<PoemCache>,
    auth: Arc<dyn AuthProvider>,
}

impl Reconciler {
    pub fn new(cache: Arc<PoemCache>, auth: Arc<dyn AuthProvider>) -> Self {
        Self { cache, auth }
    }

    /// Drain the event stream until it ends. Never returns an error; every
    /// failure is logged against the event that caused it.
    pub async fn run<S>(&self, mut events: S)
    where
        S: Stream<Item = ChangeEvent> + Unpin,
    {
        while let Some(event) = events.next().await {
            if let Err(reason) = self.apply_event(event).await {
                match reason {
                    ReconcileDrop::Stale | ReconcileDrop::OwnEcho => {
                        debug!(%reason, "dropped realtime event")
                    }
                    _ => warn!(%reason, "dropped realtime event"),
                }
            }
        }
        info!("realtime event stream closed");
    }

    /// Apply one event to the cache
    async fn apply_event(&self, event: ChangeEvent) -> Result<(), ReconcileDrop> {
        match event.table {
            ChangeTable::Poems => self.apply_poem_event(event).await,
            ChangeTable::Likes => self.apply_like_event(event).await,
        }
    }

    async fn apply_poem_event(&self, event: ChangeEvent) -> Result<(), ReconcileDrop> {
        if event.op == ChangeOp::Delete {
            let key: RemotePoemKey = serde_json::from_value(event.record)
                .map_err(|e| ReconcileDrop::Malformed(e.to_string()))?;
            let id = PoemId::parse(&key.id)
                .ok_or_else(|| ReconcileDrop::Malformed(format!("invalid poem id: {}", key.id)))?;
            let removed = self
                .cache
                .remove(&id)
                .await
                .map_err(|e| ReconcileDrop::Persistence(e.to_string()))?;
            if removed.is_some() {
                debug!(%id, "poem removed by remote delete");
            }
            return Ok(());
        }

        let raw: RemotePoemRecord = serde_json::from_value(event.record)
            .map_err(|e| ReconcileDrop::Malformed(e.to_string()))?;
        let local = match PoemId::parse(&raw.id) {
            Some(id) => self.cache.get(&id).await,
            None => None,
        };
        let incoming = raw
            .into_record_with_local(local.as_ref())
            .map_err(|e| ReconcileDrop::Malformed(e.to_string()))?;
        if let Err(violation) = incoming.check_invariants() {
            return Err(ReconcileDrop::Malformed(violation.to_string()));
        }

        let id = incoming.id;
        let applied = self
            .cache
            .merge_newer(incoming)
            .await
            .map_err(|e| ReconcileDrop::Persistence(e.to_string()))?;
        if !applied {
            return Err(ReconcileDrop::Stale);
        }
        debug!(%id, "poem merged from realtime event");
        Ok(())
    }

    async fn apply_like_event(&self, event: ChangeEvent) -> Result<(), ReconcileDrop> {
        let like: RemoteLikeRecord = serde_json::from_value(event.record)
            .map_err(|e| ReconcileDrop::Malformed(e.to_string()))?;
        let id = PoemId::parse(&like.poem_id).ok_or_else(|| {
            ReconcileDrop::Malformed(format!("invalid poem id: {}", like.poem_id))
        })?;

        // The viewer's own like/unlike was already applied optimistically
        if let Some(viewer) = self.auth.current_user_id() {
            if viewer.0 == like.user_id {
                return Err(ReconcileDrop::OwnEcho);
            }
        }

        let delta = match event.op {
            ChangeOp::Insert => 1i64,
            ChangeOp::Delete => -1i64,
            // The like relation has no meaningful updates
            ChangeOp::Update => return Ok(()),
        };

        if self.cache.get(&id).await.is_none() {
            return Err(ReconcileDrop::UnknownPoem(id));
        }
        self.cache
            .mutate(&id, |record| {
                record.square_like_count = if delta > 0 {
                    record.square_like_count.saturating_add(1)
                } else {
                    record.square_like_count.saturating_sub(1)
                };
                Ok(())
            })
            .await
            .map_err(|e| ReconcileDrop::Persistence(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DurableStorage;
    use crate::error::StorageError;
    use crate::record::{PoemRecord, UserId};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use futures_util::stream;
    use serde_json::json;

    struct NullStorage;

    #[async_trait]
    impl DurableStorage for NullStorage {
        async fn load_all(&self) -> Result<Vec<PoemRecord>, StorageError> {
            Ok(Vec::new())
        }
        async fn save_all(&self, _records: &[PoemRecord]) -> Result<(), StorageError> {
            Ok(())
        }
    }

    struct FixedAuth(Option<UserId>);

    impl AuthProvider for FixedAuth {
        fn current_user_id(&self) -> Option<UserId> {
            self.0.clone()
        }
    }

    fn reconciler(viewer: &str) -> (Reconciler, Arc<PoemCache>) {
        let cache = Arc::new(PoemCache::new(Arc::new(NullStorage)));
        let reconciler = Reconciler::new(
            Arc::clone(&cache),
            Arc::new(FixedAuth(Some(UserId::from(viewer)))),
        );
        (reconciler, cache)
    }

    async fn seeded_poem(cache: &PoemCache, author: &str, likes: u32) -> PoemRecord {
        let record = cache
            .create_draft("", "清晨的雾", UserId::from(author))
            .await
            .unwrap();
        cache
            .mutate(&record.id, |r| {
                r.square_like_count = likes;
                Ok(())
            })
            .await
            .unwrap();
        cache.get(&record.id).await.unwrap()
    }

    fn poem_update_event(local: &PoemRecord, body: &str, offset_secs: i64) -> ChangeEvent {
        let mut wire = RemotePoemRecord::from_record(local);
        wire.content = body.to_string();
        wire.liked_by_viewer = None;
        wire.favorited_by_viewer = None;
        wire.updated_at = local.updated_at + Duration::seconds(offset_secs);
        ChangeEvent {
            table: ChangeTable::Poems,
            op: ChangeOp::Update,
            record: serde_json::to_value(&wire).unwrap(),
        }
    }

    fn like_event(op: ChangeOp, poem: &PoemRecord, user: &str) -> ChangeEvent {
        ChangeEvent {
            table: ChangeTable::Likes,
            op,
            record: json!({ "poem_id": poem.id.to_string(), "user_id": user }),
        }
    }

    #[tokio::test]
    async fn test_newer_update_applies_older_is_dropped() {
        let (reconciler, cache) = reconciler("viewer-1");
        let local = seeded_poem(&cache, "author-1", 0).await;

        reconciler
            .apply_event(poem_update_event(&local, "newer body", 30))
            .await
            .unwrap();
        assert_eq!(cache.get(&local.id).await.unwrap().body, "newer body");

        let err = reconciler
            .apply_event(poem_update_event(&local, "ancient body", -30))
            .await;
        assert!(matches!(err, Err(ReconcileDrop::Stale)));
        assert_eq!(cache.get(&local.id).await.unwrap().body, "newer body");
    }

    #[tokio::test]
    async fn test_out_of_order_events_converge_on_newest() {
        let (reconciler, cache) = reconciler("viewer-1");
        let local = seeded_poem(&cache, "author-1", 0).await;

        // T1 arrives first, then the older T0 - final state reflects T1
        let events = stream::iter(vec![
            poem_update_event(&local, "t1 payload", 20),
            poem_update_event(&local, "t0 payload", 10),
        ]);
        reconciler.run(events).await;

        assert_eq!(cache.get(&local.id).await.unwrap().body, "t1 payload");
    }

    #[tokio::test]
    async fn test_insert_event_adds_unknown_poem() {
        let (reconciler, cache) = reconciler("viewer-1");
        let foreign =
            PoemRecord::new_draft("远方", "别人的诗", UserId::from("author-2"), Utc::now());
        let mut wire = RemotePoemRecord::from_record(&foreign);
        wire.is_saved = true;
        wire.is_published = true;
        wire.audit_state = crate::record::AuditStatus::Published;

        reconciler
            .apply_event(ChangeEvent {
                table: ChangeTable::Poems,
                op: ChangeOp::Insert,
                record: serde_json::to_value(&wire).unwrap(),
            })
            .await
            .unwrap();
        assert!(cache.get(&foreign.id).await.is_some());
    }

    #[tokio::test]
    async fn test_delete_event_removes_poem() {
        let (reconciler, cache) = reconciler("viewer-1");
        let local = seeded_poem(&cache, "author-1", 0).await;

        reconciler
            .apply_event(ChangeEvent {
                table: ChangeTable::Poems,
                op: ChangeOp::Delete,
                record: json!({ "id": local.id.to_string() }),
            })
            .await
            .unwrap();
        assert!(cache.get(&local.id).await.is_none());
    }

    #[tokio::test]
    async fn test_like_events_adjust_count_only() {
        let (reconciler, cache) = reconciler("viewer-1");
        let local = seeded_poem(&cache, "author-1", 5).await;

        reconciler
            .apply_event(like_event(ChangeOp::Insert, &local, "someone-else"))
            .await
            .unwrap();
        let record = cache.get(&local.id).await.unwrap();
        assert_eq!(record.square_like_count, 6);
        assert!(!record.is_liked_by_viewer);

        reconciler
            .apply_event(like_event(ChangeOp::Delete, &local, "someone-else"))
            .await
            .unwrap();
        assert_eq!(cache.get(&local.id).await.unwrap().square_like_count, 5);
    }

    #[tokio::test]
    async fn test_own_like_echo_is_dropped() {
        let (reconciler, cache) = reconciler("viewer-1");
        let local = seeded_poem(&cache, "author-1", 5).await;

        let err = reconciler
            .apply_event(like_event(ChangeOp::Insert, &local, "viewer-1"))
            .await;
        assert!(matches!(err, Err(ReconcileDrop::OwnEcho)));
        assert_eq!(cache.get(&local.id).await.unwrap().square_like_count, 5);
    }

    #[tokio::test]
    async fn test_like_count_never_goes_negative() {
        let (reconciler, cache) = reconciler("viewer-1");
        let local = seeded_poem(&cache, "author-1", 0).await;

        reconciler
            .apply_event(like_event(ChangeOp::Delete, &local, "someone-else"))
            .await
            .unwrap();
        assert_eq!(cache.get(&local.id).await.unwrap().square_like_count, 0);
    }

    #[tokio::test]
    async fn test_malformed_events_do_not_stop_the_stream() {
        let (reconciler, cache) = reconciler("viewer-1");
        let local = seeded_poem(&cache, "author-1", 0).await;

        let events = stream::iter(vec![
            ChangeEvent {
                table: ChangeTable::Poems,
                op: ChangeOp::Update,
                record: json!({ "garbage": true }),
            },
            ChangeEvent {
                table: ChangeTable::Likes,
                op: ChangeOp::Insert,
                record: json!("not even an object"),
            },
            poem_update_event(&local, "still merged", 30),
        ]);
        reconciler.run(events).await;

        assert_eq!(cache.get(&local.id).await.unwrap().body, "still merged");
    }

    #[tokio::test]
    async fn test_viewer_flags_survive_poem_update() {
        let (reconciler, cache) = reconciler("viewer-1");
        let local = seeded_poem(&cache, "author-1", 5).await;
        cache
            .mutate(&local.id, |r| {
                r.is_liked_by_viewer = true;
                r.is_favorited_by_viewer = true;
                Ok(())
            })
            .await
            .unwrap();
        let local = cache.get(&local.id).await.unwrap();

        reconciler
            .apply_event(poem_update_event(&local, "server body", 30))
            .await
            .unwrap();
        let merged = cache.get(&local.id).await.unwrap();
        assert_eq!(merged.body, "server body");
        assert!(merged.is_liked_by_viewer);
        assert!(merged.is_favorited_by_viewer);
    }
}
