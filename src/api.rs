//! Collaborator traits at the engine boundary
//!
//! The engine consumes these seams and never implements the remote side:
//! identity comes from `AuthProvider`, the authoritative store sits behind
//! `RemotePoemApi`, and local durability behind `DurableStorage`. Realtime
//! change events arrive as a plain `Stream<Item = ChangeEvent>` fed to the
//! reconciler; transport and session keep-alive are the event source's
//! problem.

use async_trait::async_trait;

use crate::error::{RemoteError, StorageError};
use crate::record::{PoemId, PoemRecord, UserId};
use crate::wire::{FeedParams, PoemContentPatch, RemotePoemRecord};

/// Identity collaborator
pub trait AuthProvider: Send + Sync {
    /// The signed-in user, or `None` when signed out
    fn current_user_id(&self) -> Option<UserId>;
}

/// Authoritative counts echoed back by social writes. Fields the remote
/// did not include are left as the optimistic guess.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SocialAck {
    #[serde(default)]
    pub like_count: Option<u32>,
    #[serde(default)]
    pub comment_count: Option<u32>,
}

/// Remote poem store. Each method is one HTTP-style request returning
/// success or a typed failure.
#[async_trait]
pub trait RemotePoemApi: Send + Sync {
    /// Upsert an unpublished poem into the author's cloud library
    async fn create_draft(&self, record: &RemotePoemRecord) -> Result<RemotePoemRecord, RemoteError>;

    async fn update_poem(
        &self,
        id: &PoemId,
        patch: &PoemContentPatch,
    ) -> Result<RemotePoemRecord, RemoteError>;

    /// Submit for publication; the returned record carries the
    /// server-assigned audit state
    async fn publish(&self, id: &PoemId) -> Result<RemotePoemRecord, RemoteError>;

    async fn fetch_feed(&self, params: &FeedParams) -> Result<Vec<RemotePoemRecord>, RemoteError>;

    async fn like(&self, user: &UserId, poem: &PoemId) -> Result<SocialAck, RemoteError>;

    async fn unlike(&self, user: &UserId, poem: &PoemId) -> Result<SocialAck, RemoteError>;

    async fn favorite(&self, user: &UserId, poem: &PoemId) -> Result<(), RemoteError>;

    async fn unfavorite(&self, user: &UserId, poem: &PoemId) -> Result<(), RemoteError>;

    async fn add_comment(
        &self,
        user: &UserId,
        poem: &PoemId,
        body: &str,
    ) -> Result<SocialAck, RemoteError>;

    async fn delete_poem(&self, id: &PoemId) -> Result<(), RemoteError>;
}

/// Opaque blob persistence for the local store. The engine saves the full
/// store after every mutation and never assumes an on-disk format.
#[async_trait]
pub trait DurableStorage: Send + Sync {
    async fn load_all(&self) -> Result<Vec<PoemRecord>, StorageError>;

    async fn save_all(&self, records: &[PoemRecord]) -> Result<(), StorageError>;
}
