//! Remote wire shapes and realtime change events
//!
//! The remote store speaks its own snake_case field names (`content`,
//! `is_published`, `like_count`, ...) which do not line up one-to-one with
//! the in-memory `PoemRecord`. All two-way mapping lives here so the gateway
//! and the reconciler share one definition of it.
//!
//! Write payloads are explicit typed patch structs with optional fields,
//! not loose key-value maps; absent fields are skipped on serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{AuditStatus, PoemId, PoemRecord, UserId};

/// Failure to map a remote payload into a local record
#[derive(Debug, Clone, Error)]
pub enum WireError {
    #[error("invalid poem id: {0}")]
    InvalidId(String),
}

/// Poem as the remote store represents it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePoemRecord {
    pub id: String,
    pub title: String,
    /// Remote name for the poem body
    pub content: String,
    pub author_id: String,
    /// Remote name for `in_collection`
    pub is_saved: bool,
    /// Remote name for `in_square`
    pub is_published: bool,
    pub audit_state: AuditStatus,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub comment_count: u32,
    /// Viewer-relative; the remote includes these only on authenticated
    /// feed reads, never on change events
    #[serde(default)]
    pub liked_by_viewer: Option<bool>,
    #[serde(default)]
    pub favorited_by_viewer: Option<bool>,
    #[serde(default)]
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemotePoemRecord {
    /// Map into the in-memory shape. Viewer flags default to false when the
    /// wire omitted them; callers that hold a local record should carry its
    /// flags over instead (see `Reconciler`).
    pub fn into_record(self) -> Result<PoemRecord, WireError> {
        let id = PoemId::parse(&self.id).ok_or_else(|| WireError::InvalidId(self.id.clone()))?;
        Ok(PoemRecord {
            id,
            title: self.title,
            body: self.content,
            author_id: UserId(self.author_id),
            created_at: self.created_at,
            updated_at: self.updated_at,
            in_collection: self.is_saved || self.is_published,
            in_square: self.is_published,
            audit_status: self.audit_state,
            square_published_at: self.published_at,
            square_like_count: self.like_count,
            square_comment_count: self.comment_count,
            is_liked_by_viewer: self.liked_by_viewer.unwrap_or(false),
            is_favorited_by_viewer: self.favorited_by_viewer.unwrap_or(false),
            has_unpublished_changes: false,
            rejection_reason: self.reject_reason,
        })
    }

    /// Map into the in-memory shape, carrying local-only state over from
    /// `local`. Change events and public feed rows never know who is looking
    /// at them, so the viewer flags survive wherever the wire omitted them.
    /// `has_unpublished_changes` is pure local bookkeeping the remote never
    /// tracks; it survives too, until an approved audit confirms the pending
    /// content.
    pub fn into_record_with_local(
        self,
        local: Option<&PoemRecord>,
    ) -> Result<PoemRecord, WireError> {
        let liked = self.liked_by_viewer;
        let favorited = self.favorited_by_viewer;
        let mut record = self.into_record()?;
        if let Some(local) = local {
            if liked.is_none() {
                record.is_liked_by_viewer = local.is_liked_by_viewer;
            }
            if favorited.is_none() {
                record.is_favorited_by_viewer = local.is_favorited_by_viewer;
            }
            if record.audit_status != AuditStatus::Published {
                record.has_unpublished_changes = local.has_unpublished_changes;
            }
        }
        Ok(record)
    }

    /// Map a local record into the remote shape for outbound writes
    pub fn from_record(record: &PoemRecord) -> Self {
        Self {
            id: record.id.to_string(),
            title: record.title.clone(),
            content: record.body.clone(),
            author_id: record.author_id.0.clone(),
            is_saved: record.in_collection,
            is_published: record.in_square,
            audit_state: record.audit_status,
            published_at: record.square_published_at,
            like_count: record.square_like_count,
            comment_count: record.square_comment_count,
            liked_by_viewer: Some(record.is_liked_by_viewer),
            favorited_by_viewer: Some(record.is_favorited_by_viewer),
            reject_reason: record.rejection_reason.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Outbound partial update for a poem's content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoemContentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Set to `Pending` when an edit to a published poem forces re-review
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_state: Option<AuditStatus>,
}

impl PoemContentPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.audit_state.is_none()
    }
}

/// Feed query parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedParams {
    pub page: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
}

impl FeedParams {
    pub fn page(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            author_id: None,
            keyword: None,
        }
    }
}

/// Row of the remote like relation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLikeRecord {
    pub poem_id: String,
    pub user_id: String,
}

/// Key-only payload carried by delete events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePoemKey {
    pub id: String,
}

/// Table a change event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    Poems,
    Likes,
}

/// Operation a change event carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One realtime change event as delivered by the push transport. The
/// `record` payload is table-specific and parsed lazily so a malformed
/// event can be dropped without failing the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: ChangeTable,
    pub op: ChangeOp,
    pub record: serde_json::Value,
}
