//! Poem records and derived lifecycle state
//!
//! `PoemRecord` is the central entity shared by the cache, the sync gateway
//! and the realtime reconciler. The location flag pair (`in_collection`,
//! `in_square`) is the single source of truth for where a poem lives; the
//! user-visible lifecycle state is always derived from it, never stored.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable poem identifier, assigned client-side at creation and never
/// reassigned. Used as the join key between local and remote representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoemId(Uuid);

impl PoemId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the remote wire representation
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for PoemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PoemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque user identifier from the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Moderation status of a publish request
///
/// Meaningful only once a poem has been pushed to the square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Never submitted for review
    NotPublished,
    /// Submitted, waiting for the remote audit
    Pending,
    /// Approved and visible in the square
    Published,
    /// Rejected by the remote audit; see `rejection_reason`
    Rejected,
}

/// Derived lifecycle state, computed from the flag pair + audit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoemState {
    Draft,
    Collected,
    PendingPublish,
    Published,
    Rejected,
}

/// Partial update to a poem's user text content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoemPatch {
    pub title: Option<String>,
    pub body: Option<String>,
}

impl PoemPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none()
    }
}

/// The central poem entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoemRecord {
    /// Client-assigned stable id
    pub id: PoemId,
    pub title: String,
    pub body: String,
    /// Owner; set once at creation, immutable
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
    /// Monotonically non-decreasing; advanced by content/lifecycle mutations
    pub updated_at: DateTime<Utc>,
    /// Saved to the author's personal library
    pub in_collection: bool,
    /// Published to the public feed; implies `in_collection`
    pub in_square: bool,
    pub audit_status: AuditStatus,
    /// Set when a publish is first requested
    pub square_published_at: Option<DateTime<Utc>>,
    /// Authoritative count as last seen from the remote store, modulo the
    /// optimistic-update rule in the gateway
    pub square_like_count: u32,
    pub square_comment_count: u32,
    /// Current viewer's relationship to the poem; reconciled independently of
    /// the poem content
    pub is_liked_by_viewer: bool,
    pub is_favorited_by_viewer: bool,
    /// Local title/body diverges from what was last confirmed published
    pub has_unpublished_changes: bool,
    /// Populated only when `audit_status == Rejected`
    pub rejection_reason: Option<String>,
}

impl PoemRecord {
    /// Create a bare draft: no location flags set, nothing published
    pub fn new_draft(
        title: impl Into<String>,
        body: impl Into<String>,
        author_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PoemId::new(),
            title: title.into(),
            body: body.into(),
            author_id,
            created_at: now,
            updated_at: now,
            in_collection: false,
            in_square: false,
            audit_status: AuditStatus::NotPublished,
            square_published_at: None,
            square_like_count: 0,
            square_comment_count: 0,
            is_liked_by_viewer: false,
            is_favorited_by_viewer: false,
            has_unpublished_changes: false,
            rejection_reason: None,
        }
    }

    /// Derive the lifecycle state from the flag pair and audit status
    pub fn state(&self) -> PoemState {
        if !self.in_square {
            if self.in_collection {
                PoemState::Collected
            } else {
                PoemState::Draft
            }
        } else {
            match self.audit_status {
                AuditStatus::Published => PoemState::Published,
                AuditStatus::Rejected => PoemState::Rejected,
                _ => PoemState::PendingPublish,
            }
        }
    }

    /// Advance `updated_at`, never moving it backwards
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Check the structural invariants: square implies collection, and a
    /// published audit status implies square
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        if self.in_square && !self.in_collection {
            return Err("in_square without in_collection");
        }
        if self.audit_status == AuditStatus::Published && !self.in_square {
            return Err("audit_status published without in_square");
        }
        Ok(())
    }
}
