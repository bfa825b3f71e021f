//! Stanza Engine - poem lifecycle and offline-first synchronization
//!
//! The state machine and consistency core of the Stanza poetry app: how a
//! piece of writing moves between draft, the author's collection and the
//! public square, and how the local cache stays consistent with the remote
//! authoritative store under optimistic mutation and realtime push events.
//!
//! ## Components
//!
//! - **Lifecycle**: pure state-transition rules (draft → collected →
//!   pending publish → published/rejected), no I/O
//! - **Cache**: the local cache manager; owns the record store, flushes to
//!   durable storage after every mutation
//! - **Gateway**: optimistic intents against the remote store with exact
//!   rollback and per-poem FIFO serialization
//! - **Reconciler**: merges realtime change events last-writer-wins, never
//!   interrupting the subscription
//!
//! Boundary collaborators (identity, remote API, durable storage, the push
//! transport) are injected as traits; see [`api`].

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod reconciler;
pub mod record;
pub mod storage;
pub mod wire;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, RemoteError, Result, StorageError, ValidationError};
pub use lifecycle::{AuditVerdict, SaveOutcome};
pub use record::{AuditStatus, PoemId, PoemPatch, PoemRecord, PoemState, UserId};
