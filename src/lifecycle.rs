//! Lifecycle rules - pure state transitions over a poem record
//!
//! No I/O. Every function validates its precondition, mutates the record in
//! place, and advances `updated_at`. Callers (the cache and the gateway) are
//! responsible for persisting the result.
//!
//! States and transitions:
//!
//! ```text
//! DRAFT ──save──► COLLECTED ──publish──► PENDING_PUBLISH ──audit──► PUBLISHED
//!   │                                         ▲                        │
//!   └───────────publish (auto-collect)────────┘◄─────────edit──────────┘
//!                                              └──audit──► REJECTED
//! ```
//!
//! Audit results come only from remote events, never from local user action.

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::record::{AuditStatus, PoemPatch, PoemRecord, PoemState};

/// Result of a save-to-collection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The poem was already in the collection; the call is a no-op
    AlreadySaved,
}

/// Audit verdict carried by a remote moderation event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditVerdict {
    Published,
    Rejected { reason: String },
}

/// DRAFT → COLLECTED. Idempotent: an already-collected poem reports
/// `AlreadySaved` instead of erroring.
pub fn save_to_collection(
    record: &mut PoemRecord,
    now: DateTime<Utc>,
) -> Result<SaveOutcome, ValidationError> {
    if record.body.trim().is_empty() {
        return Err(ValidationError::EmptyBody);
    }
    if record.in_collection {
        return Ok(SaveOutcome::AlreadySaved);
    }
    record.in_collection = true;
    record.touch(now);
    Ok(SaveOutcome::Saved)
}

/// COLLECTED → PENDING_PUBLISH. Publishing a bare draft auto-applies
/// DRAFT → COLLECTED → PENDING_PUBLISH as one step. Publishing an
/// already-published poem is rejected, not retried.
pub fn request_publish(
    record: &mut PoemRecord,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if record.in_square {
        return Err(ValidationError::AlreadyPublished);
    }
    if record.body.trim().is_empty() {
        return Err(ValidationError::EmptyBody);
    }
    record.in_collection = true;
    record.in_square = true;
    record.audit_status = AuditStatus::Pending;
    record.square_published_at = Some(now);
    record.touch(now);
    Ok(())
}

/// PENDING_PUBLISH → PUBLISHED | REJECTED. Triggered only by a remote
/// audit-result event.
pub fn apply_audit_result(
    record: &mut PoemRecord,
    verdict: AuditVerdict,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if record.state() != PoemState::PendingPublish {
        return Err(ValidationError::NotPendingAudit);
    }
    match verdict {
        AuditVerdict::Published => {
            record.audit_status = AuditStatus::Published;
            record.rejection_reason = None;
            record.has_unpublished_changes = false;
        }
        AuditVerdict::Rejected { reason } => {
            record.audit_status = AuditStatus::Rejected;
            record.rejection_reason = Some(reason);
        }
    }
    record.touch(now);
    Ok(())
}

/// Apply a content edit. Editing a PUBLISHED poem flips it back to
/// PENDING_PUBLISH with `has_unpublished_changes` set: edits require
/// re-review before they reappear in the square.
pub fn apply_edit(
    record: &mut PoemRecord,
    patch: &PoemPatch,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if let Some(body) = &patch.body {
        // A poem past the bare-draft stage must keep a non-empty body
        if body.trim().is_empty() && record.in_collection {
            return Err(ValidationError::EmptyBody);
        }
    }

    let was_published = record.state() == PoemState::Published;

    if let Some(title) = &patch.title {
        record.title = title.clone();
    }
    if let Some(body) = &patch.body {
        record.body = body.clone();
    }
    if was_published {
        record.audit_status = AuditStatus::Pending;
        record.has_unpublished_changes = true;
    }
    record.touch(now);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::UserId;

    fn draft(body: &str) -> PoemRecord {
        PoemRecord::new_draft("", body, UserId::from("author-1"), Utc::now())
    }

    #[test]
    fn test_save_requires_body() {
        let mut record = draft("   ");
        let err = save_to_collection(&mut record, Utc::now());
        assert_eq!(err, Err(ValidationError::EmptyBody));
        assert_eq!(record.state(), PoemState::Draft);
    }

    #[test]
    fn test_save_is_idempotent() {
        let mut record = draft("路灯一盏盏亮起");
        assert_eq!(
            save_to_collection(&mut record, Utc::now()),
            Ok(SaveOutcome::Saved)
        );
        assert_eq!(record.state(), PoemState::Collected);

        // Second call reports already-saved, still one record
        assert_eq!(
            save_to_collection(&mut record, Utc::now()),
            Ok(SaveOutcome::AlreadySaved)
        );
        assert_eq!(record.state(), PoemState::Collected);
    }

    #[test]
    fn test_publish_shortcut_from_draft() {
        let mut record = draft("晚风穿过旧巷");
        request_publish(&mut record, Utc::now()).unwrap();

        assert!(record.in_collection);
        assert!(record.in_square);
        assert_eq!(record.audit_status, AuditStatus::Pending);
        assert!(record.square_published_at.is_some());
        assert!(record.check_invariants().is_ok());
    }

    #[test]
    fn test_publish_twice_rejected() {
        let mut record = draft("晚风穿过旧巷");
        request_publish(&mut record, Utc::now()).unwrap();
        let err = request_publish(&mut record, Utc::now());
        assert_eq!(err, Err(ValidationError::AlreadyPublished));
    }

    #[test]
    fn test_publish_empty_body_rejected() {
        let mut record = draft("");
        let err = request_publish(&mut record, Utc::now());
        assert_eq!(err, Err(ValidationError::EmptyBody));
        assert!(!record.in_square);
    }

    #[test]
    fn test_audit_verdicts() {
        let mut record = draft("雪落无声");
        request_publish(&mut record, Utc::now()).unwrap();

        apply_audit_result(&mut record, AuditVerdict::Published, Utc::now()).unwrap();
        assert_eq!(record.state(), PoemState::Published);
        assert!(record.rejection_reason.is_none());

        // Edit sends it back to pending; rejection carries a reason
        apply_edit(
            &mut record,
            &PoemPatch {
                body: Some("雪落有声".into()),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        apply_audit_result(
            &mut record,
            AuditVerdict::Rejected {
                reason: "content policy".into(),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(record.state(), PoemState::Rejected);
        assert_eq!(record.rejection_reason.as_deref(), Some("content policy"));
    }

    #[test]
    fn test_audit_requires_pending() {
        let mut record = draft("雪落无声");
        let err = apply_audit_result(&mut record, AuditVerdict::Published, Utc::now());
        assert_eq!(err, Err(ValidationError::NotPendingAudit));
    }

    #[test]
    fn test_edit_published_triggers_reaudit() {
        let mut record = draft("旧信纸上的折痕");
        request_publish(&mut record, Utc::now()).unwrap();
        apply_audit_result(&mut record, AuditVerdict::Published, Utc::now()).unwrap();

        apply_edit(
            &mut record,
            &PoemPatch {
                title: Some("折痕".into()),
                body: Some("旧信纸上的折痕还在".into()),
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(record.audit_status, AuditStatus::Pending);
        assert!(record.has_unpublished_changes);
        assert_eq!(record.state(), PoemState::PendingPublish);
    }

    #[test]
    fn test_edit_collected_keeps_state() {
        let mut record = draft("一行白鹭");
        save_to_collection(&mut record, Utc::now()).unwrap();
        apply_edit(
            &mut record,
            &PoemPatch {
                body: Some("两行白鹭".into()),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(record.state(), PoemState::Collected);
        assert!(!record.has_unpublished_changes);
    }

    #[test]
    fn test_edit_cannot_empty_collected_body() {
        let mut record = draft("一行白鹭");
        save_to_collection(&mut record, Utc::now()).unwrap();
        let err = apply_edit(
            &mut record,
            &PoemPatch {
                body: Some("  ".into()),
                ..Default::default()
            },
            Utc::now(),
        );
        assert_eq!(err, Err(ValidationError::EmptyBody));
        assert_eq!(record.body, "一行白鹭");
    }
}
