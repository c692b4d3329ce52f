#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};

use secreview_kernel_contracts::audit::{
    AuditEvent, AuditEventId, AuditEventInput, AuditEventType, AuditTarget,
};
use secreview_kernel_contracts::directory::UserId;
use secreview_kernel_contracts::notification::{
    NotificationId, NotificationInput, NotificationRecord,
};
use secreview_kernel_contracts::record::ReviewRecordId;
use secreview_kernel_contracts::review::{Review, ReviewId};

use crate::store::{NotificationUpsert, ReviewStore, StorageError};

/// Typed repository interface for the append-only audit ledger.
pub trait AuditRepo {
    fn append_audit_row(&mut self, input: AuditEventInput) -> Result<AuditEventId, StorageError>;
    fn audit_rows(&self) -> &[AuditEvent];
    fn audit_rows_by_type(&self, event_type: AuditEventType) -> Vec<&AuditEvent>;
    fn audit_rows_in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&AuditEvent>;
    fn audit_rows_for_target(&self, target: &AuditTarget) -> Vec<&AuditEvent>;
}

/// Typed repository interface for notifications keyed by the unviewed index.
pub trait NotificationRepo {
    fn upsert_notification_row(
        &mut self,
        input: NotificationInput,
    ) -> Result<NotificationUpsert, StorageError>;
    fn notification_row(&self, notification_id: NotificationId) -> Option<&NotificationRecord>;
    fn unread_notification_rows(&self, recipient: UserId) -> Vec<&NotificationRecord>;
}

/// Typed repository interface for review rows with optimistic concurrency.
pub trait ReviewRepo {
    fn review_row(&self, review_id: ReviewId) -> Option<&Review>;
    fn review_rows_for_record(&self, record_id: ReviewRecordId) -> Vec<&Review>;
    fn commit_review_row(&mut self, review: Review, expected_version: u64)
        -> Result<u64, StorageError>;
}

impl AuditRepo for ReviewStore {
    fn append_audit_row(&mut self, input: AuditEventInput) -> Result<AuditEventId, StorageError> {
        self.append_audit_event(input)
    }

    fn audit_rows(&self) -> &[AuditEvent] {
        self.audit_events()
    }

    fn audit_rows_by_type(&self, event_type: AuditEventType) -> Vec<&AuditEvent> {
        self.audit_events_by_type(event_type)
    }

    fn audit_rows_in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&AuditEvent> {
        self.audit_events_in_range(from, to)
    }

    fn audit_rows_for_target(&self, target: &AuditTarget) -> Vec<&AuditEvent> {
        self.audit_events_for_target(target)
    }
}

impl NotificationRepo for ReviewStore {
    fn upsert_notification_row(
        &mut self,
        input: NotificationInput,
    ) -> Result<NotificationUpsert, StorageError> {
        self.upsert_notification(input)
    }

    fn notification_row(&self, notification_id: NotificationId) -> Option<&NotificationRecord> {
        self.notification(notification_id)
    }

    fn unread_notification_rows(&self, recipient: UserId) -> Vec<&NotificationRecord> {
        self.unread_notifications_for(recipient)
    }
}

impl ReviewRepo for ReviewStore {
    fn review_row(&self, review_id: ReviewId) -> Option<&Review> {
        self.review(review_id)
    }

    fn review_rows_for_record(&self, record_id: ReviewRecordId) -> Vec<&Review> {
        self.reviews_for_record(record_id)
    }

    fn commit_review_row(
        &mut self,
        review: Review,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        self.commit_review(review, expected_version)
    }
}
