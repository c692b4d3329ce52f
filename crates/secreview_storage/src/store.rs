#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use secreview_kernel_contracts::audit::{
    AuditEvent, AuditEventId, AuditEventInput, AuditEventType, AuditTarget, TargetType,
};
use secreview_kernel_contracts::comment::{CommentId, CommentInput, CommentRecord, CommentSubject};
use secreview_kernel_contracts::directory::{
    IdentityRecord, OrgId, OrganizationRecord, RecordTypeId, RecordTypeRecord, UserId,
};
use secreview_kernel_contracts::notification::{
    NotificationId, NotificationInput, NotificationRecord, NotificationSubject, UnviewedKey,
};
use secreview_kernel_contracts::record::{ReviewRecord, ReviewRecordId};
use secreview_kernel_contracts::review::{Review, ReviewId};
use secreview_kernel_contracts::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("{table}: no row for key {key}")]
    NotFound { table: &'static str, key: String },
    #[error("{table}: foreign key {key} does not resolve")]
    ForeignKeyViolation { table: &'static str, key: String },
    #[error("{table}: duplicate key {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("{table} is append-only")]
    AppendOnlyViolation { table: &'static str },
    #[error("{table}: stale write for {key} (expected version {expected}, found {found})")]
    VersionConflict {
        table: &'static str,
        key: String,
        expected: u64,
        found: u64,
    },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

/// Result of writing a notification through the unviewed-key index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationUpsert {
    Inserted(NotificationId),
    Renewed(NotificationId),
}

impl NotificationUpsert {
    pub fn notification_id(self) -> NotificationId {
        match self {
            NotificationUpsert::Inserted(id) | NotificationUpsert::Renewed(id) => id,
        }
    }
}

/// In-memory system of record for the review lifecycle.
#[derive(Debug, Default)]
pub struct ReviewStore {
    identities: BTreeMap<UserId, IdentityRecord>,
    organizations: BTreeMap<OrgId, OrganizationRecord>,
    record_types: BTreeMap<RecordTypeId, RecordTypeRecord>,
    // Scoping relation: which orgs may see records of which type.
    record_type_scopes: BTreeSet<(OrgId, RecordTypeId)>,

    records: BTreeMap<ReviewRecordId, ReviewRecord>,
    reviews: BTreeMap<ReviewId, Review>,
    // Highest id ever inserted; deletes never lower these, so ids are not reissued.
    record_id_high_water: u64,
    review_id_high_water: u64,

    comments: BTreeMap<CommentId, CommentRecord>,
    next_comment_id: u64,

    // Append-only; only the monitor state of a row may change.
    audit_events: Vec<AuditEvent>,
    next_audit_event_id: u64,

    notifications: BTreeMap<NotificationId, NotificationRecord>,
    next_notification_id: u64,
    // At most one unviewed notification per (recipient, subject).
    notification_unviewed_index: BTreeMap<UnviewedKey, NotificationId>,
}

impl ReviewStore {
    pub fn new_in_memory() -> Self {
        Self {
            next_comment_id: 1,
            next_audit_event_id: 1,
            next_notification_id: 1,
            ..Self::default()
        }
    }

    // ------------------------
    // Directory tables.
    // ------------------------

    pub fn insert_identity(&mut self, record: IdentityRecord) -> Result<(), StorageError> {
        record.validate()?;
        if self.identities.contains_key(&record.user_id) {
            return Err(StorageError::DuplicateKey {
                table: "identities",
                key: record.user_id.to_string(),
            });
        }
        self.check_identity_fks(&record)?;
        self.identities.insert(record.user_id, record);
        Ok(())
    }

    pub fn update_identity(&mut self, record: IdentityRecord) -> Result<(), StorageError> {
        record.validate()?;
        if !self.identities.contains_key(&record.user_id) {
            return Err(StorageError::NotFound {
                table: "identities",
                key: record.user_id.to_string(),
            });
        }
        self.check_identity_fks(&record)?;
        self.identities.insert(record.user_id, record);
        Ok(())
    }

    fn check_identity_fks(&self, record: &IdentityRecord) -> Result<(), StorageError> {
        if let Some(org_id) = record.org_id {
            if !self.organizations.contains_key(&org_id) {
                return Err(StorageError::ForeignKeyViolation {
                    table: "identities.org_id",
                    key: org_id.to_string(),
                });
            }
        }
        if let Some(manager_id) = record.manager_id {
            if !self.identities.contains_key(&manager_id) {
                return Err(StorageError::ForeignKeyViolation {
                    table: "identities.manager_id",
                    key: manager_id.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn identity(&self, user_id: UserId) -> Option<&IdentityRecord> {
        self.identities.get(&user_id)
    }

    pub fn identities(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.identities.values()
    }

    pub fn insert_organization(&mut self, record: OrganizationRecord) -> Result<(), StorageError> {
        record.validate()?;
        if self.organizations.contains_key(&record.org_id) {
            return Err(StorageError::DuplicateKey {
                table: "organizations",
                key: record.org_id.to_string(),
            });
        }
        self.organizations.insert(record.org_id, record);
        Ok(())
    }

    pub fn update_organization(&mut self, record: OrganizationRecord) -> Result<(), StorageError> {
        record.validate()?;
        if !self.organizations.contains_key(&record.org_id) {
            return Err(StorageError::NotFound {
                table: "organizations",
                key: record.org_id.to_string(),
            });
        }
        self.organizations.insert(record.org_id, record);
        Ok(())
    }

    pub fn organization(&self, org_id: OrgId) -> Option<&OrganizationRecord> {
        self.organizations.get(&org_id)
    }

    /// Repoints member identities, org-owned records and reviews, and approver-org
    /// references from `from` to `to`, then drops `from` and its record-type
    /// scopes. All-or-nothing.
    pub fn migrate_and_delete_organization(
        &mut self,
        from: OrgId,
        to: OrgId,
    ) -> Result<(), StorageError> {
        if from == to {
            return Err(StorageError::ContractViolation(
                ContractViolation::InvalidValue {
                    field: "migrate_and_delete_organization.to",
                    reason: "must differ from the organization being deleted",
                },
            ));
        }
        if !self.organizations.contains_key(&from) {
            return Err(StorageError::NotFound {
                table: "organizations",
                key: from.to_string(),
            });
        }
        if !self.organizations.contains_key(&to) {
            return Err(StorageError::ForeignKeyViolation {
                table: "organizations",
                key: to.to_string(),
            });
        }
        for identity in self.identities.values_mut() {
            if identity.org_id == Some(from) {
                identity.org_id = Some(to);
            }
        }
        for record in self.records.values_mut() {
            if record.org_created == Some(from) {
                record.org_created = Some(to);
            }
        }
        for review in self.reviews.values_mut() {
            if review.org_created == Some(from) {
                review.org_created = Some(to);
            }
        }
        for org in self.organizations.values_mut() {
            if org.approvers.organizations.remove(&from) {
                org.approvers.organizations.insert(to);
            }
        }
        for identity in self.identities.values_mut() {
            if identity.approvers.organizations.remove(&from) {
                identity.approvers.organizations.insert(to);
            }
        }
        self.record_type_scopes.retain(|(org, _)| *org != from);
        self.organizations.remove(&from);
        Ok(())
    }

    pub fn insert_record_type(&mut self, record: RecordTypeRecord) -> Result<(), StorageError> {
        record.validate()?;
        if self.record_types.contains_key(&record.record_type_id) {
            return Err(StorageError::DuplicateKey {
                table: "record_types",
                key: record.record_type_id.to_string(),
            });
        }
        self.record_types.insert(record.record_type_id, record);
        Ok(())
    }

    pub fn record_type(&self, record_type_id: RecordTypeId) -> Option<&RecordTypeRecord> {
        self.record_types.get(&record_type_id)
    }

    pub fn record_type_ids(&self) -> BTreeSet<RecordTypeId> {
        self.record_types
            .values()
            .filter(|rt| rt.active)
            .map(|rt| rt.record_type_id)
            .collect()
    }

    pub fn scope_record_type_to_org(
        &mut self,
        org_id: OrgId,
        record_type_id: RecordTypeId,
    ) -> Result<(), StorageError> {
        if !self.organizations.contains_key(&org_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "record_type_scopes.org_id",
                key: org_id.to_string(),
            });
        }
        if !self.record_types.contains_key(&record_type_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "record_type_scopes.record_type_id",
                key: record_type_id.to_string(),
            });
        }
        self.record_type_scopes.insert((org_id, record_type_id));
        Ok(())
    }

    pub fn unscope_record_type_from_org(&mut self, org_id: OrgId, record_type_id: RecordTypeId) {
        self.record_type_scopes.remove(&(org_id, record_type_id));
    }

    pub fn org_record_types(&self, org_id: OrgId) -> BTreeSet<RecordTypeId> {
        self.record_type_scopes
            .iter()
            .filter(|(org, _)| *org == org_id)
            .map(|(_, rt)| *rt)
            .collect()
    }

    // ------------------------
    // Records and reviews.
    // ------------------------

    pub fn next_record_id(&self) -> ReviewRecordId {
        ReviewRecordId(self.record_id_high_water.saturating_add(1))
    }

    pub fn insert_record(&mut self, record: ReviewRecord) -> Result<(), StorageError> {
        record.validate()?;
        if self.records.contains_key(&record.record_id) {
            return Err(StorageError::DuplicateKey {
                table: "records",
                key: record.record_id.to_string(),
            });
        }
        self.check_record_fks(&record)?;
        self.record_id_high_water = self.record_id_high_water.max(record.record_id.0);
        self.records.insert(record.record_id, record);
        Ok(())
    }

    pub fn update_record(&mut self, record: ReviewRecord) -> Result<(), StorageError> {
        record.validate()?;
        if !self.records.contains_key(&record.record_id) {
            return Err(StorageError::NotFound {
                table: "records",
                key: record.record_id.to_string(),
            });
        }
        self.check_record_fks(&record)?;
        self.records.insert(record.record_id, record);
        Ok(())
    }

    fn check_record_fks(&self, record: &ReviewRecord) -> Result<(), StorageError> {
        if !self.record_types.contains_key(&record.record_type_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "records.record_type_id",
                key: record.record_type_id.to_string(),
            });
        }
        if let Some(owner) = record.owner {
            if !self.identities.contains_key(&owner) {
                return Err(StorageError::ForeignKeyViolation {
                    table: "records.owner",
                    key: owner.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn record(&self, record_id: ReviewRecordId) -> Option<&ReviewRecord> {
        self.records.get(&record_id)
    }

    /// Deletes the record, its reviews and every comment attached to any of them.
    /// Returns the ids of the removed reviews.
    pub fn delete_record(
        &mut self,
        record_id: ReviewRecordId,
    ) -> Result<Vec<ReviewId>, StorageError> {
        if self.records.remove(&record_id).is_none() {
            return Err(StorageError::NotFound {
                table: "records",
                key: record_id.to_string(),
            });
        }
        let review_ids: Vec<ReviewId> = self
            .reviews
            .values()
            .filter(|r| r.record_id == record_id)
            .map(|r| r.review_id)
            .collect();
        for review_id in &review_ids {
            self.reviews.remove(review_id);
            self.purge_notifications_for(TargetType::Review, review_id.0);
        }
        self.purge_notifications_for(TargetType::Record, record_id.0);
        let removed: BTreeSet<ReviewId> = review_ids.iter().copied().collect();
        self.comments.retain(|_, c| match c.subject {
            CommentSubject::Record(id) => id != record_id,
            _ => c
                .subject
                .review_id()
                .is_some_and(|id| !removed.contains(&id)),
        });
        debug!(
            record_id = record_id.0,
            reviews = review_ids.len(),
            "record deleted with cascade"
        );
        Ok(review_ids)
    }

    pub fn next_review_id(&self) -> ReviewId {
        ReviewId(self.review_id_high_water.saturating_add(1))
    }

    pub fn insert_review(&mut self, review: Review) -> Result<(), StorageError> {
        review.validate()?;
        if self.reviews.contains_key(&review.review_id) {
            return Err(StorageError::DuplicateKey {
                table: "reviews",
                key: review.review_id.to_string(),
            });
        }
        if !self.records.contains_key(&review.record_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "reviews.record_id",
                key: review.record_id.to_string(),
            });
        }
        if let Some(reviewer) = review.reviewer {
            if !self.identities.contains_key(&reviewer) {
                return Err(StorageError::ForeignKeyViolation {
                    table: "reviews.reviewer",
                    key: reviewer.to_string(),
                });
            }
        }
        self.review_id_high_water = self.review_id_high_water.max(review.review_id.0);
        self.reviews.insert(review.review_id, review);
        Ok(())
    }

    pub fn review(&self, review_id: ReviewId) -> Option<&Review> {
        self.reviews.get(&review_id)
    }

    pub fn reviews_for_record(&self, record_id: ReviewRecordId) -> Vec<&Review> {
        self.reviews
            .values()
            .filter(|r| r.record_id == record_id)
            .collect()
    }

    /// Reviewers currently assigned to any review of the record.
    pub fn reviewers_for_record(&self, record_id: ReviewRecordId) -> BTreeSet<UserId> {
        self.reviews
            .values()
            .filter(|r| r.record_id == record_id)
            .filter_map(|r| r.reviewer)
            .collect()
    }

    /// Optimistic write: succeeds only if the stored row is still at `expected_version`.
    /// Returns the new version.
    pub fn commit_review(
        &mut self,
        mut review: Review,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let Some(current) = self.reviews.get(&review.review_id) else {
            return Err(StorageError::NotFound {
                table: "reviews",
                key: review.review_id.to_string(),
            });
        };
        if current.version != expected_version {
            return Err(StorageError::VersionConflict {
                table: "reviews",
                key: review.review_id.to_string(),
                expected: expected_version,
                found: current.version,
            });
        }
        if current.record_id != review.record_id {
            return Err(StorageError::ContractViolation(
                ContractViolation::InvalidValue {
                    field: "reviews.record_id",
                    reason: "a review cannot move between records",
                },
            ));
        }
        if let Some(reviewer) = review.reviewer {
            if !self.identities.contains_key(&reviewer) {
                return Err(StorageError::ForeignKeyViolation {
                    table: "reviews.reviewer",
                    key: reviewer.to_string(),
                });
            }
        }
        review.version = expected_version.saturating_add(1);
        review.validate()?;
        let version = review.version;
        self.reviews.insert(review.review_id, review);
        Ok(version)
    }

    /// Deletes the review, the comments attached to it or its findings and
    /// every notification about it.
    pub fn delete_review(&mut self, review_id: ReviewId) -> Result<Review, StorageError> {
        let Some(review) = self.reviews.remove(&review_id) else {
            return Err(StorageError::NotFound {
                table: "reviews",
                key: review_id.to_string(),
            });
        };
        self.comments
            .retain(|_, c| c.subject.review_id() != Some(review_id));
        self.purge_notifications_for(TargetType::Review, review_id.0);
        Ok(review)
    }

    // ------------------------
    // Comments.
    // ------------------------

    pub fn append_comment(&mut self, input: CommentInput) -> Result<CommentId, StorageError> {
        input.validate()?;
        if !self.identities.contains_key(&input.author) {
            return Err(StorageError::ForeignKeyViolation {
                table: "comments.author",
                key: input.author.to_string(),
            });
        }
        let subject_exists = match input.subject {
            CommentSubject::Record(id) => self.records.contains_key(&id),
            CommentSubject::Review(id) | CommentSubject::Finding { review_id: id, .. } => {
                self.reviews.contains_key(&id)
            }
        };
        if !subject_exists {
            return Err(StorageError::ForeignKeyViolation {
                table: "comments.subject",
                key: format!("{:?}", input.subject),
            });
        }
        let comment_id = CommentId(self.next_comment_id);
        let row = CommentRecord::from_input_v1(comment_id, input)?;
        self.next_comment_id = self.next_comment_id.saturating_add(1);
        self.comments.insert(comment_id, row);
        Ok(comment_id)
    }

    pub fn comment(&self, comment_id: CommentId) -> Option<&CommentRecord> {
        self.comments.get(&comment_id)
    }

    pub fn comments_for_subject(&self, subject: &CommentSubject) -> Vec<&CommentRecord> {
        self.comments
            .values()
            .filter(|c| c.subject == *subject)
            .collect()
    }

    /// Comments on the record itself and on any of its reviews or findings.
    pub fn comments_for_record(&self, record_id: ReviewRecordId) -> Vec<&CommentRecord> {
        self.comments
            .values()
            .filter(|c| match c.subject {
                CommentSubject::Record(id) => id == record_id,
                _ => c
                    .subject
                    .review_id()
                    .and_then(|id| self.reviews.get(&id))
                    .is_some_and(|r| r.record_id == record_id),
            })
            .collect()
    }

    // ------------------------
    // Audit ledger.
    // ------------------------

    pub fn append_audit_event(
        &mut self,
        input: AuditEventInput,
    ) -> Result<AuditEventId, StorageError> {
        input.validate()?;
        if !self.identities.contains_key(&input.actor) {
            return Err(StorageError::ForeignKeyViolation {
                table: "audit_events.actor",
                key: input.actor.to_string(),
            });
        }
        let event_id = AuditEventId(self.next_audit_event_id);
        let ev = AuditEvent::from_input_v1(event_id, input)?;
        self.next_audit_event_id = self.next_audit_event_id.saturating_add(1);
        self.audit_events.push(ev);
        Ok(event_id)
    }

    pub fn audit_events(&self) -> &[AuditEvent] {
        &self.audit_events
    }

    pub fn audit_event(&self, event_id: AuditEventId) -> Option<&AuditEvent> {
        self.audit_events.iter().find(|e| e.event_id == event_id)
    }

    pub fn attempt_overwrite_audit_event(
        &mut self,
        _event_id: AuditEventId,
    ) -> Result<(), StorageError> {
        Err(StorageError::AppendOnlyViolation {
            table: "audit_events",
        })
    }

    pub fn audit_events_by_type(&self, event_type: AuditEventType) -> Vec<&AuditEvent> {
        self.audit_events
            .iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Events with `from <= event_at < to`.
    pub fn audit_events_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<&AuditEvent> {
        self.audit_events
            .iter()
            .filter(|e| e.event_at >= from && e.event_at < to)
            .collect()
    }

    pub fn audit_events_for_target(&self, target: &AuditTarget) -> Vec<&AuditEvent> {
        self.audit_events
            .iter()
            .filter(|e| e.target_a == *target || e.target_b.as_ref() == Some(target))
            .collect()
    }

    /// The only mutation an audit row admits: monitor review state.
    pub fn set_audit_monitor_state(
        &mut self,
        event_id: AuditEventId,
        reviewed_by: UserId,
        flagged: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if !self.identities.contains_key(&reviewed_by) {
            return Err(StorageError::ForeignKeyViolation {
                table: "audit_events.reviewed_by",
                key: reviewed_by.to_string(),
            });
        }
        let Some(ev) = self.audit_events.iter_mut().find(|e| e.event_id == event_id) else {
            return Err(StorageError::NotFound {
                table: "audit_events",
                key: event_id.to_string(),
            });
        };
        ev.monitor.reviewed = true;
        ev.monitor.reviewed_at = Some(now);
        ev.monitor.reviewed_by = Some(reviewed_by);
        ev.monitor.flagged = flagged;
        Ok(())
    }

    // ------------------------
    // Notifications.
    // ------------------------

    /// Inserts, or renews the existing unviewed notification with the same key.
    pub fn upsert_notification(
        &mut self,
        input: NotificationInput,
    ) -> Result<NotificationUpsert, StorageError> {
        input.validate()?;
        if !self.identities.contains_key(&input.recipient) {
            return Err(StorageError::ForeignKeyViolation {
                table: "notifications.recipient",
                key: input.recipient.to_string(),
            });
        }
        let key = input.unviewed_key();
        if let Some(existing_id) = self.notification_unviewed_index.get(&key).copied() {
            let Some(existing) = self.notifications.get_mut(&existing_id) else {
                return Err(StorageError::ForeignKeyViolation {
                    table: "notification_unviewed_index",
                    key: existing_id.to_string(),
                });
            };
            existing.renewed_at = Some(input.now);
            existing.renewed_count = existing.renewed_count.saturating_add(1);
            return Ok(NotificationUpsert::Renewed(existing_id));
        }

        let notification_id = NotificationId(self.next_notification_id);
        let row = NotificationRecord::from_input_v1(notification_id, input)?;
        self.next_notification_id = self.next_notification_id.saturating_add(1);
        self.notification_unviewed_index.insert(key, notification_id);
        self.notifications.insert(notification_id, row);
        Ok(NotificationUpsert::Inserted(notification_id))
    }

    pub fn notification(&self, notification_id: NotificationId) -> Option<&NotificationRecord> {
        self.notifications.get(&notification_id)
    }

    pub fn mark_notification_read(
        &mut self,
        notification_id: NotificationId,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let Some(row) = self.notifications.get_mut(&notification_id) else {
            return Err(StorageError::NotFound {
                table: "notifications",
                key: notification_id.to_string(),
            });
        };
        if row.viewed {
            return Ok(());
        }
        row.viewed = true;
        row.viewed_at = Some(now);
        let key = row.unviewed_key();
        self.notification_unviewed_index.remove(&key);
        Ok(())
    }

    /// Returns how many notifications changed state.
    pub fn mark_all_notifications_read(&mut self, recipient: UserId, now: DateTime<Utc>) -> usize {
        let mut marked = 0;
        for row in self.notifications.values_mut() {
            if row.recipient == recipient && !row.viewed {
                row.viewed = true;
                row.viewed_at = Some(now);
                self.notification_unviewed_index.remove(&row.unviewed_key());
                marked += 1;
            }
        }
        marked
    }

    /// Unviewed notifications, most recent activity first.
    pub fn unread_notifications_for(&self, recipient: UserId) -> Vec<&NotificationRecord> {
        let mut out: Vec<&NotificationRecord> = self
            .notifications
            .values()
            .filter(|n| n.recipient == recipient && !n.viewed)
            .collect();
        out.sort_by(|a, b| {
            b.last_activity_at()
                .cmp(&a.last_activity_at())
                .then(b.notification_id.cmp(&a.notification_id))
        });
        out
    }

    pub fn notifications_for(&self, recipient: UserId) -> Vec<&NotificationRecord> {
        self.notifications
            .values()
            .filter(|n| n.recipient == recipient)
            .collect()
    }

    /// Drops every notification about a deleted subject, read or not, with its
    /// unviewed-index entry.
    fn purge_notifications_for(&mut self, subject_type: TargetType, subject_id: u64) {
        let subject = NotificationSubject::new(subject_type, subject_id);
        self.notifications.retain(|_, n| n.subject != subject);
        self.notification_unviewed_index
            .retain(|(_, key_subject), _| *key_subject != subject);
    }
}
