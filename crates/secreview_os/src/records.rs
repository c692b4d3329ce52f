#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use tracing::info;

use secreview_engines::access::{self, ActorContext, ReviewDeleteFacts};
use secreview_kernel_contracts::audit::{AuditEventType, AuditTarget, TargetType};
use secreview_kernel_contracts::directory::{RecordTypeId, UserId};
use secreview_kernel_contracts::record::{ReviewRecord, ReviewRecordId};
use secreview_kernel_contracts::review::{Review, ReviewId};
use secreview_kernel_contracts::{ContractViolation, Validate};
use secreview_storage::store::ReviewStore;

use crate::emitter::SideEffects;
use crate::linked_system::LinkedEvent;
use crate::runtime::{
    reason_codes, ActorRequest, LifecycleError, LifecycleOutcome, ReviewLifecycleRuntime,
};

/// Intake form for a new review record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub record_type_id: RecordTypeId,
    pub name: String,
    pub owner: Option<UserId>,
    /// `None` takes the record type's default.
    pub private: Option<bool>,
    pub linked_eid: Option<String>,
}

impl NewRecord {
    pub fn v1(record_type_id: RecordTypeId, name: impl Into<String>) -> Self {
        Self {
            record_type_id,
            name: name.into(),
            owner: None,
            private: None,
            linked_eid: None,
        }
    }
}

impl ReviewLifecycleRuntime {
    fn modifiable_record(
        &self,
        store: &ReviewStore,
        req: &ActorRequest,
        record_id: ReviewRecordId,
        action: &'static str,
    ) -> Result<(ActorContext, ReviewRecord), LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let record = self.load_record(store, record_id)?;
        let facts = self.record_facts(store, &actor, &record);
        self.gate(&actor, action, access::can_modify(&actor, &facts))?;
        Ok((actor, record))
    }

    fn require_identity(&self, store: &ReviewStore, user_id: UserId) -> Result<(), LifecycleError> {
        self.identity(store, user_id).map(|_| ())
    }

    pub fn create_record(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        new: NewRecord,
    ) -> Result<LifecycleOutcome<ReviewRecord>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let all_types = store.record_type_ids();
        self.gate(
            &actor,
            "create_record",
            access::can_create_record(&actor, new.record_type_id, &all_types),
        )?;
        let default_private = store
            .record_type(new.record_type_id)
            .is_some_and(|rt| rt.default_private);
        if let Some(owner) = new.owner {
            self.require_identity(store, owner)?;
        }

        let mut record = ReviewRecord::v1(
            store.next_record_id(),
            new.record_type_id,
            new.name,
            actor.org_id,
            req.now,
        )?;
        record.owner = new.owner;
        record.private = new.private.unwrap_or(default_private);
        record.linked_eid = new.linked_eid;
        record.validate()?;
        let audit =
            self.record_audit(store, req, AuditEventType::RecordCreate, &record, None, &[])?;

        store.insert_record(record.clone())?;
        info!(
            record_id = record.record_id.0,
            actor = req.actor.0,
            "record created"
        );

        let mut effects = SideEffects::new();
        effects.audit(store, audit);
        self.dispatch_linked(store, req, &actor, &record, LinkedEvent::Create, &mut effects);
        Ok(LifecycleOutcome::from_effects(record, effects))
    }

    pub fn rename_record(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        record_id: ReviewRecordId,
        name: impl Into<String>,
    ) -> Result<LifecycleOutcome<ReviewRecord>, LifecycleError> {
        let (_, mut record) = self.modifiable_record(store, req, record_id, "rename_record")?;
        let from_name = std::mem::replace(&mut record.name, name.into());
        record.validate()?;
        let audit = self.record_audit(
            store,
            req,
            AuditEventType::RecordRename,
            &record,
            None,
            &[("from_name", from_name), ("to_name", record.name.clone())],
        )?;
        store.update_record(record.clone())?;

        let mut effects = SideEffects::new();
        effects.audit(store, audit);
        Ok(LifecycleOutcome::from_effects(record, effects))
    }

    /// Sets or clears the record owner; the linked system hears about the reassignment.
    pub fn assign_record_owner(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        record_id: ReviewRecordId,
        owner: Option<UserId>,
    ) -> Result<LifecycleOutcome<ReviewRecord>, LifecycleError> {
        let (actor, mut record) =
            self.modifiable_record(store, req, record_id, "assign_record_owner")?;
        if let Some(owner) = owner {
            self.require_identity(store, owner)?;
        }
        record.owner = owner;
        let owner_name =
            owner.map_or_else(|| "nobody".to_string(), |o| self.display_name(store, o));
        let audit = self.record_audit(
            store,
            req,
            AuditEventType::RecordOwnerAssign,
            &record,
            owner.map(|o| AuditTarget::new(TargetType::User, o)),
            &[("user_name", owner_name)],
        )?;
        store.update_record(record.clone())?;

        let mut effects = SideEffects::new();
        effects.audit(store, audit);
        self.dispatch_linked(
            store,
            req,
            &actor,
            &record,
            LinkedEvent::Reassign { new_owner: owner },
            &mut effects,
        );
        Ok(LifecycleOutcome::from_effects(record, effects))
    }

    /// Unchanged flags commit nothing and emit nothing.
    pub fn set_record_privacy(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        record_id: ReviewRecordId,
        private: bool,
    ) -> Result<LifecycleOutcome<ReviewRecord>, LifecycleError> {
        let (_, mut record) = self.modifiable_record(store, req, record_id, "set_record_privacy")?;
        if record.private == private {
            return Ok(LifecycleOutcome::from_effects(record, SideEffects::new()));
        }
        record.private = private;
        let event_type = if private {
            AuditEventType::RecordMadePrivate
        } else {
            AuditEventType::RecordMadeNotPrivate
        };
        let audit = self.record_audit(store, req, event_type, &record, None, &[])?;
        store.update_record(record.clone())?;

        let mut effects = SideEffects::new();
        effects.audit(store, audit);
        Ok(LifecycleOutcome::from_effects(record, effects))
    }

    pub fn set_record_global(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        record_id: ReviewRecordId,
        global: bool,
    ) -> Result<LifecycleOutcome<ReviewRecord>, LifecycleError> {
        let (_, mut record) = self.modifiable_record(store, req, record_id, "set_record_global")?;
        if record.global == global {
            return Ok(LifecycleOutcome::from_effects(record, SideEffects::new()));
        }
        record.global = global;
        let event_type = if global {
            AuditEventType::RecordMadeGlobal
        } else {
            AuditEventType::RecordMadeNotGlobal
        };
        let audit = self.record_audit(store, req, event_type, &record, None, &[])?;
        store.update_record(record.clone())?;

        let mut effects = SideEffects::new();
        effects.audit(store, audit);
        Ok(LifecycleOutcome::from_effects(record, effects))
    }

    /// Replaces the explicit allow-list. Every listed identity must exist.
    pub fn set_record_allow_list(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        record_id: ReviewRecordId,
        allow_list: BTreeSet<UserId>,
    ) -> Result<LifecycleOutcome<ReviewRecord>, LifecycleError> {
        let (_, mut record) =
            self.modifiable_record(store, req, record_id, "set_record_allow_list")?;
        if allow_list.len() > self.config().max_allow_list {
            return Err(LifecycleError::InvalidInput(ContractViolation::InvalidValue {
                field: "review_record.allow_list",
                reason: "exceeds configured max_allow_list",
            }));
        }
        for user_id in &allow_list {
            self.require_identity(store, *user_id)?;
        }
        if record.allow_list == allow_list {
            return Ok(LifecycleOutcome::from_effects(record, SideEffects::new()));
        }
        let names = |ids: Vec<&UserId>| -> String {
            if ids.is_empty() {
                return "none".to_string();
            }
            ids.into_iter()
                .map(|id| self.display_name(store, *id))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let added = names(allow_list.difference(&record.allow_list).collect());
        let removed = names(record.allow_list.difference(&allow_list).collect());
        record.allow_list = allow_list;
        let audit = self.record_audit(
            store,
            req,
            AuditEventType::RecordAllowListChange,
            &record,
            None,
            &[
                ("added", added),
                ("removed", removed),
                ("entries", record.allow_list.len().to_string()),
            ],
        )?;
        store.update_record(record.clone())?;
        info!(
            record_id = record.record_id.0,
            actor = req.actor.0,
            entries = record.allow_list.len(),
            "record allow-list replaced"
        );

        let mut effects = SideEffects::new();
        effects.audit(store, audit);
        Ok(LifecycleOutcome::from_effects(record, effects))
    }

    /// Opens a new review cycle. Reviews started by contractor identities are contractor
    /// reviews.
    pub fn start_review(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        record_id: ReviewRecordId,
        name: impl Into<String>,
        reviewer: Option<UserId>,
    ) -> Result<LifecycleOutcome<Review>, LifecycleError> {
        let (actor, record) = self.modifiable_record(store, req, record_id, "start_review")?;
        if let Some(reviewer) = reviewer {
            self.require_identity(store, reviewer)?;
        }
        let review = Review::v1(
            store.next_review_id(),
            record.record_id,
            name,
            reviewer,
            actor.org_id,
            actor.contractor,
            req.now,
        )?;
        self.insert_new_review(store, req, &actor, &record, review, None)
    }

    /// Hands the record to a contractor organization as a fresh contractor review.
    pub fn pass_to_contractor(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        record_id: ReviewRecordId,
        name: impl Into<String>,
    ) -> Result<LifecycleOutcome<Review>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let record = self.load_record(store, record_id)?;
        let facts = self.record_facts(store, &actor, &record);
        self.gate(
            &actor,
            "pass_to_contractor",
            access::can_pass_to_contractor(&actor, &facts),
        )?;
        self.gate_writer(&actor, "pass_to_contractor", &facts)?;
        let passable = store
            .record_type(record.record_type_id)
            .is_some_and(|rt| rt.contractor_passable);
        if !passable {
            return Err(LifecycleError::InvalidStateTransition {
                reason_code: reason_codes::LIFECYCLE_CONTRACTOR_PASS_NOT_ALLOWED,
                message: "record type cannot be passed to contractors",
            });
        }
        let review = Review::v1(
            store.next_review_id(),
            record.record_id,
            name,
            None,
            actor.org_id,
            true,
            req.now,
        )?;
        self.insert_new_review(
            store,
            req,
            &actor,
            &record,
            review,
            Some("passed to contractor".to_string()),
        )
    }

    fn insert_new_review(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        actor: &ActorContext,
        record: &ReviewRecord,
        review: Review,
        details_text: Option<String>,
    ) -> Result<LifecycleOutcome<Review>, LifecycleError> {
        let audit = self.review_audit(
            store,
            req,
            AuditEventType::ReviewCreate,
            record,
            &review,
            details_text,
            &[],
        )?;
        store.insert_review(review.clone())?;
        info!(
            review_id = review.review_id.0,
            record_id = record.record_id.0,
            actor = req.actor.0,
            contractor_review = review.contractor_review,
            "review created"
        );

        let mut effects = SideEffects::new();
        effects.audit(store, audit);
        self.dispatch_linked(
            store,
            req,
            actor,
            record,
            LinkedEvent::NewReview(&review),
            &mut effects,
        );
        Ok(LifecycleOutcome::from_effects(review, effects))
    }

    /// Assigns, replaces or clears the reviewer. Re-assigning the same reviewer is a no-op.
    pub fn assign_reviewer(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        review_id: ReviewId,
        reviewer: Option<UserId>,
    ) -> Result<LifecycleOutcome<Review>, LifecycleError> {
        let review = self.load_review(store, review_id)?;
        let (_, record) = self.modifiable_record(store, req, review.record_id, "assign_reviewer")?;
        if review.reviewer == reviewer {
            return Ok(LifecycleOutcome::from_effects(review, SideEffects::new()));
        }
        if let Some(reviewer) = reviewer {
            self.require_identity(store, reviewer)?;
        }

        let mut next = review.clone();
        next.reviewer = reviewer;
        let (event_type, named) = match (reviewer, review.reviewer) {
            (Some(new), _) => (AuditEventType::ReviewReviewerAssigned, new),
            (None, Some(previous)) => (AuditEventType::ReviewReviewerUnassigned, previous),
            (None, None) => return Ok(LifecycleOutcome::from_effects(review, SideEffects::new())),
        };
        let audit = self.review_audit(
            store,
            req,
            event_type,
            &record,
            &next,
            None,
            &[("user_name", self.display_name(store, named))],
        )?;
        next.version = store.commit_review(next.clone(), review.version)?;

        let mut effects = SideEffects::new();
        effects.audit(store, audit);
        Ok(LifecycleOutcome::from_effects(next, effects))
    }

    /// Deletes the review and its discussion.
    pub fn delete_review(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        review_id: ReviewId,
    ) -> Result<LifecycleOutcome<Review>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let review = self.load_review(store, review_id)?;
        let record = self.load_record(store, review.record_id)?;
        let facts = ReviewDeleteFacts {
            reviewer: review.reviewer,
            reviewer_org: review
                .reviewer
                .and_then(|uid| store.identity(uid))
                .and_then(|i| i.org_id),
        };
        self.gate(&actor, "delete_review", access::can_delete_review(&actor, &facts))?;
        let record_facts = self.record_facts(store, &actor, &record);
        self.gate_writer(&actor, "delete_review", &record_facts)?;

        let audit = self.review_audit(
            store,
            req,
            AuditEventType::ReviewDelete,
            &record,
            &review,
            None,
            &[],
        )?;
        let removed = store.delete_review(review_id)?;
        info!(
            review_id = review_id.0,
            actor = req.actor.0,
            "review deleted"
        );

        let mut effects = SideEffects::new();
        effects.audit(store, audit);
        Ok(LifecycleOutcome::from_effects(removed, effects))
    }

    /// Deletes the record with all of its reviews and discussion. Returns the removed
    /// review ids.
    pub fn delete_record(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        record_id: ReviewRecordId,
    ) -> Result<LifecycleOutcome<Vec<ReviewId>>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let record = self.load_record(store, record_id)?;
        let facts = self.record_facts(store, &actor, &record);
        self.gate(&actor, "delete_record", access::can_delete_record(&actor, &facts))?;
        self.gate_writer(&actor, "delete_record", &facts)?;

        let audit =
            self.record_audit(store, req, AuditEventType::RecordDelete, &record, None, &[])?;
        let removed = store.delete_record(record_id)?;
        info!(
            record_id = record_id.0,
            actor = req.actor.0,
            reviews = removed.len(),
            "record deleted"
        );

        let mut effects = SideEffects::new();
        effects.audit(store, audit);
        self.dispatch_linked(store, req, &actor, &record, LinkedEvent::Delete, &mut effects);
        Ok(LifecycleOutcome::from_effects(removed, effects))
    }
}
