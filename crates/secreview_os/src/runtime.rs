#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use secreview_engines::access::{
    self, AccessDecisionRecord, AccessRule, ActorContext, RecordAccessFacts,
};
use secreview_engines::approval;
use secreview_engines::review_state::{
    NotifyIntent, ReviewStateMachine, TransitionActor, TransitionPlan, TransitionRefusal,
};
use secreview_kernel_contracts::audit::{
    AuditEventId, AuditEventInput, AuditEventType, AuditTarget, TargetType,
};
use secreview_kernel_contracts::directory::{ApproverSet, IdentityRecord, UserId};
use secreview_kernel_contracts::linked::LinkedSystemAlert;
use secreview_kernel_contracts::notification::{
    NotificationClass, NotificationInput, NotificationSubject,
};
use secreview_kernel_contracts::record::{ReviewRecord, ReviewRecordId};
use secreview_kernel_contracts::review::{Review, ReviewId};
use secreview_kernel_contracts::{ContractViolation, ReasonCodeId, Validate};
use secreview_storage::store::{NotificationUpsert, ReviewStore, StorageError};

use crate::config::ReviewPolicyConfig;
use crate::emitter::{SideEffectWarning, SideEffects};
use crate::linked_system::{LinkedEvent, LinkedSystemRegistry};

pub mod reason_codes {
    use secreview_kernel_contracts::ReasonCodeId;

    // Lifecycle runtime reason-code namespace.
    pub const LIFECYCLE_CONTRACTOR_PASS_NOT_ALLOWED: ReasonCodeId = ReasonCodeId(0x4C43_0001);
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
    #[error("forbidden by rule `{}`", .rule.as_str())]
    Forbidden {
        rule: AccessRule,
        reason_code: ReasonCodeId,
    },
    #[error("invalid state transition: {message}")]
    InvalidStateTransition {
        reason_code: ReasonCodeId,
        message: &'static str,
    },
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ContractViolation),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<TransitionRefusal> for LifecycleError {
    fn from(refusal: TransitionRefusal) -> Self {
        LifecycleError::InvalidStateTransition {
            reason_code: refusal.reason_code,
            message: refusal.message,
        }
    }
}

/// Who is asking, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorRequest {
    pub actor: UserId,
    pub now: DateTime<Utc>,
    /// Non-contractor actors drive the linked system only when they ask for it.
    pub opt_in_linked_actions: bool,
}

impl ActorRequest {
    pub fn v1(actor: UserId, now: DateTime<Utc>) -> Self {
        Self {
            actor,
            now,
            opt_in_linked_actions: false,
        }
    }

    pub fn with_linked_actions(mut self) -> Self {
        self.opt_in_linked_actions = true;
        self
    }
}

/// A committed operation plus everything it caused.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleOutcome<T> {
    pub value: T,
    pub audit_event_id: Option<AuditEventId>,
    pub notifications: Vec<NotificationUpsert>,
    pub linked_alerts: Vec<LinkedSystemAlert>,
    pub warnings: Vec<SideEffectWarning>,
}

impl<T> LifecycleOutcome<T> {
    pub(crate) fn from_effects(value: T, effects: SideEffects) -> Self {
        Self {
            value,
            audit_event_id: effects.audit_event_id,
            notifications: effects.notifications,
            linked_alerts: effects.linked_alerts,
            warnings: effects.warnings,
        }
    }
}

/// Request pipeline: load facts, gate, plan, commit, then audit, notify and mirror.
#[derive(Debug)]
pub struct ReviewLifecycleRuntime {
    config: ReviewPolicyConfig,
    state_machine: ReviewStateMachine,
    linked_systems: LinkedSystemRegistry,
}

impl ReviewLifecycleRuntime {
    pub fn new(
        config: ReviewPolicyConfig,
        linked_systems: LinkedSystemRegistry,
    ) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self {
            config,
            state_machine: ReviewStateMachine::new(config.state_machine),
            linked_systems,
        })
    }

    pub fn config(&self) -> &ReviewPolicyConfig {
        &self.config
    }

    pub fn linked_systems(&self) -> &LinkedSystemRegistry {
        &self.linked_systems
    }

    pub(crate) fn state_machine(&self) -> &ReviewStateMachine {
        &self.state_machine
    }

    pub(crate) fn identity<'s>(
        &self,
        store: &'s ReviewStore,
        user_id: UserId,
    ) -> Result<&'s IdentityRecord, LifecycleError> {
        store
            .identity(user_id)
            .ok_or_else(|| LifecycleError::NotFound {
                entity: "identity",
                key: user_id.to_string(),
            })
    }

    pub(crate) fn actor_context(
        &self,
        store: &ReviewStore,
        user_id: UserId,
    ) -> Result<ActorContext, LifecycleError> {
        let identity = self.identity(store, user_id)?;
        Ok(context_for(store, identity))
    }

    pub(crate) fn transition_actor(
        &self,
        store: &ReviewStore,
        actor: &ActorContext,
    ) -> Result<TransitionActor, LifecycleError> {
        let identity = self.identity(store, actor.user_id)?;
        let org = identity.org_id.and_then(|o| store.organization(o));
        Ok(TransitionActor {
            user_id: actor.user_id,
            requires_approval: approval::requires_approval(identity, org),
            contractor: actor.contractor,
        })
    }

    pub(crate) fn load_record(
        &self,
        store: &ReviewStore,
        record_id: ReviewRecordId,
    ) -> Result<ReviewRecord, LifecycleError> {
        store
            .record(record_id)
            .cloned()
            .ok_or_else(|| LifecycleError::NotFound {
                entity: "record",
                key: record_id.to_string(),
            })
    }

    pub(crate) fn load_review(
        &self,
        store: &ReviewStore,
        review_id: ReviewId,
    ) -> Result<Review, LifecycleError> {
        store
            .review(review_id)
            .cloned()
            .ok_or_else(|| LifecycleError::NotFound {
                entity: "review",
                key: review_id.to_string(),
            })
    }

    pub(crate) fn record_facts(
        &self,
        store: &ReviewStore,
        actor: &ActorContext,
        record: &ReviewRecord,
    ) -> RecordAccessFacts {
        let reviewers = store.reviewers_for_record(record.record_id);
        RecordAccessFacts::for_actor(actor, record, &reviewers)
    }

    /// Approver set of whoever put the review into pending approval; empty otherwise.
    pub(crate) fn pending_approvers(&self, store: &ReviewStore, review: &Review) -> ApproverSet {
        review
            .status
            .pending_by()
            .and_then(|uid| store.identity(uid))
            .map(|setter| {
                let org = setter.org_id.and_then(|o| store.organization(o));
                approval::approvers_for(setter, org)
            })
            .unwrap_or_default()
    }

    pub(crate) fn gate(
        &self,
        actor: &ActorContext,
        action: &'static str,
        decision: AccessDecisionRecord,
    ) -> Result<AccessDecisionRecord, LifecycleError> {
        if decision.allowed {
            return Ok(decision);
        }
        debug!(
            actor = actor.user_id.0,
            action,
            rule = decision.rule.as_str(),
            reason_code = decision.reason_code.0,
            "access denied"
        );
        Err(LifecycleError::Forbidden {
            rule: decision.rule,
            reason_code: decision.reason_code,
        })
    }

    /// Finalize rights, minus reports-only identities.
    pub(crate) fn gate_finalize(
        &self,
        store: &ReviewStore,
        actor: &ActorContext,
        action: &'static str,
        review: &Review,
        facts: &RecordAccessFacts,
    ) -> Result<(), LifecycleError> {
        let pending_approvers = self.pending_approvers(store, review);
        self.gate(
            actor,
            action,
            access::can_finalize(actor, review, facts, &pending_approvers),
        )?;
        self.gate_writer(actor, action, facts)
    }

    /// Refuses reports-only identities for operations gated by something other than
    /// `can_modify`.
    pub(crate) fn gate_writer(
        &self,
        actor: &ActorContext,
        action: &'static str,
        facts: &RecordAccessFacts,
    ) -> Result<(), LifecycleError> {
        if actor.reports_only && !actor.admin {
            self.gate(actor, action, access::can_modify(actor, facts))?;
        }
        Ok(())
    }

    /// Review audit rows point at the review and, as the second target, its record.
    pub(crate) fn review_audit(
        &self,
        store: &ReviewStore,
        req: &ActorRequest,
        event_type: AuditEventType,
        record: &ReviewRecord,
        review: &Review,
        details_text: Option<String>,
        extra: &[(&'static str, String)],
    ) -> Result<AuditEventInput, LifecycleError> {
        let mut payload = json!({
            "actor_name": self.display_name(store, req.actor),
            "record_name": record.name,
            "review_name": review.name,
            "status": review.status_label().as_str(),
        });
        extend_payload(&mut payload, extra);
        Ok(AuditEventInput::v1(
            req.now,
            event_type,
            req.actor,
            AuditTarget::new(TargetType::Review, review.review_id),
            Some(AuditTarget::new(TargetType::Record, record.record_id)),
            details_text,
            Some(payload),
        )?)
    }

    /// Record audit rows point at the record; `target_b` names the affected user, if any.
    pub(crate) fn record_audit(
        &self,
        store: &ReviewStore,
        req: &ActorRequest,
        event_type: AuditEventType,
        record: &ReviewRecord,
        target_b: Option<AuditTarget>,
        extra: &[(&'static str, String)],
    ) -> Result<AuditEventInput, LifecycleError> {
        let mut payload = json!({
            "actor_name": self.display_name(store, req.actor),
            "record_name": record.name,
        });
        extend_payload(&mut payload, extra);
        Ok(AuditEventInput::v1(
            req.now,
            event_type,
            req.actor,
            AuditTarget::new(TargetType::Record, record.record_id),
            target_b,
            None,
            Some(payload),
        )?)
    }

    pub(crate) fn display_name(&self, store: &ReviewStore, user_id: UserId) -> String {
        store
            .identity(user_id)
            .map(|i| i.display_name.clone())
            .unwrap_or_else(|| user_id.to_string())
    }

    /// Commits a planned transition with an optimistic version check, then runs its
    /// side effects. Nothing is written when the commit fails.
    pub(crate) fn apply_plan(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        actor: &ActorContext,
        record: &ReviewRecord,
        current: &Review,
        plan: TransitionPlan,
    ) -> Result<LifecycleOutcome<Review>, LifecycleError> {
        let TransitionPlan {
            mut next,
            audit,
            notify,
            linked_point,
        } = plan;
        let audit_input = self.review_audit(
            store,
            req,
            audit.event_type,
            record,
            &next,
            audit.details_text,
            &[],
        )?;

        next.version = store.commit_review(next.clone(), current.version)?;
        info!(
            review_id = next.review_id.0,
            actor = req.actor.0,
            from = current.status_label().as_str(),
            to = next.status_label().as_str(),
            event = ?audit.event_type,
            "review transition committed"
        );

        let mut effects = SideEffects::new();
        effects.audit(store, audit_input);
        for intent in notify {
            for (recipient, class) in self.resolve_intent(store, req, record, intent) {
                self.notify_review(store, &mut effects, req, recipient, class, &next);
            }
        }
        if let Some(point) = linked_point {
            let event = LinkedEvent::at(point, &next);
            self.dispatch_linked(store, req, actor, record, event, &mut effects);
        }
        Ok(LifecycleOutcome::from_effects(next, effects))
    }

    fn resolve_intent(
        &self,
        store: &ReviewStore,
        req: &ActorRequest,
        record: &ReviewRecord,
        intent: NotifyIntent,
    ) -> Vec<(UserId, NotificationClass)> {
        match intent {
            NotifyIntent::PendingApprovers { pending_by } => {
                if !self.config.notify_approvers_on_pending {
                    return Vec::new();
                }
                let Some(setter) = store.identity(pending_by) else {
                    return Vec::new();
                };
                let org = setter.org_id.and_then(|o| store.organization(o));
                approval::approvers_for(setter, org)
                    .identities
                    .into_iter()
                    .filter(|uid| *uid != req.actor)
                    .filter(|uid| store.identity(*uid).is_some_and(|i| i.active))
                    .map(|uid| (uid, NotificationClass::ApprovalRequested))
                    .collect()
            }
            NotifyIntent::ProvisionalApprovers => {
                let record_type = BTreeSet::from([record.record_type_id]);
                store
                    .identities()
                    .filter(|i| i.active && i.prov_pass_approver && i.user_id != req.actor)
                    .filter(|i| {
                        let ctx = context_for(store, i);
                        !access::allowed_record_types(&ctx, &record_type).is_empty()
                    })
                    .map(|i| (i.user_id, NotificationClass::ProvPassRequest))
                    .collect()
            }
            NotifyIntent::Requestor { requestor, class } => {
                if requestor == req.actor {
                    Vec::new()
                } else {
                    vec![(requestor, class)]
                }
            }
        }
    }

    fn notify_review(
        &self,
        store: &mut ReviewStore,
        effects: &mut SideEffects,
        req: &ActorRequest,
        recipient: UserId,
        class: NotificationClass,
        review: &Review,
    ) {
        match NotificationInput::v1(
            recipient,
            class,
            NotificationSubject::new(TargetType::Review, review.review_id),
            &review.name,
            req.now,
        ) {
            Ok(input) => effects.notify(store, input),
            Err(e) => effects.warnings.push(SideEffectWarning::PersistenceFailure {
                what: "notification",
                detail: e.to_string(),
            }),
        }
    }

    /// Best-effort mirror into the record type's linked system.
    pub(crate) fn dispatch_linked(
        &self,
        store: &ReviewStore,
        req: &ActorRequest,
        actor: &ActorContext,
        record: &ReviewRecord,
        event: LinkedEvent<'_>,
        effects: &mut SideEffects,
    ) {
        let Some(key) = store
            .record_type(record.record_type_id)
            .and_then(|rt| rt.linked_system_key.as_deref())
        else {
            return;
        };
        if !record.is_linked() {
            return;
        }
        let contractor_driven = actor.contractor && self.config.linked_actions_for_contractors;
        if !contractor_driven && !req.opt_in_linked_actions {
            return;
        }
        let result = self.linked_systems.dispatch(key, record, req.actor, event);
        effects.linked(key, event.point(), result);
    }
}

fn extend_payload(payload: &mut serde_json::Value, extra: &[(&'static str, String)]) {
    if let Some(map) = payload.as_object_mut() {
        for (key, value) in extra {
            map.insert((*key).to_string(), serde_json::Value::String(value.clone()));
        }
    }
}

/// Actor context for any identity row, resolving its org and scoped record types.
pub(crate) fn context_for(store: &ReviewStore, identity: &IdentityRecord) -> ActorContext {
    let org = identity.org_id.and_then(|o| store.organization(o));
    let record_types = identity
        .org_id
        .map(|o| store.org_record_types(o))
        .unwrap_or_default();
    ActorContext::from_directory(identity, org, record_types)
}
