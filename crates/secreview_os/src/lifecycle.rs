#![forbid(unsafe_code)]

use secreview_engines::access;
use secreview_kernel_contracts::audit::{AuditEventInput, AuditEventType, AuditTarget, TargetType};
use secreview_kernel_contracts::record::{ReviewRecord, ReviewRecordId};
use secreview_kernel_contracts::review::{ProvisionalTrack, Review, ReviewId, TransitionTarget};
use secreview_storage::store::ReviewStore;

use crate::emitter::SideEffects;
use crate::runtime::{ActorRequest, LifecycleError, LifecycleOutcome, ReviewLifecycleRuntime};

impl ReviewLifecycleRuntime {
    /// Moves a review towards Pass, Fail or back to InProgress.
    ///
    /// Identities that require approval only ever put the review into pending approval;
    /// the final decision belongs to the approvers of whoever set it pending.
    pub fn request_transition(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        review_id: ReviewId,
        target: TransitionTarget,
        disagree_reason: Option<String>,
    ) -> Result<LifecycleOutcome<Review>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let review = self.load_review(store, review_id)?;
        let record = self.load_record(store, review.record_id)?;
        let facts = self.record_facts(store, &actor, &record);
        self.gate_finalize(store, &actor, "request_transition", &review, &facts)?;

        let transition_actor = self.transition_actor(store, &actor)?;
        let plan = self.state_machine().plan_transition(
            &review,
            transition_actor,
            target,
            disagree_reason,
            req.now,
        )?;
        self.apply_plan(store, req, &actor, &record, &review, plan)
    }

    pub fn request_provisional_pass(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        review_id: ReviewId,
        justification: &str,
        window_months: u32,
    ) -> Result<LifecycleOutcome<Review>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let review = self.load_review(store, review_id)?;
        let record = self.load_record(store, review.record_id)?;
        let facts = self.record_facts(store, &actor, &record);
        self.gate_finalize(store, &actor, "request_provisional_pass", &review, &facts)?;

        let allows_provisional = store
            .record_type(record.record_type_id)
            .is_some_and(|rt| rt.provisional_passable);
        let transition_actor = self.transition_actor(store, &actor)?;
        let plan = self.state_machine().plan_provisional_request(
            &review,
            transition_actor,
            allows_provisional,
            justification,
            window_months,
            req.now,
        )?;
        self.apply_plan(store, req, &actor, &record, &review, plan)
    }

    pub fn cancel_provisional_pass_request(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        review_id: ReviewId,
    ) -> Result<LifecycleOutcome<Review>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let review = self.load_review(store, review_id)?;
        let record = self.load_record(store, review.record_id)?;
        let facts = self.record_facts(store, &actor, &record);
        self.gate(
            &actor,
            "cancel_provisional_pass_request",
            access::can_withdraw_provisional(&actor, &facts),
        )?;
        self.gate_writer(&actor, "cancel_provisional_pass_request", &facts)?;
        if let ProvisionalTrack::Requested { requestor, .. } = review.provisional {
            self.gate(
                &actor,
                "cancel_provisional_pass_request",
                access::can_cancel_provisional_request(&actor, requestor),
            )?;
        }
        let plan = self.state_machine().plan_provisional_cancel(&review)?;
        self.apply_plan(store, req, &actor, &record, &review, plan)
    }

    pub fn approve_provisional_pass(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        review_id: ReviewId,
        notes: Option<&str>,
        window_months: u32,
    ) -> Result<LifecycleOutcome<Review>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let review = self.load_review(store, review_id)?;
        let record = self.load_record(store, review.record_id)?;
        let facts = self.record_facts(store, &actor, &record);
        self.gate(
            &actor,
            "approve_provisional_pass",
            access::can_approve_provisional(&actor),
        )?;
        self.gate(&actor, "approve_provisional_pass", access::can_view(&actor, &facts))?;

        let transition_actor = self.transition_actor(store, &actor)?;
        let plan = self.state_machine().plan_provisional_approve(
            &review,
            transition_actor,
            notes,
            window_months,
            req.now,
        )?;
        self.apply_plan(store, req, &actor, &record, &review, plan)
    }

    pub fn deny_provisional_pass(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        review_id: ReviewId,
        notes: Option<&str>,
    ) -> Result<LifecycleOutcome<Review>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let review = self.load_review(store, review_id)?;
        let record = self.load_record(store, review.record_id)?;
        let facts = self.record_facts(store, &actor, &record);
        self.gate(
            &actor,
            "deny_provisional_pass",
            access::can_approve_provisional(&actor),
        )?;
        self.gate(&actor, "deny_provisional_pass", access::can_view(&actor, &facts))?;

        let plan = self.state_machine().plan_provisional_deny(&review, notes)?;
        self.apply_plan(store, req, &actor, &record, &review, plan)
    }

    /// Reads a record. An admin opening a private record they are not allow-listed on
    /// leaves an audit trail.
    pub fn view_record(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        record_id: ReviewRecordId,
    ) -> Result<LifecycleOutcome<ReviewRecord>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let record = self.load_record(store, record_id)?;
        let facts = self.record_facts(store, &actor, &record);
        self.gate(&actor, "view_record", access::can_view(&actor, &facts))?;

        let mut effects = SideEffects::new();
        if actor.admin && record.private && !record.allow_listed(actor.user_id) {
            let input = AuditEventInput::v1(
                req.now,
                AuditEventType::AdminOverridePrivateRecord,
                req.actor,
                AuditTarget::new(TargetType::Record, record.record_id),
                None,
                None,
                Some(serde_json::json!({ "record_name": record.name })),
            )?;
            effects.audit(store, input);
        }
        Ok(LifecycleOutcome::from_effects(record, effects))
    }
}
