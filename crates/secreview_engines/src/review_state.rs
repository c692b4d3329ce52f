#![forbid(unsafe_code)]

use chrono::{DateTime, Months, NaiveDate, Utc};

use secreview_kernel_contracts::audit::AuditEventType;
use secreview_kernel_contracts::directory::UserId;
use secreview_kernel_contracts::linked::LinkedLifecyclePoint;
use secreview_kernel_contracts::notification::NotificationClass;
use secreview_kernel_contracts::review::{
    ProvisionalTrack, Review, ReviewStatus, TransitionTarget,
};
use secreview_kernel_contracts::{ContractViolation, ReasonCodeId, Validate};

pub mod reason_codes {
    use secreview_kernel_contracts::ReasonCodeId;

    // Review state machine reason-code namespace.
    pub const REVIEW_STATE_ALREADY_COMPLETE: ReasonCodeId = ReasonCodeId(0x5253_0001);
    pub const REVIEW_STATE_PROVISIONAL_OUTSTANDING: ReasonCodeId = ReasonCodeId(0x5253_0002);
    pub const REVIEW_STATE_NO_PROVISIONAL_REQUEST: ReasonCodeId = ReasonCodeId(0x5253_0003);
    pub const REVIEW_STATE_NOT_IN_PROGRESS: ReasonCodeId = ReasonCodeId(0x5253_0004);
    pub const REVIEW_STATE_PROVISIONAL_NOT_ALLOWED: ReasonCodeId = ReasonCodeId(0x5253_0005);
    pub const REVIEW_STATE_WINDOW_OUT_OF_RANGE: ReasonCodeId = ReasonCodeId(0x5253_0006);

    pub const REVIEW_STATE_INPUT_INVALID: ReasonCodeId = ReasonCodeId(0x5253_00F1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewStateConfig {
    pub min_remediation_months: u32,
    pub max_remediation_months: u32,
    pub max_justification_len: usize,
    pub max_disagree_reason_len: usize,
}

impl ReviewStateConfig {
    pub fn mvp_v1() -> Self {
        Self {
            min_remediation_months: 1,
            max_remediation_months: 3,
            max_justification_len: 4096,
            max_disagree_reason_len: 4096,
        }
    }
}

impl Validate for ReviewStateConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.min_remediation_months == 0
            || self.min_remediation_months > self.max_remediation_months
        {
            return Err(ContractViolation::InvalidValue {
                field: "review_state_config.remediation_months",
                reason: "must satisfy 0 < min <= max",
            });
        }
        if self.max_justification_len == 0 || self.max_disagree_reason_len == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "review_state_config.max_len",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// What the state machine needs to know about the actor, resolved by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionActor {
    pub user_id: UserId,
    pub requires_approval: bool,
    pub contractor: bool,
}

/// Who should hear about a transition. Recipients are resolved against the directory later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyIntent {
    /// Approver identities of the identity that set the review pending.
    PendingApprovers { pending_by: UserId },
    /// Every active provisional-pass approver with access to the record type.
    ProvisionalApprovers,
    Requestor {
        requestor: UserId,
        class: NotificationClass,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAudit {
    pub event_type: AuditEventType,
    pub details_text: Option<String>,
}

/// A computed, not yet committed, transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub next: Review,
    pub audit: PlannedAudit,
    pub notify: Vec<NotifyIntent>,
    pub linked_point: Option<LinkedLifecyclePoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRefusal {
    pub reason_code: ReasonCodeId,
    pub message: &'static str,
}

fn refuse<T>(reason_code: ReasonCodeId, message: &'static str) -> Result<T, TransitionRefusal> {
    Err(TransitionRefusal {
        reason_code,
        message,
    })
}

#[derive(Debug, Clone)]
pub struct ReviewStateMachine {
    config: ReviewStateConfig,
}

impl ReviewStateMachine {
    pub fn new(config: ReviewStateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReviewStateConfig {
        &self.config
    }

    pub fn plan_transition(
        &self,
        review: &Review,
        actor: TransitionActor,
        target: TransitionTarget,
        disagree_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionPlan, TransitionRefusal> {
        let disagree_reason = disagree_reason.filter(|r| !r.trim().is_empty());
        if disagree_reason
            .as_ref()
            .is_some_and(|r| r.len() > self.config.max_disagree_reason_len)
        {
            return refuse(
                reason_codes::REVIEW_STATE_INPUT_INVALID,
                "disagree reason exceeds configured length",
            );
        }

        let pass = match target {
            TransitionTarget::InProgress => return Ok(self.plan_reopen(review, actor)),
            TransitionTarget::Pass => true,
            TransitionTarget::Fail => false,
        };

        if review.is_complete() {
            return refuse(
                reason_codes::REVIEW_STATE_ALREADY_COMPLETE,
                "review is already complete; reopen it first",
            );
        }
        if review.provisional.is_outstanding() {
            return refuse(
                reason_codes::REVIEW_STATE_PROVISIONAL_OUTSTANDING,
                "a provisional pass request is outstanding",
            );
        }

        let mut next = review.clone();
        if actor.contractor {
            next.con_closed_at = Some(now);
        }

        let (event_type, notify) = if actor.requires_approval {
            next.status = ReviewStatus::PendingApproval {
                pending_by: actor.user_id,
                pending_pass: pass,
                pending_at: now,
            };
            let event_type = if pass {
                AuditEventType::ReviewPassReqApproval
            } else {
                AuditEventType::ReviewFailReqApproval
            };
            (
                event_type,
                vec![NotifyIntent::PendingApprovers {
                    pending_by: actor.user_id,
                }],
            )
        } else {
            let overrides_pending = matches!(
                review.status,
                ReviewStatus::PendingApproval { pending_pass, .. } if pending_pass != pass
            );
            if overrides_pending {
                if let Some(reason) = disagree_reason {
                    next.disagree_reason = Some(reason);
                }
            }
            next.status = if pass {
                ReviewStatus::Passed {
                    approved_by: actor.user_id,
                    closed_at: now,
                }
            } else {
                ReviewStatus::Failed {
                    approved_by: actor.user_id,
                    closed_at: now,
                }
            };
            let event_type = if pass {
                AuditEventType::ReviewPass
            } else {
                AuditEventType::ReviewFail
            };
            (event_type, Vec::new())
        };

        Ok(TransitionPlan {
            next,
            audit: PlannedAudit {
                event_type,
                details_text: None,
            },
            notify,
            linked_point: Some(if pass {
                LinkedLifecyclePoint::Pass
            } else {
                LinkedLifecyclePoint::Fail
            }),
        })
    }

    fn plan_reopen(&self, review: &Review, actor: TransitionActor) -> TransitionPlan {
        let mut next = review.clone();
        next.status = ReviewStatus::InProgress;
        next.provisional = ProvisionalTrack::None;
        next.disagree_reason = None;
        if actor.contractor {
            next.contractor_review = true;
            next.con_closed_at = None;
        }
        TransitionPlan {
            next,
            audit: PlannedAudit {
                event_type: AuditEventType::ReviewInProgress,
                details_text: None,
            },
            notify: Vec::new(),
            linked_point: Some(LinkedLifecyclePoint::InProgress),
        }
    }

    pub fn plan_provisional_request(
        &self,
        review: &Review,
        actor: TransitionActor,
        record_type_allows_provisional: bool,
        justification: &str,
        window_months: u32,
        now: DateTime<Utc>,
    ) -> Result<TransitionPlan, TransitionRefusal> {
        if !record_type_allows_provisional || review.contractor_review || actor.contractor {
            return refuse(
                reason_codes::REVIEW_STATE_PROVISIONAL_NOT_ALLOWED,
                "provisional pass is not available for this review",
            );
        }
        self.check_justification(justification)?;
        let expiry = self.expiry_for(window_months, now)?;
        if review.provisional.is_outstanding() {
            return refuse(
                reason_codes::REVIEW_STATE_PROVISIONAL_OUTSTANDING,
                "a provisional pass request is already outstanding",
            );
        }
        if review.status != ReviewStatus::InProgress {
            return refuse(
                reason_codes::REVIEW_STATE_NOT_IN_PROGRESS,
                "provisional pass can only be requested while in progress",
            );
        }

        let mut next = review.clone();
        next.provisional = ProvisionalTrack::Requested {
            requestor: actor.user_id,
            requested_at: now,
            expiry,
        };
        Ok(TransitionPlan {
            next,
            audit: PlannedAudit {
                event_type: AuditEventType::ProvPassRequest,
                details_text: Some(justification.trim().to_string()),
            },
            notify: vec![NotifyIntent::ProvisionalApprovers],
            linked_point: None,
        })
    }

    pub fn plan_provisional_cancel(
        &self,
        review: &Review,
    ) -> Result<TransitionPlan, TransitionRefusal> {
        self.outstanding_requestor(review)?;
        let mut next = review.clone();
        next.provisional = ProvisionalTrack::None;
        Ok(TransitionPlan {
            next,
            audit: PlannedAudit {
                event_type: AuditEventType::ProvPassReqCancel,
                details_text: None,
            },
            notify: Vec::new(),
            linked_point: None,
        })
    }

    pub fn plan_provisional_approve(
        &self,
        review: &Review,
        actor: TransitionActor,
        notes: Option<&str>,
        window_months: u32,
        now: DateTime<Utc>,
    ) -> Result<TransitionPlan, TransitionRefusal> {
        let requestor = self.outstanding_requestor(review)?;
        let notes = self.check_notes(notes)?;
        let expiry = self.expiry_for(window_months, now)?;

        let mut next = review.clone();
        next.provisional = ProvisionalTrack::Approved {
            requestor,
            approver: actor.user_id,
            expiry,
        };
        next.status = ReviewStatus::Passed {
            approved_by: actor.user_id,
            closed_at: now,
        };
        Ok(TransitionPlan {
            next,
            audit: PlannedAudit {
                event_type: AuditEventType::ProvPassApprove,
                details_text: notes,
            },
            notify: vec![NotifyIntent::Requestor {
                requestor,
                class: NotificationClass::ProvPassApprove,
            }],
            linked_point: Some(LinkedLifecyclePoint::ProvisionalPass),
        })
    }

    pub fn plan_provisional_deny(
        &self,
        review: &Review,
        notes: Option<&str>,
    ) -> Result<TransitionPlan, TransitionRefusal> {
        let requestor = self.outstanding_requestor(review)?;
        let notes = self.check_notes(notes)?;
        let mut next = review.clone();
        next.provisional = ProvisionalTrack::None;
        Ok(TransitionPlan {
            next,
            audit: PlannedAudit {
                event_type: AuditEventType::ProvPassDeny,
                details_text: notes,
            },
            notify: vec![NotifyIntent::Requestor {
                requestor,
                class: NotificationClass::ProvPassDeny,
            }],
            linked_point: None,
        })
    }

    /// Expiry date for a remediation window starting today.
    pub fn expiry_for(
        &self,
        window_months: u32,
        now: DateTime<Utc>,
    ) -> Result<NaiveDate, TransitionRefusal> {
        if window_months < self.config.min_remediation_months
            || window_months > self.config.max_remediation_months
        {
            return refuse(
                reason_codes::REVIEW_STATE_WINDOW_OUT_OF_RANGE,
                "remediation window is outside the configured range",
            );
        }
        match now.date_naive().checked_add_months(Months::new(window_months)) {
            Some(d) => Ok(d),
            None => refuse(
                reason_codes::REVIEW_STATE_WINDOW_OUT_OF_RANGE,
                "remediation window overflows the calendar",
            ),
        }
    }

    fn outstanding_requestor(&self, review: &Review) -> Result<UserId, TransitionRefusal> {
        match review.provisional {
            ProvisionalTrack::Requested { requestor, .. } => Ok(requestor),
            _ => refuse(
                reason_codes::REVIEW_STATE_NO_PROVISIONAL_REQUEST,
                "no provisional pass request is outstanding",
            ),
        }
    }

    fn check_justification(&self, justification: &str) -> Result<(), TransitionRefusal> {
        let t = justification.trim();
        if t.is_empty() || t.len() > self.config.max_justification_len {
            return refuse(
                reason_codes::REVIEW_STATE_INPUT_INVALID,
                "justification must be non-empty and within configured length",
            );
        }
        Ok(())
    }

    fn check_notes(&self, notes: Option<&str>) -> Result<Option<String>, TransitionRefusal> {
        match notes.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) if n.len() > self.config.max_justification_len => refuse(
                reason_codes::REVIEW_STATE_INPUT_INVALID,
                "notes exceed configured length",
            ),
            other => Ok(other.map(str::to_string)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use secreview_kernel_contracts::directory::OrgId;
    use secreview_kernel_contracts::record::ReviewRecordId;
    use secreview_kernel_contracts::review::ReviewId;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 15, 0, 0).unwrap()
    }

    fn review() -> Review {
        Review::v1(
            ReviewId(1),
            ReviewRecordId(1),
            "Annual pentest",
            Some(UserId(2)),
            Some(OrgId(1)),
            false,
            now(),
        )
        .unwrap()
    }

    fn actor(user: u64, requires_approval: bool) -> TransitionActor {
        TransitionActor {
            user_id: UserId(user),
            requires_approval,
            contractor: false,
        }
    }

    fn sm() -> ReviewStateMachine {
        ReviewStateMachine::new(ReviewStateConfig::mvp_v1())
    }

    #[test]
    fn at_review_state_01_approval_required_never_completes_directly() {
        for target in [TransitionTarget::Pass, TransitionTarget::Fail] {
            let plan = sm()
                .plan_transition(&review(), actor(2, true), target, None, now())
                .unwrap();
            assert!(!plan.next.is_complete());
            assert!(plan.next.is_pending());
            assert_eq!(
                plan.notify,
                vec![NotifyIntent::PendingApprovers {
                    pending_by: UserId(2)
                }]
            );
        }
    }

    #[test]
    fn at_review_state_02_disagreeing_approver_records_reason() {
        let pending = sm()
            .plan_transition(&review(), actor(2, true), TransitionTarget::Pass, None, now())
            .unwrap();
        assert_eq!(pending.audit.event_type, AuditEventType::ReviewPassReqApproval);

        let final_plan = sm()
            .plan_transition(
                &pending.next,
                actor(3, false),
                TransitionTarget::Fail,
                Some("critical XSS unresolved".to_string()),
                now(),
            )
            .unwrap();
        let legacy = final_plan.next.legacy_fields();
        assert!(legacy.complete);
        assert!(!legacy.pass);
        assert!(!legacy.is_pending);
        assert_eq!(legacy.approved_by, Some(UserId(3)));
        assert_eq!(
            final_plan.next.disagree_reason.as_deref(),
            Some("critical XSS unresolved")
        );
        assert_eq!(final_plan.audit.event_type, AuditEventType::ReviewFail);
    }

    #[test]
    fn at_review_state_03_agreeing_approver_drops_disagree_reason() {
        let pending = sm()
            .plan_transition(&review(), actor(2, true), TransitionTarget::Pass, None, now())
            .unwrap();
        let plan = sm()
            .plan_transition(
                &pending.next,
                actor(3, false),
                TransitionTarget::Pass,
                Some("n/a".to_string()),
                now(),
            )
            .unwrap();
        assert_eq!(plan.next.disagree_reason, None);
    }

    #[test]
    fn at_review_state_04_contractor_close_stamps_con_closed_at_only() {
        let mut contractor = actor(8, true);
        contractor.contractor = true;
        let plan = sm()
            .plan_transition(&review(), contractor, TransitionTarget::Pass, None, now())
            .unwrap();
        assert_eq!(plan.next.con_closed_at, Some(now()));
        assert_eq!(plan.next.legacy_fields().closed_at, None);

        let reopened = sm()
            .plan_transition(&plan.next, contractor, TransitionTarget::InProgress, None, now())
            .unwrap();
        assert!(reopened.next.contractor_review);
        assert_eq!(reopened.next.con_closed_at, None);
        assert_eq!(reopened.next.status, ReviewStatus::InProgress);
    }

    #[test]
    fn at_review_state_05_complete_or_provisional_blocks_finalize() {
        let done = sm()
            .plan_transition(&review(), actor(2, false), TransitionTarget::Pass, None, now())
            .unwrap();
        let err = sm()
            .plan_transition(&done.next, actor(2, false), TransitionTarget::Fail, None, now())
            .unwrap_err();
        assert_eq!(err.reason_code, reason_codes::REVIEW_STATE_ALREADY_COMPLETE);

        let req = sm()
            .plan_provisional_request(&review(), actor(2, false), true, "fix in Q2", 2, now())
            .unwrap();
        let err = sm()
            .plan_transition(&req.next, actor(2, false), TransitionTarget::Pass, None, now())
            .unwrap_err();
        assert_eq!(
            err.reason_code,
            reason_codes::REVIEW_STATE_PROVISIONAL_OUTSTANDING
        );
    }

    #[test]
    fn at_review_state_06_provisional_request_then_approve() {
        let req = sm()
            .plan_provisional_request(&review(), actor(2, false), true, "fix in Q2", 1, now())
            .unwrap();
        // Jan 31 + 1 month clamps to the end of February.
        assert_eq!(
            req.next.legacy_fields().prov_pass_expiry,
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(req.audit.details_text.as_deref(), Some("fix in Q2"));
        assert_eq!(req.notify, vec![NotifyIntent::ProvisionalApprovers]);

        let approved = sm()
            .plan_provisional_approve(&req.next, actor(6, false), Some("ok"), 3, now())
            .unwrap();
        let legacy = approved.next.legacy_fields();
        assert!(legacy.complete && legacy.pass && legacy.prov_pass);
        assert_eq!(legacy.prov_pass_approver, Some(UserId(6)));
        assert_eq!(legacy.prov_pass_requestor, Some(UserId(2)));
        assert_eq!(
            approved.linked_point,
            Some(LinkedLifecyclePoint::ProvisionalPass)
        );
        approved.next.validate().unwrap();
    }

    #[test]
    fn at_review_state_07_cancel_and_deny_revert_request() {
        let req = sm()
            .plan_provisional_request(&review(), actor(2, false), true, "fix in Q2", 1, now())
            .unwrap();
        for plan in [
            sm().plan_provisional_cancel(&req.next).unwrap(),
            sm().plan_provisional_deny(&req.next, None).unwrap(),
        ] {
            let legacy = plan.next.legacy_fields();
            assert!(!legacy.complete && !legacy.pass && !legacy.prov_pass_req);
        }
        assert!(sm().plan_provisional_cancel(&review()).is_err());
    }

    #[test]
    fn at_review_state_08_provisional_preconditions() {
        let s = sm();
        assert_eq!(
            s.plan_provisional_request(&review(), actor(2, false), false, "x", 1, now())
                .unwrap_err()
                .reason_code,
            reason_codes::REVIEW_STATE_PROVISIONAL_NOT_ALLOWED
        );
        assert_eq!(
            s.plan_provisional_request(&review(), actor(2, false), true, "x", 4, now())
                .unwrap_err()
                .reason_code,
            reason_codes::REVIEW_STATE_WINDOW_OUT_OF_RANGE
        );
        assert_eq!(
            s.plan_provisional_request(&review(), actor(2, false), true, "  ", 1, now())
                .unwrap_err()
                .reason_code,
            reason_codes::REVIEW_STATE_INPUT_INVALID
        );
        let mut contractor_review = review();
        contractor_review.contractor_review = true;
        assert!(s
            .plan_provisional_request(&contractor_review, actor(2, false), true, "x", 1, now())
            .is_err());
        let pending = s
            .plan_transition(&review(), actor(2, true), TransitionTarget::Pass, None, now())
            .unwrap();
        assert_eq!(
            s.plan_provisional_request(&pending.next, actor(2, false), true, "x", 1, now())
                .unwrap_err()
                .reason_code,
            reason_codes::REVIEW_STATE_NOT_IN_PROGRESS
        );
    }

    #[test]
    fn at_review_state_09_reopen_clears_everything() {
        let req = sm()
            .plan_provisional_request(&review(), actor(2, false), true, "fix", 1, now())
            .unwrap();
        let approved = sm()
            .plan_provisional_approve(&req.next, actor(6, false), None, 1, now())
            .unwrap();
        let reopened = sm()
            .plan_transition(
                &approved.next,
                actor(2, true),
                TransitionTarget::InProgress,
                None,
                now(),
            )
            .unwrap();
        let legacy = reopened.next.legacy_fields();
        assert!(!legacy.complete && !legacy.pass && !legacy.prov_pass_req && !legacy.is_pending);
        assert_eq!(reopened.audit.event_type, AuditEventType::ReviewInProgress);
    }
}
