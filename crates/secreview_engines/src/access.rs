#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use secreview_kernel_contracts::directory::{
    ApproverSet, IdentityRecord, OrgId, OrganizationRecord, RecordTypeId, UserId,
};
use secreview_kernel_contracts::record::ReviewRecord;
use secreview_kernel_contracts::review::Review;
use secreview_kernel_contracts::ReasonCodeId;

pub mod reason_codes {
    use secreview_kernel_contracts::ReasonCodeId;

    // Access evaluator reason-code namespace.
    pub const ACCESS_OK_ADMIN: ReasonCodeId = ReasonCodeId(0x4143_0001);
    pub const ACCESS_OK_ALLOW_LISTED: ReasonCodeId = ReasonCodeId(0x4143_0002);
    pub const ACCESS_OK_GLOBAL_RECORD: ReasonCodeId = ReasonCodeId(0x4143_0003);
    pub const ACCESS_OK_SUPER_ORG: ReasonCodeId = ReasonCodeId(0x4143_0004);
    pub const ACCESS_OK_ORG_SCOPED: ReasonCodeId = ReasonCodeId(0x4143_0005);
    pub const ACCESS_OK_ASSIGNED_REVIEWER: ReasonCodeId = ReasonCodeId(0x4143_0006);
    pub const ACCESS_OK_RECORD_OWNER: ReasonCodeId = ReasonCodeId(0x4143_0007);
    pub const ACCESS_OK_PENDING_APPROVER: ReasonCodeId = ReasonCodeId(0x4143_0008);
    pub const ACCESS_OK_REVIEWER_ORG: ReasonCodeId = ReasonCodeId(0x4143_0009);
    pub const ACCESS_OK_CAPABILITY: ReasonCodeId = ReasonCodeId(0x4143_000A);
    pub const ACCESS_OK_CAN_VIEW: ReasonCodeId = ReasonCodeId(0x4143_000B);
    pub const ACCESS_OK_PROVISIONAL_REQUESTOR: ReasonCodeId = ReasonCodeId(0x4143_000C);

    pub const ACCESS_DENY_INACTIVE: ReasonCodeId = ReasonCodeId(0x4143_0010);
    pub const ACCESS_DENY_UNVERIFIED: ReasonCodeId = ReasonCodeId(0x4143_0011);
    pub const ACCESS_DENY_PRIVATE_RECORD: ReasonCodeId = ReasonCodeId(0x4143_0012);
    pub const ACCESS_DENY_NOT_PENDING_APPROVER: ReasonCodeId = ReasonCodeId(0x4143_0013);
    pub const ACCESS_DENY_CAPABILITY_MISSING: ReasonCodeId = ReasonCodeId(0x4143_0014);
    pub const ACCESS_DENY_CANNOT_VIEW: ReasonCodeId = ReasonCodeId(0x4143_0015);
    pub const ACCESS_DENY_REPORTS_ONLY: ReasonCodeId = ReasonCodeId(0x4143_0016);
    pub const ACCESS_DENY_CONTRACTOR: ReasonCodeId = ReasonCodeId(0x4143_0017);
    pub const ACCESS_DENY_NO_RULE_MATCHED: ReasonCodeId = ReasonCodeId(0x4143_001F);
}

/// Everything the evaluator knows about the acting identity.
///
/// Built once per request from directory rows; evaluators never look anything else up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub user_id: UserId,
    pub active: bool,
    pub admin: bool,
    pub reports_only: bool,
    /// `None` when the identity is unverified (or its org row is missing).
    pub org_id: Option<OrgId>,
    pub super_org: bool,
    pub contractor: bool,
    pub org_record_types: BTreeSet<RecordTypeId>,
    pub prov_pass_approver: bool,
    pub can_pass_to_contractor: bool,
    pub can_audit_monitors: bool,
}

impl ActorContext {
    pub fn from_directory(
        identity: &IdentityRecord,
        org: Option<&OrganizationRecord>,
        org_record_types: BTreeSet<RecordTypeId>,
    ) -> Self {
        let org = org.filter(|o| Some(o.org_id) == identity.org_id);
        Self {
            user_id: identity.user_id,
            active: identity.active,
            admin: identity.admin,
            reports_only: identity.reports_only,
            org_id: org.map(|o| o.org_id),
            super_org: org.is_some_and(|o| o.super_org),
            contractor: org.is_some_and(|o| o.contractor),
            org_record_types: if org.is_some() {
                org_record_types
            } else {
                BTreeSet::new()
            },
            prov_pass_approver: identity.prov_pass_approver,
            can_pass_to_contractor: identity.can_pass_to_contractor,
            can_audit_monitors: identity.can_audit_monitors,
        }
    }

    pub fn verified(&self) -> bool {
        self.org_id.is_some()
    }
}

/// Named rules. The name of the rule that decided is part of every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessRule {
    ActorInactive,
    ActorAdmin,
    AllowListed,
    PrivateRecord,
    GlobalRecord,
    ActorUnverified,
    SuperOrg,
    OrgScopedRecordType,
    AssignedReviewer,
    RecordOwner,
    ReviewReviewer,
    ReviewerOrg,
    PendingApprover,
    NotPendingApprover,
    CapabilityGranted,
    CapabilityMissing,
    ReportsOnly,
    ContractorActor,
    ProvisionalRequestor,
    ViewAccess,
    NoViewAccess,
    NoRuleMatched,
}

impl AccessRule {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessRule::ActorInactive => "actor_inactive",
            AccessRule::ActorAdmin => "actor_admin",
            AccessRule::AllowListed => "allow_listed",
            AccessRule::PrivateRecord => "private_record",
            AccessRule::GlobalRecord => "global_record",
            AccessRule::ActorUnverified => "actor_unverified",
            AccessRule::SuperOrg => "super_org",
            AccessRule::OrgScopedRecordType => "org_scoped_record_type",
            AccessRule::AssignedReviewer => "assigned_reviewer",
            AccessRule::RecordOwner => "record_owner",
            AccessRule::ReviewReviewer => "review_reviewer",
            AccessRule::ReviewerOrg => "reviewer_org",
            AccessRule::PendingApprover => "pending_approver",
            AccessRule::NotPendingApprover => "not_pending_approver",
            AccessRule::CapabilityGranted => "capability_granted",
            AccessRule::CapabilityMissing => "capability_missing",
            AccessRule::ReportsOnly => "reports_only",
            AccessRule::ContractorActor => "contractor_actor",
            AccessRule::ProvisionalRequestor => "provisional_requestor",
            AccessRule::ViewAccess => "view_access",
            AccessRule::NoViewAccess => "no_view_access",
            AccessRule::NoRuleMatched => "no_rule_matched",
        }
    }

    fn reason_code(self) -> ReasonCodeId {
        match self {
            AccessRule::ActorInactive => reason_codes::ACCESS_DENY_INACTIVE,
            AccessRule::ActorAdmin => reason_codes::ACCESS_OK_ADMIN,
            AccessRule::AllowListed => reason_codes::ACCESS_OK_ALLOW_LISTED,
            AccessRule::PrivateRecord => reason_codes::ACCESS_DENY_PRIVATE_RECORD,
            AccessRule::GlobalRecord => reason_codes::ACCESS_OK_GLOBAL_RECORD,
            AccessRule::ActorUnverified => reason_codes::ACCESS_DENY_UNVERIFIED,
            AccessRule::SuperOrg => reason_codes::ACCESS_OK_SUPER_ORG,
            AccessRule::OrgScopedRecordType => reason_codes::ACCESS_OK_ORG_SCOPED,
            AccessRule::AssignedReviewer | AccessRule::ReviewReviewer => {
                reason_codes::ACCESS_OK_ASSIGNED_REVIEWER
            }
            AccessRule::RecordOwner => reason_codes::ACCESS_OK_RECORD_OWNER,
            AccessRule::ReviewerOrg => reason_codes::ACCESS_OK_REVIEWER_ORG,
            AccessRule::PendingApprover => reason_codes::ACCESS_OK_PENDING_APPROVER,
            AccessRule::NotPendingApprover => reason_codes::ACCESS_DENY_NOT_PENDING_APPROVER,
            AccessRule::CapabilityGranted => reason_codes::ACCESS_OK_CAPABILITY,
            AccessRule::CapabilityMissing => reason_codes::ACCESS_DENY_CAPABILITY_MISSING,
            AccessRule::ReportsOnly => reason_codes::ACCESS_DENY_REPORTS_ONLY,
            AccessRule::ContractorActor => reason_codes::ACCESS_DENY_CONTRACTOR,
            AccessRule::ProvisionalRequestor => reason_codes::ACCESS_OK_PROVISIONAL_REQUESTOR,
            AccessRule::ViewAccess => reason_codes::ACCESS_OK_CAN_VIEW,
            AccessRule::NoViewAccess => reason_codes::ACCESS_DENY_CANNOT_VIEW,
            AccessRule::NoRuleMatched => reason_codes::ACCESS_DENY_NO_RULE_MATCHED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecisionRecord {
    pub allowed: bool,
    pub rule: AccessRule,
    pub reason_code: ReasonCodeId,
}

impl AccessDecisionRecord {
    fn decided_by(rule: AccessRule, allowed: bool) -> Self {
        Self {
            allowed,
            rule,
            reason_code: rule.reason_code(),
        }
    }
}

/// Per-request facts about one record, flattened against the acting identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordAccessFacts {
    pub record_type_id: RecordTypeId,
    pub global: bool,
    pub private: bool,
    pub owner: Option<UserId>,
    pub actor_allow_listed: bool,
    /// Actor is (or was) the reviewer of at least one review on the record.
    pub actor_assigned_reviewer: bool,
}

impl RecordAccessFacts {
    pub fn for_actor(
        actor: &ActorContext,
        record: &ReviewRecord,
        reviewers: &BTreeSet<UserId>,
    ) -> Self {
        Self {
            record_type_id: record.record_type_id,
            global: record.global,
            private: record.private,
            owner: record.owner,
            actor_allow_listed: record.allow_listed(actor.user_id),
            actor_assigned_reviewer: reviewers.contains(&actor.user_id),
        }
    }
}

struct RuleStep<F> {
    rule: AccessRule,
    allow: bool,
    when: fn(&ActorContext, &F) -> bool,
}

fn first_match<F>(
    steps: &[RuleStep<F>],
    actor: &ActorContext,
    facts: &F,
    otherwise: AccessRule,
) -> AccessDecisionRecord {
    steps
        .iter()
        .find(|s| (s.when)(actor, facts))
        .map(|s| AccessDecisionRecord::decided_by(s.rule, s.allow))
        .unwrap_or_else(|| AccessDecisionRecord::decided_by(otherwise, false))
}

fn inactive<F>(a: &ActorContext, _: &F) -> bool {
    !a.active
}

fn admin<F>(a: &ActorContext, _: &F) -> bool {
    a.admin
}

fn unverified<F>(a: &ActorContext, _: &F) -> bool {
    !a.verified()
}

fn super_org<F>(a: &ActorContext, _: &F) -> bool {
    a.super_org
}

fn allow_listed(_: &ActorContext, f: &RecordAccessFacts) -> bool {
    f.actor_allow_listed
}

fn private_record(_: &ActorContext, f: &RecordAccessFacts) -> bool {
    f.private
}

fn global_record(_: &ActorContext, f: &RecordAccessFacts) -> bool {
    f.global
}

fn org_scoped(a: &ActorContext, f: &RecordAccessFacts) -> bool {
    a.org_record_types.contains(&f.record_type_id)
}

fn assigned_reviewer(_: &ActorContext, f: &RecordAccessFacts) -> bool {
    f.actor_assigned_reviewer
}

fn record_owner(a: &ActorContext, f: &RecordAccessFacts) -> bool {
    f.owner == Some(a.user_id)
}

const VIEW_RULES: &[RuleStep<RecordAccessFacts>] = &[
    RuleStep {
        rule: AccessRule::ActorInactive,
        allow: false,
        when: inactive,
    },
    RuleStep {
        rule: AccessRule::ActorAdmin,
        allow: true,
        when: admin,
    },
    RuleStep {
        rule: AccessRule::AllowListed,
        allow: true,
        when: allow_listed,
    },
    RuleStep {
        rule: AccessRule::PrivateRecord,
        allow: false,
        when: private_record,
    },
    RuleStep {
        rule: AccessRule::GlobalRecord,
        allow: true,
        when: global_record,
    },
    RuleStep {
        rule: AccessRule::ActorUnverified,
        allow: false,
        when: unverified,
    },
    RuleStep {
        rule: AccessRule::SuperOrg,
        allow: true,
        when: super_org,
    },
    RuleStep {
        rule: AccessRule::OrgScopedRecordType,
        allow: true,
        when: org_scoped,
    },
    RuleStep {
        rule: AccessRule::AssignedReviewer,
        allow: true,
        when: assigned_reviewer,
    },
];

const DELETE_RECORD_RULES: &[RuleStep<RecordAccessFacts>] = &[
    RuleStep {
        rule: AccessRule::ActorInactive,
        allow: false,
        when: inactive,
    },
    RuleStep {
        rule: AccessRule::ActorAdmin,
        allow: true,
        when: admin,
    },
    RuleStep {
        rule: AccessRule::ActorUnverified,
        allow: false,
        when: unverified,
    },
    RuleStep {
        rule: AccessRule::RecordOwner,
        allow: true,
        when: record_owner,
    },
    RuleStep {
        rule: AccessRule::SuperOrg,
        allow: true,
        when: super_org,
    },
];

/// Can `actor` see (and therefore act on) the record.
pub fn can_view(actor: &ActorContext, facts: &RecordAccessFacts) -> AccessDecisionRecord {
    first_match(VIEW_RULES, actor, facts, AccessRule::NoRuleMatched)
}

/// Mutating access: view access, except that reports-only identities never write.
pub fn can_modify(actor: &ActorContext, facts: &RecordAccessFacts) -> AccessDecisionRecord {
    if actor.active && actor.reports_only && !actor.admin {
        return AccessDecisionRecord::decided_by(AccessRule::ReportsOnly, false);
    }
    can_view(actor, facts)
}

pub fn can_delete_record(
    actor: &ActorContext,
    facts: &RecordAccessFacts,
) -> AccessDecisionRecord {
    first_match(DELETE_RECORD_RULES, actor, facts, AccessRule::NoRuleMatched)
}

/// Can `actor` move `review` to a final state.
///
/// `pending_approvers` is the approver set of the identity that put the review into
/// pending approval; it is only consulted while the review is pending.
pub fn can_finalize(
    actor: &ActorContext,
    review: &Review,
    facts: &RecordAccessFacts,
    pending_approvers: &ApproverSet,
) -> AccessDecisionRecord {
    if !actor.active {
        return AccessDecisionRecord::decided_by(AccessRule::ActorInactive, false);
    }
    if !actor.verified() {
        return AccessDecisionRecord::decided_by(AccessRule::ActorUnverified, false);
    }
    if actor.admin {
        return AccessDecisionRecord::decided_by(AccessRule::ActorAdmin, true);
    }
    if !review.is_pending() {
        return can_view(actor, facts);
    }
    if pending_approvers.admits(actor.user_id, actor.org_id) {
        return AccessDecisionRecord::decided_by(AccessRule::PendingApprover, true);
    }
    AccessDecisionRecord::decided_by(AccessRule::NotPendingApprover, false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewDeleteFacts {
    pub reviewer: Option<UserId>,
    pub reviewer_org: Option<OrgId>,
}

fn review_reviewer(a: &ActorContext, f: &ReviewDeleteFacts) -> bool {
    f.reviewer == Some(a.user_id)
}

fn reviewer_org(a: &ActorContext, f: &ReviewDeleteFacts) -> bool {
    f.reviewer_org.is_some() && f.reviewer_org == a.org_id
}

const DELETE_REVIEW_RULES: &[RuleStep<ReviewDeleteFacts>] = &[
    RuleStep {
        rule: AccessRule::ActorInactive,
        allow: false,
        when: inactive,
    },
    RuleStep {
        rule: AccessRule::ActorAdmin,
        allow: true,
        when: admin,
    },
    RuleStep {
        rule: AccessRule::ActorUnverified,
        allow: false,
        when: unverified,
    },
    RuleStep {
        rule: AccessRule::SuperOrg,
        allow: true,
        when: super_org,
    },
    RuleStep {
        rule: AccessRule::ReviewReviewer,
        allow: true,
        when: review_reviewer,
    },
    RuleStep {
        rule: AccessRule::ReviewerOrg,
        allow: true,
        when: reviewer_org,
    },
];

pub fn can_delete_review(
    actor: &ActorContext,
    facts: &ReviewDeleteFacts,
) -> AccessDecisionRecord {
    first_match(DELETE_REVIEW_RULES, actor, facts, AccessRule::NoRuleMatched)
}

pub fn can_approve_provisional(actor: &ActorContext) -> AccessDecisionRecord {
    if !actor.active {
        return AccessDecisionRecord::decided_by(AccessRule::ActorInactive, false);
    }
    if actor.prov_pass_approver {
        return AccessDecisionRecord::decided_by(AccessRule::CapabilityGranted, true);
    }
    AccessDecisionRecord::decided_by(AccessRule::CapabilityMissing, false)
}

/// Who may act on a review's provisional track at all, whether or not a request is
/// outstanding. Contractors never; everyone else needs view access to the record.
pub fn can_withdraw_provisional(
    actor: &ActorContext,
    facts: &RecordAccessFacts,
) -> AccessDecisionRecord {
    if !actor.active {
        return AccessDecisionRecord::decided_by(AccessRule::ActorInactive, false);
    }
    if actor.admin {
        return AccessDecisionRecord::decided_by(AccessRule::ActorAdmin, true);
    }
    if actor.contractor {
        return AccessDecisionRecord::decided_by(AccessRule::ContractorActor, false);
    }
    can_view(actor, facts)
}

/// The original requestor or any provisional-pass approver may withdraw a request.
pub fn can_cancel_provisional_request(
    actor: &ActorContext,
    requestor: UserId,
) -> AccessDecisionRecord {
    if !actor.active {
        return AccessDecisionRecord::decided_by(AccessRule::ActorInactive, false);
    }
    if actor.user_id == requestor {
        return AccessDecisionRecord::decided_by(AccessRule::ProvisionalRequestor, true);
    }
    can_approve_provisional(actor)
}

pub fn can_pass_to_contractor(
    actor: &ActorContext,
    facts: &RecordAccessFacts,
) -> AccessDecisionRecord {
    if !actor.active {
        return AccessDecisionRecord::decided_by(AccessRule::ActorInactive, false);
    }
    if actor.admin {
        return AccessDecisionRecord::decided_by(AccessRule::ActorAdmin, true);
    }
    if !actor.verified() {
        return AccessDecisionRecord::decided_by(AccessRule::ActorUnverified, false);
    }
    if !actor.can_pass_to_contractor {
        return AccessDecisionRecord::decided_by(AccessRule::CapabilityMissing, false);
    }
    if !can_view(actor, facts).allowed {
        return AccessDecisionRecord::decided_by(AccessRule::NoViewAccess, false);
    }
    AccessDecisionRecord::decided_by(AccessRule::ViewAccess, true)
}

pub fn can_audit_monitors(actor: &ActorContext) -> AccessDecisionRecord {
    if !actor.active {
        return AccessDecisionRecord::decided_by(AccessRule::ActorInactive, false);
    }
    if actor.admin {
        return AccessDecisionRecord::decided_by(AccessRule::ActorAdmin, true);
    }
    if !actor.verified() {
        return AccessDecisionRecord::decided_by(AccessRule::ActorUnverified, false);
    }
    if actor.can_audit_monitors {
        return AccessDecisionRecord::decided_by(AccessRule::CapabilityGranted, true);
    }
    AccessDecisionRecord::decided_by(AccessRule::CapabilityMissing, false)
}

/// Record types the actor may file records under or browse.
pub fn allowed_record_types(
    actor: &ActorContext,
    all_record_types: &BTreeSet<RecordTypeId>,
) -> BTreeSet<RecordTypeId> {
    if !actor.active || !actor.verified() {
        return BTreeSet::new();
    }
    if actor.admin || actor.super_org {
        return all_record_types.clone();
    }
    actor
        .org_record_types
        .intersection(all_record_types)
        .copied()
        .collect()
}

/// Filing a new record requires write access and an allowed record type.
pub fn can_create_record(
    actor: &ActorContext,
    record_type_id: RecordTypeId,
    all_record_types: &BTreeSet<RecordTypeId>,
) -> AccessDecisionRecord {
    if !actor.active {
        return AccessDecisionRecord::decided_by(AccessRule::ActorInactive, false);
    }
    if actor.reports_only && !actor.admin {
        return AccessDecisionRecord::decided_by(AccessRule::ReportsOnly, false);
    }
    if !actor.verified() {
        return AccessDecisionRecord::decided_by(AccessRule::ActorUnverified, false);
    }
    if !allowed_record_types(actor, all_record_types).contains(&record_type_id) {
        return AccessDecisionRecord::decided_by(AccessRule::NoRuleMatched, false);
    }
    if actor.admin {
        AccessDecisionRecord::decided_by(AccessRule::ActorAdmin, true)
    } else if actor.super_org {
        AccessDecisionRecord::decided_by(AccessRule::SuperOrg, true)
    } else {
        AccessDecisionRecord::decided_by(AccessRule::OrgScopedRecordType, true)
    }
}

/// Directory administration (approval settings, org migration).
pub fn can_administer(actor: &ActorContext) -> AccessDecisionRecord {
    if !actor.active {
        return AccessDecisionRecord::decided_by(AccessRule::ActorInactive, false);
    }
    if actor.admin {
        return AccessDecisionRecord::decided_by(AccessRule::ActorAdmin, true);
    }
    AccessDecisionRecord::decided_by(AccessRule::CapabilityMissing, false)
}
