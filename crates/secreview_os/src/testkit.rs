#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use secreview_kernel_contracts::directory::{
    ApproverSet, IdentityRecord, OrgId, OrganizationRecord, RecordTypeId, RecordTypeRecord,
    UserId,
};
use secreview_kernel_contracts::linked::LinkedSystemOutcome;
use secreview_kernel_contracts::record::{ReviewRecord, ReviewRecordId};
use secreview_kernel_contracts::review::{Review, ReviewId};
use secreview_storage::store::ReviewStore;

use crate::config::ReviewPolicyConfig;
use crate::linked_system::{LinkedSystemAdapter, LinkedSystemError, LinkedSystemRegistry};
use crate::runtime::{ActorRequest, ReviewLifecycleRuntime};

pub const APPSEC: OrgId = OrgId(1);
pub const PLATFORM: OrgId = OrgId(2);
pub const RED_TEAM: OrgId = OrgId(3);

pub const WEB: RecordTypeId = RecordTypeId(1);
pub const VENDOR: RecordTypeId = RecordTypeId(2);

pub const ADMIN: UserId = UserId(1);
/// AppSec reviewer, may pass records to contractors. Managed by Carol.
pub const ALICE: UserId = UserId(2);
/// AppSec reviewer whose decisions need Carol's approval.
pub const BOB: UserId = UserId(3);
pub const CAROL: UserId = UserId(4);
/// Red Team contractor, approved by Carol.
pub const DAVE: UserId = UserId(5);
/// Platform provisional-pass approver and audit monitor.
pub const ERIN: UserId = UserId(6);
pub const RITA: UserId = UserId(7);

pub const TICKETS: &str = "tickets";

pub fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap() + Duration::minutes(minutes)
}

pub fn req(actor: UserId, minutes: i64) -> ActorRequest {
    ActorRequest::v1(actor, t(minutes))
}

/// Ticketing adapter that records every call; optionally every call fails.
pub struct RecordingTickets {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

impl RecordingTickets {
    fn answer(&self, call: String) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        self.calls.lock().unwrap().push(call);
        if self.fail {
            Err(LinkedSystemError::Call("ticket API timed out".to_string()))
        } else {
            Ok(LinkedSystemOutcome::ok())
        }
    }
}

impl LinkedSystemAdapter for RecordingTickets {
    fn key(&self) -> &str {
        TICKETS
    }

    fn on_create(
        &self,
        record: &ReviewRecord,
        _actor: UserId,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        self.answer(format!("create:{}", record.record_id))
    }

    fn on_new_review(
        &self,
        _record: &ReviewRecord,
        review: &Review,
        _actor: UserId,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        self.answer(format!("new_review:{}", review.review_id))
    }

    fn on_pass(
        &self,
        _record: &ReviewRecord,
        review: &Review,
        _actor: UserId,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        self.answer(format!("pass:{}", review.review_id))
    }

    fn on_fail(
        &self,
        _record: &ReviewRecord,
        review: &Review,
        _actor: UserId,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        self.answer(format!("fail:{}", review.review_id))
    }

    fn on_provisional_pass(
        &self,
        _record: &ReviewRecord,
        review: &Review,
        _actor: UserId,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        self.answer(format!("provisional_pass:{}", review.review_id))
    }
}

pub struct World {
    pub runtime: ReviewLifecycleRuntime,
    pub store: ReviewStore,
    /// Linked web record, created by Alice's org.
    pub record: ReviewRecordId,
    /// Open review on `record`, assigned to Bob.
    pub review: ReviewId,
    pub linked_calls: Arc<Mutex<Vec<String>>>,
}

impl World {
    pub fn linked_calls(&self) -> Vec<String> {
        self.linked_calls.lock().unwrap().clone()
    }

    pub fn review(&self) -> &Review {
        self.store.review(self.review).unwrap()
    }
}

pub fn world() -> World {
    build(ReviewPolicyConfig::mvp_v1(), false)
}

pub fn world_with_failing_tickets() -> World {
    build(ReviewPolicyConfig::mvp_v1(), true)
}

pub fn world_with_config(config: ReviewPolicyConfig) -> World {
    build(config, false)
}

fn approved_by(user: UserId) -> ApproverSet {
    ApproverSet {
        identities: BTreeSet::from([user]),
        organizations: BTreeSet::new(),
    }
}

fn build(config: ReviewPolicyConfig, fail_tickets: bool) -> World {
    let mut s = ReviewStore::new_in_memory();

    s.insert_organization(OrganizationRecord::v1(APPSEC, "AppSec").unwrap())
        .unwrap();
    s.insert_organization(OrganizationRecord::v1(PLATFORM, "Platform").unwrap())
        .unwrap();
    let mut red_team = OrganizationRecord::v1(RED_TEAM, "Red Team Ltd").unwrap();
    red_team.contractor = true;
    s.insert_organization(red_team).unwrap();

    let mut web = RecordTypeRecord::v1(WEB, "Web application").unwrap();
    web.contractor_passable = true;
    web.provisional_passable = true;
    web.linked_system_key = Some(TICKETS.to_string());
    s.insert_record_type(web).unwrap();
    s.insert_record_type(RecordTypeRecord::v1(VENDOR, "Vendor").unwrap())
        .unwrap();
    for org in [APPSEC, PLATFORM, RED_TEAM] {
        s.scope_record_type_to_org(org, WEB).unwrap();
    }

    let mut admin = IdentityRecord::v1(ADMIN, "Root Admin", Some(APPSEC)).unwrap();
    admin.admin = true;
    s.insert_identity(admin).unwrap();

    s.insert_identity(IdentityRecord::v1(CAROL, "Carol", Some(APPSEC)).unwrap())
        .unwrap();

    let mut alice = IdentityRecord::v1(ALICE, "Alice", Some(APPSEC)).unwrap();
    alice.can_pass_to_contractor = true;
    alice.manager_id = Some(CAROL);
    s.insert_identity(alice).unwrap();

    let mut bob = IdentityRecord::v1(BOB, "Bob", Some(APPSEC)).unwrap();
    bob.requires_approval = true;
    bob.approvers = approved_by(CAROL);
    s.insert_identity(bob).unwrap();

    let mut dave = IdentityRecord::v1(DAVE, "Dave", Some(RED_TEAM)).unwrap();
    dave.requires_approval = true;
    dave.approvers = approved_by(CAROL);
    s.insert_identity(dave).unwrap();

    let mut erin = IdentityRecord::v1(ERIN, "Erin", Some(PLATFORM)).unwrap();
    erin.prov_pass_approver = true;
    erin.can_audit_monitors = true;
    s.insert_identity(erin).unwrap();

    let mut rita = IdentityRecord::v1(RITA, "Rita", Some(APPSEC)).unwrap();
    rita.reports_only = true;
    s.insert_identity(rita).unwrap();

    let mut record = ReviewRecord::v1(
        s.next_record_id(),
        WEB,
        "Customer portal",
        Some(APPSEC),
        t(0),
    )
    .unwrap();
    record.linked_eid = Some("TCK-7".to_string());
    let record_id = record.record_id;
    s.insert_record(record).unwrap();

    let review = Review::v1(
        s.next_review_id(),
        record_id,
        "2024 H1",
        Some(BOB),
        Some(APPSEC),
        false,
        t(0),
    )
    .unwrap();
    let review_id = review.review_id;
    s.insert_review(review).unwrap();

    let linked_calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = LinkedSystemRegistry::new();
    registry
        .register(Box::new(RecordingTickets {
            calls: Arc::clone(&linked_calls),
            fail: fail_tickets,
        }))
        .unwrap();

    World {
        runtime: ReviewLifecycleRuntime::new(config, registry).unwrap(),
        store: s,
        record: record_id,
        review: review_id,
        linked_calls,
    }
}
