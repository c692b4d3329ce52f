#![forbid(unsafe_code)]

use chrono::{DateTime, TimeZone, Utc};

use secreview_kernel_contracts::audit::{
    AuditEventId, AuditEventInput, AuditEventType, AuditTarget, TargetType,
};
use secreview_kernel_contracts::directory::{IdentityRecord, UserId};
use secreview_storage::audit::AuditRuntime;
use secreview_storage::repo::AuditRepo;
use secreview_storage::store::{ReviewStore, StorageError};

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, day, 12, 0, 0).unwrap()
}

fn store() -> ReviewStore {
    let mut s = ReviewStore::new_in_memory();
    s.insert_identity(IdentityRecord::v1(UserId(1), "Auditor", None).unwrap())
        .unwrap();
    s
}

fn input(day: u32, event_type: AuditEventType) -> AuditEventInput {
    AuditEventInput::v1(
        at(day),
        event_type,
        UserId(1),
        AuditTarget::new(TargetType::Review, 5),
        Some(AuditTarget::new(TargetType::Record, 2)),
        None,
        Some(serde_json::json!({"user_name": "Auditor"})),
    )
    .unwrap()
}

#[test]
fn at_audit_db_01_append_only_and_queryable() {
    let mut s = store();
    let a = AuditRuntime::emit(&mut s, input(1, AuditEventType::ReviewPass)).unwrap();
    AuditRuntime::emit(&mut s, input(3, AuditEventType::ReviewInProgress)).unwrap();
    AuditRuntime::emit(&mut s, input(5, AuditEventType::ReviewPass)).unwrap();

    assert_eq!(a, AuditEventId(1));
    assert_eq!(s.audit_rows().len(), 3);
    assert_eq!(s.audit_rows_by_type(AuditEventType::ReviewPass).len(), 2);
    assert_eq!(s.audit_rows_in_range(at(2), at(5)).len(), 1);
    assert_eq!(
        s.audit_rows_for_target(&AuditTarget::new(TargetType::Record, 2))
            .len(),
        3
    );
    assert!(matches!(
        s.attempt_overwrite_audit_event(a),
        Err(StorageError::AppendOnlyViolation {
            table: "audit_events"
        })
    ));
}

#[test]
fn at_audit_db_02_actor_must_exist() {
    let mut s = store();
    let mut bad = input(1, AuditEventType::RecordCreate);
    bad.actor = UserId(99);
    assert!(matches!(
        AuditRuntime::emit(&mut s, bad),
        Err(StorageError::ForeignKeyViolation { .. })
    ));
    assert!(s.audit_rows().is_empty());
}

#[test]
fn at_audit_db_03_monitor_state_is_the_only_mutation() {
    let mut s = store();
    let id = AuditRuntime::emit(&mut s, input(1, AuditEventType::ProvPassApprove)).unwrap();
    let before = s.audit_event(id).unwrap().clone();

    s.set_audit_monitor_state(id, UserId(1), true, at(2)).unwrap();

    let after = s.audit_event(id).unwrap();
    assert!(after.monitor.reviewed && after.monitor.flagged);
    assert_eq!(after.monitor.reviewed_by, Some(UserId(1)));
    assert_eq!(after.event_type, before.event_type);
    assert_eq!(after.payload, before.payload);
    assert!(after.payload_intact());
    assert!(s
        .set_audit_monitor_state(AuditEventId(40), UserId(1), false, at(2))
        .is_err());
}
