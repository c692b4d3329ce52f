#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};

use secreview_kernel_contracts::directory::{
    ApproverSet, IdentityRecord, OrgId, OrganizationRecord, RecordTypeId, RecordTypeRecord,
    UserId,
};
use secreview_kernel_contracts::record::{ReviewRecord, ReviewRecordId};
use secreview_storage::store::{ReviewStore, StorageError};

fn store_with_orgs() -> ReviewStore {
    let mut s = ReviewStore::new_in_memory();
    s.insert_organization(OrganizationRecord::v1(OrgId(1), "AppSec").unwrap())
        .unwrap();
    s.insert_organization(OrganizationRecord::v1(OrgId(2), "Red Team").unwrap())
        .unwrap();
    s.insert_record_type(RecordTypeRecord::v1(RecordTypeId(1), "Web App").unwrap())
        .unwrap();
    s
}

#[test]
fn at_directory_db_01_identity_fks_enforced() {
    let mut s = store_with_orgs();

    let orphan = IdentityRecord::v1(UserId(1), "Orphan", Some(OrgId(99))).unwrap();
    assert!(matches!(
        s.insert_identity(orphan),
        Err(StorageError::ForeignKeyViolation {
            table: "identities.org_id",
            ..
        })
    ));

    let mut managed = IdentityRecord::v1(UserId(2), "Managed", Some(OrgId(1))).unwrap();
    managed.manager_id = Some(UserId(3));
    assert!(matches!(
        s.insert_identity(managed),
        Err(StorageError::ForeignKeyViolation {
            table: "identities.manager_id",
            ..
        })
    ));

    let ok = IdentityRecord::v1(UserId(3), "Manager", Some(OrgId(1))).unwrap();
    s.insert_identity(ok.clone()).unwrap();
    assert!(matches!(
        s.insert_identity(ok),
        Err(StorageError::DuplicateKey { .. })
    ));
}

#[test]
fn at_directory_db_02_record_type_scoping() {
    let mut s = store_with_orgs();
    s.scope_record_type_to_org(OrgId(1), RecordTypeId(1)).unwrap();
    assert!(s.org_record_types(OrgId(1)).contains(&RecordTypeId(1)));
    assert!(s.org_record_types(OrgId(2)).is_empty());
    assert!(s.scope_record_type_to_org(OrgId(1), RecordTypeId(5)).is_err());

    s.unscope_record_type_from_org(OrgId(1), RecordTypeId(1));
    assert!(s.org_record_types(OrgId(1)).is_empty());
}

#[test]
fn at_directory_db_03_org_migration_moves_members_and_records() {
    let mut s = store_with_orgs();
    s.scope_record_type_to_org(OrgId(1), RecordTypeId(1)).unwrap();
    s.insert_identity(IdentityRecord::v1(UserId(1), "Member", Some(OrgId(1))).unwrap())
        .unwrap();
    let record = ReviewRecord::v1(
        ReviewRecordId(1),
        RecordTypeId(1),
        "Billing portal",
        Some(OrgId(1)),
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    )
    .unwrap();
    s.insert_record(record).unwrap();

    s.migrate_and_delete_organization(OrgId(1), OrgId(2)).unwrap();

    assert!(s.organization(OrgId(1)).is_none());
    assert_eq!(s.identity(UserId(1)).unwrap().org_id, Some(OrgId(2)));
    assert_eq!(
        s.record(ReviewRecordId(1)).unwrap().org_created,
        Some(OrgId(2))
    );
    assert!(s.org_record_types(OrgId(1)).is_empty());
    assert!(s.migrate_and_delete_organization(OrgId(2), OrgId(2)).is_err());
}

#[test]
fn at_directory_db_04_org_migration_repoints_approver_orgs() {
    let mut s = store_with_orgs();
    let approved_by_appsec = ApproverSet {
        identities: BTreeSet::new(),
        organizations: BTreeSet::from([OrgId(1)]),
    };
    let mut vendor_org = OrganizationRecord::v1(OrgId(3), "Vendor Co").unwrap();
    vendor_org.requires_approval = true;
    vendor_org.approvers = approved_by_appsec.clone();
    s.insert_organization(vendor_org).unwrap();
    let mut junior = IdentityRecord::v1(UserId(1), "Junior", Some(OrgId(3))).unwrap();
    junior.requires_approval = true;
    junior.approvers = approved_by_appsec;
    s.insert_identity(junior).unwrap();

    s.migrate_and_delete_organization(OrgId(1), OrgId(2)).unwrap();

    let expected = BTreeSet::from([OrgId(2)]);
    assert_eq!(s.identity(UserId(1)).unwrap().approvers.organizations, expected);
    assert_eq!(
        s.organization(OrgId(3)).unwrap().approvers.organizations,
        expected
    );
    assert!(s.identity(UserId(1)).unwrap().approvers.identities.is_empty());
}
