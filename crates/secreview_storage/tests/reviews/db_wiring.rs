#![forbid(unsafe_code)]

use chrono::{DateTime, TimeZone, Utc};

use secreview_kernel_contracts::audit::TargetType;
use secreview_kernel_contracts::comment::{CommentInput, CommentSubject, CommentVisibility};
use secreview_kernel_contracts::directory::{
    IdentityRecord, OrgId, OrganizationRecord, RecordTypeId, RecordTypeRecord, UserId,
};
use secreview_kernel_contracts::notification::{
    NotificationClass, NotificationInput, NotificationSubject,
};
use secreview_kernel_contracts::record::{ReviewRecord, ReviewRecordId};
use secreview_kernel_contracts::review::{FindingId, Review, ReviewId, ReviewStatus};
use secreview_storage::repo::ReviewRepo;
use secreview_storage::store::{NotificationUpsert, ReviewStore, StorageError};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
}

fn seeded() -> ReviewStore {
    let mut s = ReviewStore::new_in_memory();
    s.insert_organization(OrganizationRecord::v1(OrgId(1), "AppSec").unwrap())
        .unwrap();
    s.insert_record_type(RecordTypeRecord::v1(RecordTypeId(1), "Web App").unwrap())
        .unwrap();
    s.insert_identity(IdentityRecord::v1(UserId(1), "Reviewer", Some(OrgId(1))).unwrap())
        .unwrap();
    let record = ReviewRecord::v1(
        s.next_record_id(),
        RecordTypeId(1),
        "Billing portal",
        Some(OrgId(1)),
        now(),
    )
    .unwrap();
    s.insert_record(record).unwrap();
    let review = Review::v1(
        s.next_review_id(),
        ReviewRecordId(1),
        "Q2 review",
        Some(UserId(1)),
        Some(OrgId(1)),
        false,
        now(),
    )
    .unwrap();
    s.insert_review(review).unwrap();
    s
}

#[test]
fn at_reviews_db_01_review_requires_existing_record() {
    let mut s = seeded();
    let review = Review::v1(
        ReviewId(9),
        ReviewRecordId(42),
        "Dangling",
        None,
        None,
        false,
        now(),
    )
    .unwrap();
    assert!(matches!(
        s.insert_review(review),
        Err(StorageError::ForeignKeyViolation {
            table: "reviews.record_id",
            ..
        })
    ));
}

#[test]
fn at_reviews_db_02_stale_commit_is_rejected() {
    let mut s = seeded();
    let base = s.review_row(ReviewId(1)).unwrap().clone();
    assert_eq!(base.version, 1);

    let mut first = base.clone();
    first.status = ReviewStatus::Passed {
        approved_by: UserId(1),
        closed_at: now(),
    };
    assert_eq!(s.commit_review_row(first, 1).unwrap(), 2);

    let mut second = base;
    second.status = ReviewStatus::Failed {
        approved_by: UserId(1),
        closed_at: now(),
    };
    assert!(matches!(
        s.commit_review_row(second, 1),
        Err(StorageError::VersionConflict {
            expected: 1,
            found: 2,
            ..
        })
    ));
    assert!(s.review(ReviewId(1)).unwrap().is_complete());
    assert_eq!(s.review(ReviewId(1)).unwrap().version, 2);
}

#[test]
fn at_reviews_db_03_record_delete_cascades() {
    let mut s = seeded();
    s.append_comment(
        CommentInput::v1(
            UserId(1),
            Some(OrgId(1)),
            CommentSubject::Finding {
                review_id: ReviewId(1),
                finding_id: FindingId(3),
            },
            "repro attached",
            CommentVisibility::everyone_involved(),
            now(),
        )
        .unwrap(),
    )
    .unwrap();
    s.append_comment(
        CommentInput::v1(
            UserId(1),
            Some(OrgId(1)),
            CommentSubject::Record(ReviewRecordId(1)),
            "scope updated",
            CommentVisibility::default(),
            now(),
        )
        .unwrap(),
    )
    .unwrap();
    assert_eq!(s.comments_for_record(ReviewRecordId(1)).len(), 2);
    assert_eq!(s.reviewers_for_record(ReviewRecordId(1)).len(), 1);

    let removed = s.delete_record(ReviewRecordId(1)).unwrap();
    assert_eq!(removed, vec![ReviewId(1)]);
    assert!(s.review(ReviewId(1)).is_none());
    assert!(s.comments_for_record(ReviewRecordId(1)).is_empty());
    assert!(s.comment(secreview_kernel_contracts::comment::CommentId(1)).is_none());
}

#[test]
fn at_reviews_db_04_comment_subject_must_exist() {
    let mut s = seeded();
    let input = CommentInput::v1(
        UserId(1),
        Some(OrgId(1)),
        CommentSubject::Review(ReviewId(77)),
        "hello",
        CommentVisibility::default(),
        now(),
    )
    .unwrap();
    assert!(matches!(
        s.append_comment(input),
        Err(StorageError::ForeignKeyViolation {
            table: "comments.subject",
            ..
        })
    ));
}

fn pass_request_notice(review_id: ReviewId) -> NotificationInput {
    NotificationInput::v1(
        UserId(1),
        NotificationClass::ApprovalRequested,
        NotificationSubject::new(TargetType::Review, review_id),
        "Q3 review",
        now(),
    )
    .unwrap()
}

fn q3_review(s: &ReviewStore) -> Review {
    Review::v1(
        s.next_review_id(),
        ReviewRecordId(1),
        "Q3 review",
        Some(UserId(1)),
        Some(OrgId(1)),
        false,
        now(),
    )
    .unwrap()
}

#[test]
fn at_reviews_db_05_deleted_review_id_is_not_reissued() {
    let mut s = seeded();
    let doomed = q3_review(&s);
    assert_eq!(doomed.review_id, ReviewId(2));
    s.insert_review(doomed).unwrap();
    let first = s
        .upsert_notification(pass_request_notice(ReviewId(2)))
        .unwrap();
    assert!(matches!(first, NotificationUpsert::Inserted(_)));

    s.delete_review(ReviewId(2)).unwrap();
    assert!(s.notifications_for(UserId(1)).is_empty());

    let replacement = q3_review(&s);
    assert_eq!(replacement.review_id, ReviewId(3));
    s.insert_review(replacement).unwrap();
    let second = s
        .upsert_notification(pass_request_notice(ReviewId(3)))
        .unwrap();
    assert!(matches!(second, NotificationUpsert::Inserted(_)));
    assert_eq!(s.notifications_for(UserId(1))[0].renewed_count, 0);
}

#[test]
fn at_reviews_db_06_deleted_record_id_is_not_reissued() {
    let mut s = seeded();
    s.upsert_notification(pass_request_notice(ReviewId(1)))
        .unwrap();
    s.delete_record(ReviewRecordId(1)).unwrap();

    assert!(s.notifications_for(UserId(1)).is_empty());
    assert_eq!(s.next_record_id(), ReviewRecordId(2));
    assert_eq!(s.next_review_id(), ReviewId(2));

    // The purged key no longer renews the deleted review's notice.
    let again = s
        .upsert_notification(pass_request_notice(ReviewId(1)))
        .unwrap();
    assert!(matches!(again, NotificationUpsert::Inserted(_)));
}
