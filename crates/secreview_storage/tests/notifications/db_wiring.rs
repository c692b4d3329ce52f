#![forbid(unsafe_code)]

use chrono::{DateTime, TimeZone, Utc};

use secreview_kernel_contracts::audit::TargetType;
use secreview_kernel_contracts::directory::{IdentityRecord, UserId};
use secreview_kernel_contracts::notification::{
    NotificationClass, NotificationInput, NotificationSubject,
};
use secreview_storage::repo::NotificationRepo;
use secreview_storage::store::{NotificationUpsert, ReviewStore};

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 1, hour, 0, 0).unwrap()
}

fn store() -> ReviewStore {
    let mut s = ReviewStore::new_in_memory();
    s.insert_identity(IdentityRecord::v1(UserId(1), "Owner", None).unwrap())
        .unwrap();
    s
}

fn reply(review: u64, hour: u32) -> NotificationInput {
    NotificationInput::v1(
        UserId(1),
        NotificationClass::ReplyToComment,
        NotificationSubject::new(TargetType::Review, review),
        "Q3 pentest",
        at(hour),
    )
    .unwrap()
}

#[test]
fn at_notifications_db_01_second_event_renews_unviewed_row() {
    let mut s = store();
    let first = s.upsert_notification_row(reply(5, 9)).unwrap();
    let second = s.upsert_notification_row(reply(5, 10)).unwrap();

    let NotificationUpsert::Inserted(id) = first else {
        panic!("expected insert");
    };
    assert_eq!(second, NotificationUpsert::Renewed(id));

    let rows = s.notifications_for(UserId(1));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].renewed_count, 1);
    assert_eq!(rows[0].renewed_at, Some(at(10)));
}

#[test]
fn at_notifications_db_02_viewed_row_frees_the_key() {
    let mut s = store();
    let id = s.upsert_notification_row(reply(5, 9)).unwrap().notification_id();
    s.mark_notification_read(id, at(10)).unwrap();

    let again = s.upsert_notification_row(reply(5, 11)).unwrap();
    assert!(matches!(again, NotificationUpsert::Inserted(_)));
    assert_eq!(s.notifications_for(UserId(1)).len(), 2);
    assert_eq!(s.unread_notification_rows(UserId(1)).len(), 1);
}

#[test]
fn at_notifications_db_03_mark_all_read_and_ordering() {
    let mut s = store();
    s.upsert_notification_row(reply(5, 9)).unwrap();
    s.upsert_notification_row(reply(6, 10)).unwrap();
    s.upsert_notification_row(reply(5, 11)).unwrap();

    let unread = s.unread_notification_rows(UserId(1));
    assert_eq!(unread.len(), 2);
    // The renewed review-5 notification sorts first.
    assert_eq!(unread[0].subject.subject_id, "5");

    assert_eq!(s.mark_all_notifications_read(UserId(1), at(12)), 2);
    assert!(s.unread_notification_rows(UserId(1)).is_empty());
    assert_eq!(s.mark_all_notifications_read(UserId(1), at(12)), 0);
}

#[test]
fn at_notifications_db_04_recipient_must_exist() {
    let mut s = store();
    let mut input = reply(5, 9);
    input.recipient = UserId(2);
    assert!(s.upsert_notification_row(input).is_err());
}
