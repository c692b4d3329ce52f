#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use secreview_engines::access::{self, ActorContext};
use secreview_engines::comments::{self, CommentScope};
use secreview_kernel_contracts::audit::TargetType;
use secreview_kernel_contracts::comment::{
    CommentId, CommentInput, CommentRecord, CommentSubject, CommentVisibility,
};
use secreview_kernel_contracts::directory::{OrgId, UserId};
use secreview_kernel_contracts::notification::{
    NotificationClass, NotificationId, NotificationInput, NotificationRecord, NotificationSubject,
};
use secreview_kernel_contracts::record::{ReviewRecord, ReviewRecordId};
use secreview_kernel_contracts::review::{Review, ReviewId, ReviewStatus};
use secreview_storage::store::ReviewStore;

use crate::emitter::{SideEffectWarning, SideEffects};
use crate::runtime::{
    context_for, ActorRequest, LifecycleError, LifecycleOutcome, ReviewLifecycleRuntime,
};

/// Comment notification classes for one subject kind.
#[derive(Debug, Clone, Copy)]
struct CommentClasses {
    reviewer: NotificationClass,
    approver: NotificationClass,
}

impl CommentClasses {
    fn for_subject(subject: &CommentSubject) -> Self {
        match subject {
            CommentSubject::Record(_) => Self {
                reviewer: NotificationClass::CommentRecord,
                approver: NotificationClass::CommentRecordApprover,
            },
            CommentSubject::Review(_) => Self {
                reviewer: NotificationClass::CommentReview,
                approver: NotificationClass::CommentReviewApprover,
            },
            CommentSubject::Finding { .. } => Self {
                reviewer: NotificationClass::CommentFinding,
                approver: NotificationClass::CommentFindingApprover,
            },
        }
    }
}

fn approved_by(review: &Review) -> Option<UserId> {
    match review.status {
        ReviewStatus::Passed { approved_by, .. } | ReviewStatus::Failed { approved_by, .. } => {
            Some(approved_by)
        }
        _ => None,
    }
}

impl ReviewLifecycleRuntime {
    fn comment_scope(
        &self,
        store: &ReviewStore,
        subject: &CommentSubject,
        record: &ReviewRecord,
    ) -> CommentScope {
        let org_of =
            |uid: UserId| -> Option<OrgId> { store.identity(uid).and_then(|i| i.org_id) };
        match subject.review_id().and_then(|id| store.review(id)) {
            Some(review) => CommentScope::Review {
                reviewer: review.reviewer,
                reviewer_org: review.reviewer.and_then(org_of),
            },
            None => {
                let reviewers = store.reviewers_for_record(record.record_id);
                let reviewer_orgs = reviewers.iter().filter_map(|u| org_of(*u)).collect();
                CommentScope::Record {
                    reviewers,
                    reviewer_orgs,
                }
            }
        }
    }

    fn subject_record(
        &self,
        store: &ReviewStore,
        subject: &CommentSubject,
    ) -> Result<(ReviewRecord, Option<Review>), LifecycleError> {
        match subject.review_id() {
            Some(review_id) => {
                let review = self.load_review(store, review_id)?;
                let record = self.load_record(store, review.record_id)?;
                Ok((record, Some(review)))
            }
            None => {
                let CommentSubject::Record(record_id) = *subject else {
                    return Err(LifecycleError::NotFound {
                        entity: "comment_subject",
                        key: format!("{subject:?}"),
                    });
                };
                Ok((self.load_record(store, record_id)?, None))
            }
        }
    }

    /// Posts a comment and notifies the people involved.
    ///
    /// Earlier commenters on the same subject get a reply notice; reviewers and approvers
    /// of contractor reviews get the subject's comment class. The reply class wins when
    /// both apply. The author is never notified, nor is anyone who cannot see the comment.
    pub fn post_comment(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        subject: CommentSubject,
        body: impl Into<String>,
        visibility: CommentVisibility,
    ) -> Result<LifecycleOutcome<CommentId>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let (record, review) = self.subject_record(store, &subject)?;
        let facts = self.record_facts(store, &actor, &record);
        self.gate(&actor, "post_comment", access::can_view(&actor, &facts))?;

        let input =
            CommentInput::v1(req.actor, actor.org_id, subject, body, visibility, req.now)?;
        let previous: BTreeSet<UserId> = store
            .comments_for_subject(&subject)
            .into_iter()
            .map(|c| c.author)
            .collect();
        let comment_id = store.append_comment(input)?;

        let recipients =
            self.comment_recipients(store, &subject, &record, review.as_ref(), previous);
        let mut effects = SideEffects::new();
        let Some(comment) = store.comment(comment_id).cloned() else {
            return Ok(LifecycleOutcome::from_effects(comment_id, effects));
        };
        let scope = self.comment_scope(store, &subject, &record);
        let (notification_subject, subject_name) =
            notification_subject(&subject, &record, review.as_ref());
        for (recipient, class) in recipients {
            if recipient == req.actor {
                continue;
            }
            let Some(identity) = store.identity(recipient) else {
                continue;
            };
            let viewer = context_for(store, identity);
            if !identity.active || !comments::is_visible(&comment, &viewer, &scope) {
                continue;
            }
            match NotificationInput::v1(
                recipient,
                class,
                notification_subject.clone(),
                &subject_name,
                req.now,
            ) {
                Ok(input) => effects.notify(store, input),
                Err(e) => effects.warnings.push(SideEffectWarning::PersistenceFailure {
                    what: "notification",
                    detail: e.to_string(),
                }),
            }
        }
        debug!(
            comment_id = comment_id.0,
            notified = effects.notifications.len(),
            "comment posted"
        );
        Ok(LifecycleOutcome::from_effects(comment_id, effects))
    }

    fn comment_recipients(
        &self,
        store: &ReviewStore,
        subject: &CommentSubject,
        record: &ReviewRecord,
        review: Option<&Review>,
        previous_commenters: BTreeSet<UserId>,
    ) -> Vec<(UserId, NotificationClass)> {
        let classes = CommentClasses::for_subject(subject);
        let reviews: Vec<&Review> = match review {
            Some(r) => vec![r],
            None => store.reviews_for_record(record.record_id),
        };

        // First class assigned to a recipient wins.
        let mut out: BTreeMap<UserId, NotificationClass> = BTreeMap::new();
        for uid in previous_commenters {
            out.entry(uid).or_insert(NotificationClass::ReplyToComment);
        }
        for uid in reviews.iter().filter_map(|r| r.reviewer) {
            out.entry(uid).or_insert(classes.reviewer);
        }
        for uid in reviews
            .iter()
            .filter(|r| r.contractor_review)
            .filter_map(|r| approved_by(r))
        {
            out.entry(uid).or_insert(classes.approver);
        }
        out.into_iter().collect()
    }

    fn visible_comments(
        &self,
        store: &ReviewStore,
        actor: &ActorContext,
        subject: &CommentSubject,
        record: &ReviewRecord,
        thread: Vec<&CommentRecord>,
    ) -> Vec<CommentRecord> {
        let scope = self.comment_scope(store, subject, record);
        thread
            .into_iter()
            .filter(|c| comments::is_visible(c, actor, &scope))
            .cloned()
            .collect()
    }

    /// Comments on the review and its findings that the actor may read.
    pub fn visible_review_comments(
        &self,
        store: &ReviewStore,
        req: &ActorRequest,
        review_id: ReviewId,
    ) -> Result<Vec<CommentRecord>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let review = self.load_review(store, review_id)?;
        let record = self.load_record(store, review.record_id)?;
        let facts = self.record_facts(store, &actor, &record);
        self.gate(&actor, "visible_review_comments", access::can_view(&actor, &facts))?;

        let thread = store
            .comments_for_record(record.record_id)
            .into_iter()
            .filter(|c| c.subject.review_id() == Some(review_id))
            .collect();
        let subject = CommentSubject::Review(review_id);
        Ok(self.visible_comments(store, &actor, &subject, &record, thread))
    }

    /// Every comment on the record and its reviews, filtered against all of its reviewers.
    pub fn visible_record_comments(
        &self,
        store: &ReviewStore,
        req: &ActorRequest,
        record_id: ReviewRecordId,
    ) -> Result<Vec<CommentRecord>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        let record = self.load_record(store, record_id)?;
        let facts = self.record_facts(store, &actor, &record);
        self.gate(&actor, "visible_record_comments", access::can_view(&actor, &facts))?;

        let thread = store.comments_for_record(record_id);
        let subject = CommentSubject::Record(record_id);
        Ok(self.visible_comments(store, &actor, &subject, &record, thread))
    }

    /// Notifications belong to their recipient; anyone else sees `NotFound`.
    pub fn mark_read(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        notification_id: NotificationId,
    ) -> Result<(), LifecycleError> {
        self.identity(store, req.actor)?;
        let owned = store
            .notification(notification_id)
            .is_some_and(|n| n.recipient == req.actor);
        if !owned {
            return Err(LifecycleError::NotFound {
                entity: "notification",
                key: notification_id.to_string(),
            });
        }
        store.mark_notification_read(notification_id, req.now)?;
        Ok(())
    }

    pub fn mark_all_read(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
    ) -> Result<usize, LifecycleError> {
        self.identity(store, req.actor)?;
        Ok(store.mark_all_notifications_read(req.actor, req.now))
    }

    pub fn unread_for(
        &self,
        store: &ReviewStore,
        req: &ActorRequest,
    ) -> Result<Vec<NotificationRecord>, LifecycleError> {
        self.identity(store, req.actor)?;
        Ok(store
            .unread_notifications_for(req.actor)
            .into_iter()
            .cloned()
            .collect())
    }
}

fn notification_subject(
    subject: &CommentSubject,
    record: &ReviewRecord,
    review: Option<&Review>,
) -> (NotificationSubject, String) {
    match (subject, review) {
        (CommentSubject::Finding { finding_id, .. }, Some(review)) => (
            NotificationSubject::new(TargetType::Finding, finding_id),
            format!("{} / finding {}", review.name, finding_id),
        ),
        (CommentSubject::Review(review_id), Some(review)) => (
            NotificationSubject::new(TargetType::Review, review_id),
            review.name.clone(),
        ),
        _ => (
            NotificationSubject::new(TargetType::Record, record.record_id),
            record.name.clone(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secreview_kernel_contracts::review::{FindingId, TransitionTarget};

    use crate::testkit::*;

    fn received(
        store: &ReviewStore,
        outcome: &LifecycleOutcome<CommentId>,
    ) -> Vec<(UserId, NotificationClass)> {
        outcome
            .notifications
            .iter()
            .filter_map(|n| store.notification(n.notification_id()))
            .map(|n| (n.recipient, n.class))
            .collect()
    }

    #[test]
    fn at_discussion_01_reply_class_wins_over_reviewer_class() {
        let mut w = world();
        let subject = CommentSubject::Review(w.review);
        let first = w
            .runtime
            .post_comment(
                &mut w.store,
                &req(CAROL, 1),
                subject,
                "Is the session cookie SameSite?",
                CommentVisibility::everyone_involved(),
            )
            .unwrap();
        assert_eq!(
            received(&w.store, &first),
            vec![(BOB, NotificationClass::CommentReview)]
        );

        let reply = w
            .runtime
            .post_comment(
                &mut w.store,
                &req(BOB, 2),
                subject,
                "Lax, fixed in build 412",
                CommentVisibility::everyone_involved(),
            )
            .unwrap();
        assert_eq!(
            received(&w.store, &reply),
            vec![(CAROL, NotificationClass::ReplyToComment)]
        );
    }

    #[test]
    fn at_discussion_02_restricted_comment_reaches_only_its_audience() {
        let mut w = world();
        let subject = CommentSubject::Review(w.review);
        w.runtime
            .post_comment(
                &mut w.store,
                &req(CAROL, 1),
                subject,
                "Shared with reviewers",
                CommentVisibility::everyone_involved(),
            )
            .unwrap();
        let private_note = w
            .runtime
            .post_comment(
                &mut w.store,
                &req(ERIN, 2),
                subject,
                "Platform-only context",
                CommentVisibility {
                    author_org: true,
                    ..CommentVisibility::default()
                },
            )
            .unwrap();
        assert!(private_note.notifications.is_empty());

        let bodies = |w: &World, viewer: UserId| -> Vec<String> {
            w.runtime
                .visible_review_comments(&w.store, &req(viewer, 3), w.review)
                .unwrap()
                .into_iter()
                .map(|c| c.body)
                .collect()
        };
        assert_eq!(bodies(&w, BOB), vec!["Shared with reviewers".to_string()]);
        assert_eq!(bodies(&w, ERIN), vec!["Platform-only context".to_string()]);
        assert_eq!(bodies(&w, ADMIN).len(), 2);

        let err = w
            .runtime
            .post_comment(
                &mut w.store,
                &req(UserId(99), 4),
                subject,
                "ghost",
                CommentVisibility::everyone_involved(),
            )
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { entity: "identity", .. }));
    }

    #[test]
    fn at_discussion_03_finding_comment_names_the_finding() {
        let mut w = world();
        let subject = CommentSubject::Finding {
            review_id: w.review,
            finding_id: FindingId(3),
        };
        let out = w
            .runtime
            .post_comment(
                &mut w.store,
                &req(ALICE, 1),
                subject,
                "Reflected XSS on /search",
                CommentVisibility::everyone_involved(),
            )
            .unwrap();
        let note = w
            .store
            .notification(out.notifications[0].notification_id())
            .unwrap();
        assert_eq!(note.recipient, BOB);
        assert_eq!(note.class, NotificationClass::CommentFinding);
        assert_eq!(note.subject, NotificationSubject::new(TargetType::Finding, 3));
        assert!(note.body.contains("2024 H1 / finding 3"));
    }

    #[test]
    fn at_discussion_04_record_comment_reaches_contractor_approver() {
        let mut w = world();
        let contractor_review = w
            .runtime
            .pass_to_contractor(&mut w.store, &req(ALICE, 1), w.record, "External pentest")
            .unwrap()
            .value
            .review_id;
        for (actor, minute) in [(DAVE, 2), (CAROL, 3)] {
            w.runtime
                .request_transition(
                    &mut w.store,
                    &req(actor, minute),
                    contractor_review,
                    TransitionTarget::Pass,
                    None,
                )
                .unwrap();
        }

        let out = w
            .runtime
            .post_comment(
                &mut w.store,
                &req(DAVE, 4),
                CommentSubject::Record(w.record),
                "Report uploaded",
                CommentVisibility::everyone_involved(),
            )
            .unwrap();
        assert_eq!(
            received(&w.store, &out),
            vec![
                (BOB, NotificationClass::CommentRecord),
                (CAROL, NotificationClass::CommentRecordApprover),
            ]
        );
        assert_eq!(
            w.runtime
                .visible_record_comments(&w.store, &req(CAROL, 5), w.record)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn at_discussion_05_notifications_are_read_by_their_recipient_only() {
        let mut w = world();
        let subject = CommentSubject::Review(w.review);
        let out = w
            .runtime
            .post_comment(
                &mut w.store,
                &req(CAROL, 1),
                subject,
                "ping",
                CommentVisibility::everyone_involved(),
            )
            .unwrap();
        let id = out.notifications[0].notification_id();

        let err = w.runtime.mark_read(&mut w.store, &req(ALICE, 2), id).unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { entity: "notification", .. }));
        assert_eq!(w.runtime.unread_for(&w.store, &req(BOB, 2)).unwrap().len(), 1);

        w.runtime.mark_read(&mut w.store, &req(BOB, 3), id).unwrap();
        assert!(w.runtime.unread_for(&w.store, &req(BOB, 3)).unwrap().is_empty());

        w.runtime
            .post_comment(
                &mut w.store,
                &req(CAROL, 4),
                subject,
                "ping again",
                CommentVisibility::everyone_involved(),
            )
            .unwrap();
        assert_eq!(w.runtime.mark_all_read(&mut w.store, &req(BOB, 5)).unwrap(), 1);
        assert!(w.runtime.unread_for(&w.store, &req(BOB, 5)).unwrap().is_empty());
    }
}
