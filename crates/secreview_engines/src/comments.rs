#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use secreview_kernel_contracts::comment::CommentRecord;
use secreview_kernel_contracts::directory::{OrgId, UserId};

use crate::access::ActorContext;

/// Reviewer population a comment thread is filtered against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentScope {
    /// A single review; only its current reviewer counts.
    Review {
        reviewer: Option<UserId>,
        reviewer_org: Option<OrgId>,
    },
    /// A whole record; every reviewer ever assigned across its reviews counts.
    Record {
        reviewers: BTreeSet<UserId>,
        reviewer_orgs: BTreeSet<OrgId>,
    },
}

impl CommentScope {
    fn has_reviewer(&self, user_id: UserId) -> bool {
        match self {
            CommentScope::Review { reviewer, .. } => *reviewer == Some(user_id),
            CommentScope::Record { reviewers, .. } => reviewers.contains(&user_id),
        }
    }

    fn has_reviewer_org(&self, org_id: OrgId) -> bool {
        match self {
            CommentScope::Review { reviewer_org, .. } => *reviewer_org == Some(org_id),
            CommentScope::Record { reviewer_orgs, .. } => reviewer_orgs.contains(&org_id),
        }
    }
}

pub fn is_visible(comment: &CommentRecord, viewer: &ActorContext, scope: &CommentScope) -> bool {
    if viewer.admin || viewer.super_org {
        return true;
    }
    if comment.author == viewer.user_id {
        return true;
    }
    let vis = comment.visibility;
    if vis.reviewer && scope.has_reviewer(viewer.user_id) {
        return true;
    }
    // Org bits never match an unverified viewer.
    let Some(viewer_org) = viewer.org_id else {
        return false;
    };
    if vis.author_org && comment.author_org == Some(viewer_org) {
        return true;
    }
    vis.reviewer_org && scope.has_reviewer_org(viewer_org)
}

pub fn filter_visible<'a>(
    comments: &'a [CommentRecord],
    viewer: &ActorContext,
    scope: &CommentScope,
) -> Vec<&'a CommentRecord> {
    comments
        .iter()
        .filter(|c| is_visible(c, viewer, scope))
        .collect()
}
