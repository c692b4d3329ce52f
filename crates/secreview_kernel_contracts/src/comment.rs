#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{numeric_id, validate_text};
use crate::directory::{OrgId, UserId};
use crate::record::ReviewRecordId;
use crate::review::{FindingId, ReviewId};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const COMMENT_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const COMMENT_BODY_MAX_LEN: usize = 16 * 1024;

numeric_id!(CommentId, "comment_id");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CommentSubject {
    Record(ReviewRecordId),
    Review(ReviewId),
    /// Findings belong to a review; the review id scopes reviewer-based visibility.
    Finding {
        review_id: ReviewId,
        finding_id: FindingId,
    },
}

impl CommentSubject {
    pub fn review_id(&self) -> Option<ReviewId> {
        match self {
            CommentSubject::Record(_) => None,
            CommentSubject::Review(review_id) => Some(*review_id),
            CommentSubject::Finding { review_id, .. } => Some(*review_id),
        }
    }
}

/// Audience bits beyond the always-visible author/admin/super-org set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentVisibility {
    pub author_org: bool,
    pub reviewer: bool,
    pub reviewer_org: bool,
}

impl CommentVisibility {
    pub fn everyone_involved() -> Self {
        Self {
            author_org: true,
            reviewer: true,
            reviewer_org: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentInput {
    pub schema_version: SchemaVersion,
    pub author: UserId,
    /// Author's org at posting time; org-visibility is evaluated against this.
    pub author_org: Option<OrgId>,
    pub subject: CommentSubject,
    pub body: String,
    pub visibility: CommentVisibility,
    pub now: DateTime<Utc>,
}

impl CommentInput {
    pub fn v1(
        author: UserId,
        author_org: Option<OrgId>,
        subject: CommentSubject,
        body: impl Into<String>,
        visibility: CommentVisibility,
        now: DateTime<Utc>,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            schema_version: COMMENT_CONTRACT_VERSION,
            author,
            author_org,
            subject,
            body: body.into(),
            visibility,
            now,
        };
        row.validate()?;
        Ok(row)
    }
}

impl Validate for CommentInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != COMMENT_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "comment_input.schema_version",
                reason: "must match COMMENT_CONTRACT_VERSION",
            });
        }
        self.author.validate()?;
        validate_text("comment_input.body", &self.body, COMMENT_BODY_MAX_LEN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub schema_version: SchemaVersion,
    pub comment_id: CommentId,
    pub author: UserId,
    pub author_org: Option<OrgId>,
    pub subject: CommentSubject,
    pub body: String,
    pub visibility: CommentVisibility,
    pub created_at: DateTime<Utc>,
}

impl CommentRecord {
    pub fn from_input_v1(
        comment_id: CommentId,
        input: CommentInput,
    ) -> Result<Self, ContractViolation> {
        input.validate()?;
        comment_id.validate()?;
        Ok(Self {
            schema_version: COMMENT_CONTRACT_VERSION,
            comment_id,
            author: input.author,
            author_org: input.author_org,
            subject: input.subject,
            body: input.body,
            visibility: input.visibility,
            created_at: input.now,
        })
    }
}
