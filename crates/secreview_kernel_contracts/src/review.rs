#![forbid(unsafe_code)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{numeric_id, validate_opt_text, validate_text};
use crate::directory::{OrgId, UserId};
use crate::record::ReviewRecordId;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const REVIEW_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

numeric_id!(ReviewId, "review_id");
numeric_id!(FindingId, "finding_id");

/// Decision an actor asks the state machine to move a review towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionTarget {
    Pass,
    Fail,
    InProgress,
}

/// Main review lifecycle. `complete` and `is_pending` are mutually exclusive by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    InProgress,
    PendingApproval {
        pending_by: UserId,
        pending_pass: bool,
        pending_at: DateTime<Utc>,
    },
    Passed {
        approved_by: UserId,
        closed_at: DateTime<Utc>,
    },
    Failed {
        approved_by: UserId,
        closed_at: DateTime<Utc>,
    },
}

impl ReviewStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, ReviewStatus::Passed { .. } | ReviewStatus::Failed { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ReviewStatus::PendingApproval { .. })
    }

    pub fn pending_by(&self) -> Option<UserId> {
        match self {
            ReviewStatus::PendingApproval { pending_by, .. } => Some(*pending_by),
            _ => None,
        }
    }
}

/// Provisional-pass sub-state, orthogonal to [`ReviewStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisionalTrack {
    None,
    Requested {
        requestor: UserId,
        requested_at: DateTime<Utc>,
        expiry: NaiveDate,
    },
    Approved {
        requestor: UserId,
        approver: UserId,
        expiry: NaiveDate,
    },
}

impl ProvisionalTrack {
    pub fn requestor(&self) -> Option<UserId> {
        match self {
            ProvisionalTrack::None => None,
            ProvisionalTrack::Requested { requestor, .. }
            | ProvisionalTrack::Approved { requestor, .. } => Some(*requestor),
        }
    }

    pub fn is_outstanding(&self) -> bool {
        matches!(self, ProvisionalTrack::Requested { .. })
    }
}

/// One review cycle against a [`crate::record::ReviewRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub schema_version: SchemaVersion,
    pub review_id: ReviewId,
    pub record_id: ReviewRecordId,
    pub name: String,
    pub reviewer: Option<UserId>,
    pub org_created: Option<OrgId>,
    pub contractor_review: bool,
    pub status: ReviewStatus,
    pub provisional: ProvisionalTrack,
    pub disagree_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub con_closed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token; bumped by the store on every committed write.
    pub version: u64,
}

impl Review {
    pub fn v1(
        review_id: ReviewId,
        record_id: ReviewRecordId,
        name: impl Into<String>,
        reviewer: Option<UserId>,
        org_created: Option<OrgId>,
        contractor_review: bool,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            schema_version: REVIEW_CONTRACT_VERSION,
            review_id,
            record_id,
            name: name.into(),
            reviewer,
            org_created,
            contractor_review,
            status: ReviewStatus::InProgress,
            provisional: ProvisionalTrack::None,
            disagree_reason: None,
            created_at,
            con_closed_at: None,
            version: 1,
        };
        row.validate()?;
        Ok(row)
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    pub fn legacy_fields(&self) -> LegacyStatusFields {
        LegacyStatusFields::derive(self)
    }

    pub fn status_label(&self) -> ReviewStatusLabel {
        let legacy = self.legacy_fields();
        if legacy.is_pending {
            ReviewStatusLabel::AwaitingReview
        } else if !legacy.complete && legacy.pass && legacy.prov_pass_req {
            ReviewStatusLabel::ProvisionalRequested
        } else if legacy.complete && legacy.prov_pass {
            ReviewStatusLabel::ProvisionallyPassed
        } else if !legacy.complete {
            ReviewStatusLabel::InProgress
        } else if legacy.pass {
            ReviewStatusLabel::Passed
        } else {
            ReviewStatusLabel::Failed
        }
    }
}

impl Validate for Review {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != REVIEW_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "review.schema_version",
                reason: "must match REVIEW_CONTRACT_VERSION",
            });
        }
        self.review_id.validate()?;
        self.record_id.validate()?;
        validate_text("review.name", &self.name, 100)?;
        if let Some(reviewer) = self.reviewer {
            reviewer.validate()?;
        }
        validate_opt_text("review.disagree_reason", &self.disagree_reason, 4096)?;
        if self.version == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "review.version",
                reason: "must be > 0",
            });
        }
        match (&self.provisional, &self.status) {
            (ProvisionalTrack::None, _) => {}
            (ProvisionalTrack::Requested { .. }, ReviewStatus::InProgress) => {}
            (ProvisionalTrack::Approved { .. }, ReviewStatus::Passed { .. }) => {}
            (ProvisionalTrack::Requested { .. }, _) => {
                return Err(ContractViolation::InvalidValue {
                    field: "review.provisional",
                    reason: "an outstanding provisional request requires status InProgress",
                });
            }
            (ProvisionalTrack::Approved { .. }, _) => {
                return Err(ContractViolation::InvalidValue {
                    field: "review.provisional",
                    reason: "an approved provisional pass requires status Passed",
                });
            }
        }
        if self.contractor_review && self.provisional != ProvisionalTrack::None {
            return Err(ContractViolation::InvalidValue {
                field: "review.provisional",
                reason: "contractor reviews cannot be provisionally passed",
            });
        }
        Ok(())
    }
}

/// Flat boolean view of a review, as consumed by reporting and legacy exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyStatusFields {
    pub complete: bool,
    pub pass: bool,
    pub is_pending: bool,
    pub pending_by: Option<UserId>,
    pub pending_pass: bool,
    pub pending_at: Option<DateTime<Utc>>,
    pub approved_by: Option<UserId>,
    pub closed_at: Option<DateTime<Utc>>,
    pub prov_pass_req: bool,
    pub prov_pass: bool,
    pub prov_pass_requestor: Option<UserId>,
    pub prov_pass_approver: Option<UserId>,
    pub prov_pass_expiry: Option<NaiveDate>,
}

impl LegacyStatusFields {
    fn derive(review: &Review) -> Self {
        let mut out = Self {
            complete: false,
            pass: false,
            is_pending: false,
            pending_by: None,
            pending_pass: false,
            pending_at: None,
            approved_by: None,
            closed_at: None,
            prov_pass_req: false,
            prov_pass: false,
            prov_pass_requestor: None,
            prov_pass_approver: None,
            prov_pass_expiry: None,
        };
        match &review.status {
            ReviewStatus::InProgress => {}
            ReviewStatus::PendingApproval {
                pending_by,
                pending_pass,
                pending_at,
            } => {
                out.is_pending = true;
                out.pending_by = Some(*pending_by);
                out.pending_pass = *pending_pass;
                out.pending_at = Some(*pending_at);
            }
            ReviewStatus::Passed {
                approved_by,
                closed_at,
            } => {
                out.complete = true;
                out.pass = true;
                out.approved_by = Some(*approved_by);
                out.closed_at = Some(*closed_at);
            }
            ReviewStatus::Failed {
                approved_by,
                closed_at,
            } => {
                out.complete = true;
                out.approved_by = Some(*approved_by);
                out.closed_at = Some(*closed_at);
            }
        }
        match &review.provisional {
            ProvisionalTrack::None => {}
            ProvisionalTrack::Requested {
                requestor, expiry, ..
            } => {
                out.pass = true;
                out.prov_pass_req = true;
                out.prov_pass_requestor = Some(*requestor);
                out.prov_pass_expiry = Some(*expiry);
            }
            ProvisionalTrack::Approved {
                requestor,
                approver,
                expiry,
            } => {
                out.pass = true;
                out.prov_pass_req = true;
                out.prov_pass = true;
                out.prov_pass_requestor = Some(*requestor);
                out.prov_pass_approver = Some(*approver);
                out.prov_pass_expiry = Some(*expiry);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewStatusLabel {
    AwaitingReview,
    ProvisionalRequested,
    ProvisionallyPassed,
    InProgress,
    Passed,
    Failed,
}

impl ReviewStatusLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatusLabel::AwaitingReview => "Awaiting Review",
            ReviewStatusLabel::ProvisionalRequested => "Provisional Requested",
            ReviewStatusLabel::ProvisionallyPassed => "Provisionally Passed",
            ReviewStatusLabel::InProgress => "In Progress",
            ReviewStatusLabel::Passed => "Review Passed",
            ReviewStatusLabel::Failed => "Review Failed",
        }
    }
}
