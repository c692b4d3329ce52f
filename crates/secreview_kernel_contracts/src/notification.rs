#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::TargetType;
use crate::common::{numeric_id, validate_text};
use crate::directory::UserId;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const NOTIFICATION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

numeric_id!(NotificationId, "notification_id");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NotificationClass {
    CommentRecord,
    CommentReview,
    CommentFinding,
    CommentRecordApprover,
    CommentReviewApprover,
    CommentFindingApprover,
    ReplyToComment,
    ProvPassRequest,
    ProvPassApprove,
    ProvPassDeny,
    ApprovalRequested,
}

impl NotificationClass {
    pub fn code(self) -> u16 {
        match self {
            NotificationClass::CommentRecord => 1,
            NotificationClass::CommentReview => 2,
            NotificationClass::CommentFinding => 3,
            NotificationClass::CommentRecordApprover => 4,
            NotificationClass::CommentReviewApprover => 5,
            NotificationClass::CommentFindingApprover => 6,
            NotificationClass::ReplyToComment => 11,
            NotificationClass::ProvPassRequest => 21,
            NotificationClass::ProvPassApprove => 22,
            NotificationClass::ProvPassDeny => 23,
            NotificationClass::ApprovalRequested => 31,
        }
    }

    /// Body text for a notification about the subject called `subject_name`.
    pub fn body_for(self, subject_name: &str) -> String {
        match self {
            NotificationClass::CommentRecord => format!("New comment on record '{subject_name}'"),
            NotificationClass::CommentReview => format!("New comment on review '{subject_name}'"),
            NotificationClass::CommentFinding => {
                format!("New comment on finding '{subject_name}'")
            }
            NotificationClass::CommentRecordApprover => {
                format!("New comment on record '{subject_name}' (you approved a contractor review)")
            }
            NotificationClass::CommentReviewApprover => {
                format!("New comment on review '{subject_name}' (you approved it)")
            }
            NotificationClass::CommentFindingApprover => {
                format!("New comment on finding '{subject_name}' (you approved its review)")
            }
            NotificationClass::ReplyToComment => format!("New reply on '{subject_name}'"),
            NotificationClass::ProvPassRequest => {
                format!("Provisional pass requested for '{subject_name}'")
            }
            NotificationClass::ProvPassApprove => {
                format!("Your provisional pass request for '{subject_name}' has been approved")
            }
            NotificationClass::ProvPassDeny => {
                format!("Your provisional pass request for '{subject_name}' has been denied")
            }
            NotificationClass::ApprovalRequested => {
                format!("Review '{subject_name}' is awaiting your approval")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NotificationSubject {
    pub subject_type: TargetType,
    pub subject_id: String,
}

impl NotificationSubject {
    pub fn new(subject_type: TargetType, subject_id: impl ToString) -> Self {
        Self {
            subject_type,
            subject_id: subject_id.to_string(),
        }
    }
}

/// Key of the at-most-one unviewed notification per recipient and subject.
pub type UnviewedKey = (UserId, NotificationSubject);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationInput {
    pub schema_version: SchemaVersion,
    pub recipient: UserId,
    pub class: NotificationClass,
    pub subject: NotificationSubject,
    pub body: String,
    pub now: DateTime<Utc>,
}

impl NotificationInput {
    /// Builds an input whose body is the class-specific text for `subject_name`.
    pub fn v1(
        recipient: UserId,
        class: NotificationClass,
        subject: NotificationSubject,
        subject_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            schema_version: NOTIFICATION_CONTRACT_VERSION,
            recipient,
            class,
            subject,
            body: class.body_for(subject_name),
            now,
        };
        row.validate()?;
        Ok(row)
    }

    pub fn unviewed_key(&self) -> UnviewedKey {
        (self.recipient, self.subject.clone())
    }
}

impl Validate for NotificationInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != NOTIFICATION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "notification_input.schema_version",
                reason: "must match NOTIFICATION_CONTRACT_VERSION",
            });
        }
        self.recipient.validate()?;
        validate_text(
            "notification_input.subject_id",
            &self.subject.subject_id,
            128,
        )?;
        validate_text("notification_input.body", &self.body, 512)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub schema_version: SchemaVersion,
    pub notification_id: NotificationId,
    pub recipient: UserId,
    pub class: NotificationClass,
    pub subject: NotificationSubject,
    pub body: String,
    pub viewed: bool,
    pub viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub renewed_at: Option<DateTime<Utc>>,
    pub renewed_count: u32,
}

impl NotificationRecord {
    pub fn from_input_v1(
        notification_id: NotificationId,
        input: NotificationInput,
    ) -> Result<Self, ContractViolation> {
        input.validate()?;
        let row = Self {
            schema_version: NOTIFICATION_CONTRACT_VERSION,
            notification_id,
            recipient: input.recipient,
            class: input.class,
            subject: input.subject,
            body: input.body,
            viewed: false,
            viewed_at: None,
            created_at: input.now,
            renewed_at: None,
            renewed_count: 0,
        };
        row.validate()?;
        Ok(row)
    }

    pub fn unviewed_key(&self) -> UnviewedKey {
        (self.recipient, self.subject.clone())
    }

    /// Latest activity time; renewed notifications sort as if new.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.renewed_at.unwrap_or(self.created_at)
    }
}

impl Validate for NotificationRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != NOTIFICATION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "notification_record.schema_version",
                reason: "must match NOTIFICATION_CONTRACT_VERSION",
            });
        }
        self.notification_id.validate()?;
        self.recipient.validate()?;
        validate_text("notification_record.body", &self.body, 512)?;
        if self.viewed != self.viewed_at.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "notification_record.viewed_at",
                reason: "must be present exactly when viewed",
            });
        }
        if (self.renewed_count > 0) != self.renewed_at.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "notification_record.renewed_at",
                reason: "must be present exactly when renewed_count > 0",
            });
        }
        Ok(())
    }
}
