#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::common::{numeric_id, validate_opt_text, validate_text};
use crate::directory::UserId;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const AUDIT_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Upper bound on the serialized JSON payload attached to one audit row.
pub const AUDIT_PAYLOAD_MAX_BYTES: usize = 8 * 1024;

numeric_id!(AuditEventId, "audit_event_id");

/// Stable audit event codes. Reporting queries by these values, so they never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuditEventType {
    ProvPassRequest,
    ProvPassApprove,
    ProvPassDeny,
    ProvPassReqCancel,
    AdminOverridePrivateRecord,
    RecordCreate,
    RecordRename,
    RecordMadePrivate,
    RecordMadeNotPrivate,
    RecordMadeGlobal,
    RecordMadeNotGlobal,
    RecordDelete,
    RecordOwnerAssign,
    RecordAllowListChange,
    ReviewCreate,
    ReviewReviewerUnassigned,
    ReviewReviewerAssigned,
    ReviewInProgress,
    ReviewPassReqApproval,
    ReviewPass,
    ReviewFailReqApproval,
    ReviewFail,
    ReviewDelete,
}

impl AuditEventType {
    pub fn code(self) -> u16 {
        match self {
            AuditEventType::ProvPassRequest => 11,
            AuditEventType::ProvPassApprove => 12,
            AuditEventType::ProvPassDeny => 13,
            AuditEventType::ProvPassReqCancel => 14,
            AuditEventType::AdminOverridePrivateRecord => 21,
            AuditEventType::RecordCreate => 101,
            AuditEventType::RecordRename => 102,
            AuditEventType::RecordMadePrivate => 105,
            AuditEventType::RecordMadeNotPrivate => 106,
            AuditEventType::RecordMadeGlobal => 107,
            AuditEventType::RecordMadeNotGlobal => 108,
            AuditEventType::RecordDelete => 110,
            AuditEventType::RecordOwnerAssign => 114,
            AuditEventType::RecordAllowListChange => 115,
            AuditEventType::ReviewCreate => 201,
            AuditEventType::ReviewReviewerUnassigned => 203,
            AuditEventType::ReviewReviewerAssigned => 204,
            AuditEventType::ReviewInProgress => 205,
            AuditEventType::ReviewPassReqApproval => 206,
            AuditEventType::ReviewPass => 207,
            AuditEventType::ReviewFailReqApproval => 208,
            AuditEventType::ReviewFail => 209,
            AuditEventType::ReviewDelete => 210,
        }
    }
}

/// Kind of object an audit row, notification or comment points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetType {
    Record,
    Review,
    Organization,
    User,
    Finding,
    Comment,
    AuditRecord,
    LinkedObject,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AuditTarget {
    pub target_type: TargetType,
    pub target_id: String,
}

impl AuditTarget {
    pub fn new(target_type: TargetType, target_id: impl ToString) -> Self {
        Self {
            target_type,
            target_id: target_id.to_string(),
        }
    }
}

impl Validate for AuditTarget {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("audit_target.target_id", &self.target_id, 128)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEventInput {
    pub schema_version: SchemaVersion,
    pub event_at: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub actor: UserId,
    pub target_a: AuditTarget,
    pub target_b: Option<AuditTarget>,
    pub details_text: Option<String>,
    /// Opaque rendering payload; never consulted for control decisions.
    pub payload: Option<serde_json::Value>,
}

impl AuditEventInput {
    pub fn v1(
        event_at: DateTime<Utc>,
        event_type: AuditEventType,
        actor: UserId,
        target_a: AuditTarget,
        target_b: Option<AuditTarget>,
        details_text: Option<String>,
        payload: Option<serde_json::Value>,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            schema_version: AUDIT_CONTRACT_VERSION,
            event_at,
            event_type,
            actor,
            target_a,
            target_b,
            details_text,
            payload,
        };
        row.validate()?;
        Ok(row)
    }
}

impl Validate for AuditEventInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != AUDIT_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "audit_event_input.schema_version",
                reason: "must match AUDIT_CONTRACT_VERSION",
            });
        }
        self.actor.validate()?;
        self.target_a.validate()?;
        if let Some(b) = &self.target_b {
            b.validate()?;
        }
        validate_opt_text("audit_event_input.details_text", &self.details_text, 8192)?;
        if let Some(payload) = &self.payload {
            if !payload.is_object() {
                return Err(ContractViolation::InvalidValue {
                    field: "audit_event_input.payload",
                    reason: "must be a JSON object",
                });
            }
            if canonical_payload(payload).len() > AUDIT_PAYLOAD_MAX_BYTES {
                return Err(ContractViolation::InvalidValue {
                    field: "audit_event_input.payload",
                    reason: "exceeds AUDIT_PAYLOAD_MAX_BYTES",
                });
            }
        }
        Ok(())
    }
}

/// Monitor review state; the only part of an audit row that may change after append.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMonitorState {
    pub reviewed: bool,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<UserId>,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub schema_version: SchemaVersion,
    pub event_id: AuditEventId,
    pub event_at: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub actor: UserId,
    pub target_a: AuditTarget,
    pub target_b: Option<AuditTarget>,
    pub details_text: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub payload_hash: Option<String>,
    pub monitor: AuditMonitorState,
}

impl AuditEvent {
    pub fn from_input_v1(
        event_id: AuditEventId,
        input: AuditEventInput,
    ) -> Result<Self, ContractViolation> {
        input.validate()?;
        let payload_hash = input.payload.as_ref().map(payload_hash_hex);
        let row = Self {
            schema_version: AUDIT_CONTRACT_VERSION,
            event_id,
            event_at: input.event_at,
            event_type: input.event_type,
            actor: input.actor,
            target_a: input.target_a,
            target_b: input.target_b,
            details_text: input.details_text,
            payload: input.payload,
            payload_hash,
            monitor: AuditMonitorState::default(),
        };
        row.validate()?;
        Ok(row)
    }

    /// True when the stored payload still matches the digest taken at append time.
    pub fn payload_intact(&self) -> bool {
        match (&self.payload, &self.payload_hash) {
            (None, None) => true,
            (Some(p), Some(h)) => payload_hash_hex(p) == *h,
            _ => false,
        }
    }

    fn payload_str(&self, key: &str) -> &str {
        self.payload
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or("?")
    }

    /// Human readable description of the action, without the actor.
    pub fn describe(&self) -> String {
        match self.event_type {
            AuditEventType::ProvPassRequest => "Provisional pass requested".to_string(),
            AuditEventType::ProvPassApprove => "Provisional pass approved".to_string(),
            AuditEventType::ProvPassDeny => "Provisional pass denied".to_string(),
            AuditEventType::ProvPassReqCancel => {
                "Provisional pass request cancelled".to_string()
            }
            AuditEventType::AdminOverridePrivateRecord => {
                "Private record view restrictions overridden".to_string()
            }
            AuditEventType::RecordCreate => "Record created".to_string(),
            AuditEventType::RecordRename => format!(
                "Record renamed {} to {}",
                self.payload_str("from_name"),
                self.payload_str("to_name")
            ),
            AuditEventType::RecordMadePrivate => "Record marked private".to_string(),
            AuditEventType::RecordMadeNotPrivate => "Record marked not private".to_string(),
            AuditEventType::RecordMadeGlobal => "Record marked global".to_string(),
            AuditEventType::RecordMadeNotGlobal => "Record marked not global".to_string(),
            AuditEventType::RecordDelete => "Record deleted".to_string(),
            AuditEventType::RecordOwnerAssign => {
                format!("Record owner set to {}", self.payload_str("user_name"))
            }
            AuditEventType::RecordAllowListChange => format!(
                "Record allow-list updated (added: {}; removed: {})",
                self.payload_str("added"),
                self.payload_str("removed")
            ),
            AuditEventType::ReviewCreate => "Review created".to_string(),
            AuditEventType::ReviewReviewerUnassigned => {
                format!("Reviewer ({}) unassigned", self.payload_str("user_name"))
            }
            AuditEventType::ReviewReviewerAssigned => {
                format!("Reviewer ({}) assigned", self.payload_str("user_name"))
            }
            AuditEventType::ReviewInProgress => "Review in progress".to_string(),
            AuditEventType::ReviewPassReqApproval => "Review passed pending approval".to_string(),
            AuditEventType::ReviewPass => "Review passed and closed".to_string(),
            AuditEventType::ReviewFailReqApproval => "Review failed pending approval".to_string(),
            AuditEventType::ReviewFail => "Review failed and closed".to_string(),
            AuditEventType::ReviewDelete => "Review deleted".to_string(),
        }
    }
}

impl Validate for AuditEvent {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != AUDIT_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "audit_event.schema_version",
                reason: "must match AUDIT_CONTRACT_VERSION",
            });
        }
        self.event_id.validate()?;
        self.actor.validate()?;
        self.target_a.validate()?;
        if let Some(b) = &self.target_b {
            b.validate()?;
        }
        if self.payload.is_some() != self.payload_hash.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "audit_event.payload_hash",
                reason: "must be present exactly when payload is present",
            });
        }
        Ok(())
    }
}

fn canonical_payload(payload: &serde_json::Value) -> String {
    // serde_json object maps are ordered (BTreeMap) without `preserve_order`.
    payload.to_string()
}

fn payload_hash_hex(payload: &serde_json::Value) -> String {
    let digest = Sha256::digest(canonical_payload(payload).as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
