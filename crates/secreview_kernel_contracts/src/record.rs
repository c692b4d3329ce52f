#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{numeric_id, validate_opt_text, validate_text};
use crate::directory::{OrgId, RecordTypeId, UserId};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const RECORD_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Hard bound on the explicit allow-list; runtime policy may be tighter.
pub const RECORD_ALLOW_LIST_MAX: usize = 1024;

numeric_id!(ReviewRecordId, "review_record_id");

/// One subject under (repeated) security review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub schema_version: SchemaVersion,
    pub record_id: ReviewRecordId,
    pub record_type_id: RecordTypeId,
    pub name: String,
    pub owner: Option<UserId>,
    pub org_created: Option<OrgId>,
    pub global: bool,
    pub private: bool,
    pub allow_list: BTreeSet<UserId>,
    /// External id of the object this record is mirrored into, if linked.
    pub linked_eid: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReviewRecord {
    pub fn v1(
        record_id: ReviewRecordId,
        record_type_id: RecordTypeId,
        name: impl Into<String>,
        org_created: Option<OrgId>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            schema_version: RECORD_CONTRACT_VERSION,
            record_id,
            record_type_id,
            name: name.into(),
            owner: None,
            org_created,
            global: false,
            private: false,
            allow_list: BTreeSet::new(),
            linked_eid: None,
            created_at,
        };
        row.validate()?;
        Ok(row)
    }

    pub fn allow_listed(&self, user_id: UserId) -> bool {
        self.allow_list.contains(&user_id)
    }

    pub fn is_linked(&self) -> bool {
        self.linked_eid.is_some()
    }
}

impl Validate for ReviewRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != RECORD_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "review_record.schema_version",
                reason: "must match RECORD_CONTRACT_VERSION",
            });
        }
        self.record_id.validate()?;
        self.record_type_id.validate()?;
        validate_text("review_record.name", &self.name, 100)?;
        if let Some(owner) = self.owner {
            owner.validate()?;
        }
        if let Some(org) = self.org_created {
            org.validate()?;
        }
        if self.allow_list.len() > RECORD_ALLOW_LIST_MAX {
            return Err(ContractViolation::InvalidValue {
                field: "review_record.allow_list",
                reason: "exceeds RECORD_ALLOW_LIST_MAX",
            });
        }
        for uid in &self.allow_list {
            uid.validate()?;
        }
        validate_opt_text("review_record.linked_eid", &self.linked_eid, 128)?;
        Ok(())
    }
}
