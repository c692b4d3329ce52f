#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::common::{numeric_id, validate_opt_text, validate_text};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const DIRECTORY_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

numeric_id!(UserId, "user_id");
numeric_id!(OrgId, "org_id");
numeric_id!(RecordTypeId, "record_type_id");

/// Identities and organizations allowed to ratify a pending decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverSet {
    pub identities: BTreeSet<UserId>,
    pub organizations: BTreeSet<OrgId>,
}

impl ApproverSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty() && self.organizations.is_empty()
    }

    pub fn admits(&self, user_id: UserId, org_id: Option<OrgId>) -> bool {
        if self.identities.contains(&user_id) {
            return true;
        }
        org_id.is_some_and(|o| self.organizations.contains(&o))
    }
}

impl Validate for ApproverSet {
    fn validate(&self) -> Result<(), ContractViolation> {
        for id in &self.identities {
            id.validate()?;
        }
        for id in &self.organizations {
            id.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub schema_version: SchemaVersion,
    pub user_id: UserId,
    pub display_name: String,
    pub active: bool,
    /// `None` means the identity has not been verified into an organization yet.
    pub org_id: Option<OrgId>,
    pub manager_id: Option<UserId>,
    pub admin: bool,
    pub reports_only: bool,
    pub requires_approval: bool,
    pub approvers: ApproverSet,
    pub prov_pass_approver: bool,
    pub can_pass_to_contractor: bool,
    pub can_audit_monitors: bool,
}

impl IdentityRecord {
    /// Active, unprivileged identity. Permission bits are set by the caller.
    pub fn v1(
        user_id: UserId,
        display_name: impl Into<String>,
        org_id: Option<OrgId>,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            schema_version: DIRECTORY_CONTRACT_VERSION,
            user_id,
            display_name: display_name.into(),
            active: true,
            org_id,
            manager_id: None,
            admin: false,
            reports_only: false,
            requires_approval: false,
            approvers: ApproverSet::empty(),
            prov_pass_approver: false,
            can_pass_to_contractor: false,
            can_audit_monitors: false,
        };
        row.validate()?;
        Ok(row)
    }

    pub fn verified(&self) -> bool {
        self.org_id.is_some()
    }
}

impl Validate for IdentityRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != DIRECTORY_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "identity_record.schema_version",
                reason: "must match DIRECTORY_CONTRACT_VERSION",
            });
        }
        self.user_id.validate()?;
        validate_text("identity_record.display_name", &self.display_name, 100)?;
        if let Some(org_id) = self.org_id {
            org_id.validate()?;
        }
        if let Some(manager_id) = self.manager_id {
            manager_id.validate()?;
            if manager_id == self.user_id {
                return Err(ContractViolation::InvalidValue {
                    field: "identity_record.manager_id",
                    reason: "identity cannot manage itself",
                });
            }
        }
        self.approvers.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    pub schema_version: SchemaVersion,
    pub org_id: OrgId,
    pub name: String,
    pub super_org: bool,
    pub contractor: bool,
    pub can_report: bool,
    pub requires_approval: bool,
    pub approvers: ApproverSet,
}

impl OrganizationRecord {
    pub fn v1(org_id: OrgId, name: impl Into<String>) -> Result<Self, ContractViolation> {
        let row = Self {
            schema_version: DIRECTORY_CONTRACT_VERSION,
            org_id,
            name: name.into(),
            super_org: false,
            contractor: false,
            can_report: true,
            requires_approval: false,
            approvers: ApproverSet::empty(),
        };
        row.validate()?;
        Ok(row)
    }
}

impl Validate for OrganizationRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != DIRECTORY_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "organization_record.schema_version",
                reason: "must match DIRECTORY_CONTRACT_VERSION",
            });
        }
        self.org_id.validate()?;
        validate_text("organization_record.name", &self.name, 100)?;
        self.approvers.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTypeRecord {
    pub schema_version: SchemaVersion,
    pub record_type_id: RecordTypeId,
    pub name: String,
    pub active: bool,
    pub contractor_passable: bool,
    pub provisional_passable: bool,
    pub default_private: bool,
    /// Registry key of the linked-system adapter mirroring records of this type.
    pub linked_system_key: Option<String>,
}

impl RecordTypeRecord {
    pub fn v1(
        record_type_id: RecordTypeId,
        name: impl Into<String>,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            schema_version: DIRECTORY_CONTRACT_VERSION,
            record_type_id,
            name: name.into(),
            active: true,
            contractor_passable: false,
            provisional_passable: false,
            default_private: false,
            linked_system_key: None,
        };
        row.validate()?;
        Ok(row)
    }
}

impl Validate for RecordTypeRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != DIRECTORY_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "record_type_record.schema_version",
                reason: "must match DIRECTORY_CONTRACT_VERSION",
            });
        }
        self.record_type_id.validate()?;
        validate_text("record_type_record.name", &self.name, 100)?;
        validate_opt_text(
            "record_type_record.linked_system_key",
            &self.linked_system_key,
            64,
        )?;
        Ok(())
    }
}
