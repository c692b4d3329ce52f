#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use secreview_kernel_contracts::directory::{ApproverSet, IdentityRecord, OrganizationRecord};

/// An identity's own flag wins; otherwise its organization's flag applies.
pub fn requires_approval(identity: &IdentityRecord, org: Option<&OrganizationRecord>) -> bool {
    if identity.requires_approval {
        return true;
    }
    member_org(identity, org).is_some_and(|o| o.requires_approval)
}

/// Approver lists follow the same precedence as [`requires_approval`]. May be empty.
pub fn approvers_for(identity: &IdentityRecord, org: Option<&OrganizationRecord>) -> ApproverSet {
    if identity.requires_approval {
        return identity.approvers.clone();
    }
    match member_org(identity, org) {
        Some(o) => o.approvers.clone(),
        None => ApproverSet::empty(),
    }
}

/// Admin edit of an identity's requires-approval flag.
///
/// Turning the flag on with no approvers configured seeds the manager as the sole approver.
/// Returns true when the manager fallback was applied.
pub fn configure_requires_approval(identity: &mut IdentityRecord, enabled: bool) -> bool {
    identity.requires_approval = enabled;
    if !enabled || !identity.approvers.is_empty() {
        return false;
    }
    match identity.manager_id {
        Some(manager) => {
            identity.approvers = ApproverSet {
                identities: BTreeSet::from([manager]),
                organizations: BTreeSet::new(),
            };
            true
        }
        None => false,
    }
}

fn member_org<'a>(
    identity: &IdentityRecord,
    org: Option<&'a OrganizationRecord>,
) -> Option<&'a OrganizationRecord> {
    org.filter(|o| identity.org_id == Some(o.org_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secreview_kernel_contracts::directory::{OrgId, UserId};

    fn identity(org: Option<u64>) -> IdentityRecord {
        IdentityRecord::v1(UserId(5), "Sam Reviewer", org.map(OrgId)).unwrap()
    }

    fn org_with_approver() -> OrganizationRecord {
        let mut o = OrganizationRecord::v1(OrgId(1), "AppSec").unwrap();
        o.requires_approval = true;
        o.approvers.identities.insert(UserId(9));
        o
    }

    #[test]
    fn at_approval_01_org_flag_applies_when_identity_flag_unset() {
        let org = org_with_approver();
        let i = identity(Some(1));
        assert!(requires_approval(&i, Some(&org)));
        assert_eq!(
            approvers_for(&i, Some(&org)).identities,
            BTreeSet::from([UserId(9)])
        );
    }

    #[test]
    fn at_approval_02_identity_flag_overrides_org_lists() {
        let org = org_with_approver();
        let mut i = identity(Some(1));
        i.requires_approval = true;
        i.approvers.organizations.insert(OrgId(4));
        let set = approvers_for(&i, Some(&org));
        assert!(set.identities.is_empty());
        assert_eq!(set.organizations, BTreeSet::from([OrgId(4)]));
    }

    #[test]
    fn at_approval_03_unverified_identity_has_no_org_policy() {
        let org = org_with_approver();
        let i = identity(None);
        assert!(!requires_approval(&i, Some(&org)));
        assert!(approvers_for(&i, Some(&org)).is_empty());
    }

    #[test]
    fn at_approval_04_manager_fallback_only_when_lists_empty() {
        let mut i = identity(Some(1));
        i.manager_id = Some(UserId(7));
        assert!(configure_requires_approval(&mut i, true));
        assert_eq!(i.approvers.identities, BTreeSet::from([UserId(7)]));

        let mut j = identity(Some(1));
        j.manager_id = Some(UserId(7));
        j.approvers.organizations.insert(OrgId(3));
        assert!(!configure_requires_approval(&mut j, true));
        assert!(j.approvers.identities.is_empty());

        let mut k = identity(Some(1));
        assert!(!configure_requires_approval(&mut k, true));
        assert!(k.requires_approval);
        assert!(k.approvers.is_empty());
    }
}
