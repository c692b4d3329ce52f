#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use tracing::info;

use secreview_engines::access;
use secreview_engines::approval;
use secreview_kernel_contracts::audit::{AuditEvent, AuditEventId};
use secreview_kernel_contracts::directory::{IdentityRecord, OrgId, UserId};
use secreview_storage::store::ReviewStore;

use crate::runtime::{ActorRequest, LifecycleError, ReviewLifecycleRuntime};

impl ReviewLifecycleRuntime {
    /// Turns an identity's requires-approval flag on or off.
    ///
    /// Enabling it with no approvers configured makes the identity's manager the sole
    /// approver, if there is one.
    pub fn configure_requires_approval(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        user_id: UserId,
        enabled: bool,
    ) -> Result<IdentityRecord, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        self.gate(&actor, "configure_requires_approval", access::can_administer(&actor))?;
        let mut identity = self.identity(store, user_id)?.clone();
        let manager_fallback = approval::configure_requires_approval(&mut identity, enabled);
        store.update_identity(identity.clone())?;
        info!(
            user_id = user_id.0,
            actor = req.actor.0,
            enabled,
            manager_fallback,
            "requires-approval updated"
        );
        Ok(identity)
    }

    /// Moves members and owned records of `from` into `to`, then deletes `from`.
    pub fn migrate_and_delete_organization(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        from: OrgId,
        to: OrgId,
    ) -> Result<(), LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        self.gate(
            &actor,
            "migrate_and_delete_organization",
            access::can_administer(&actor),
        )?;
        store.migrate_and_delete_organization(from, to)?;
        info!(from = from.0, to = to.0, actor = req.actor.0, "organization migrated and deleted");
        Ok(())
    }

    /// Monitor sign-off on an audit row. Only the monitor fields change.
    pub fn review_audit_event(
        &self,
        store: &mut ReviewStore,
        req: &ActorRequest,
        event_id: AuditEventId,
        flagged: bool,
    ) -> Result<AuditEvent, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        self.gate(&actor, "review_audit_event", access::can_audit_monitors(&actor))?;
        let not_found = || LifecycleError::NotFound {
            entity: "audit_event",
            key: event_id.to_string(),
        };
        if store.audit_event(event_id).is_none() {
            return Err(not_found());
        }
        store.set_audit_monitor_state(event_id, req.actor, flagged, req.now)?;
        store.audit_event(event_id).cloned().ok_or_else(not_found)
    }

    /// Audit rows in `[from, to)`.
    pub fn audit_events_in_range(
        &self,
        store: &ReviewStore,
        req: &ActorRequest,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, LifecycleError> {
        let actor = self.actor_context(store, req.actor)?;
        self.gate(&actor, "audit_events_in_range", access::can_audit_monitors(&actor))?;
        Ok(store
            .audit_events_in_range(from, to)
            .into_iter()
            .cloned()
            .collect())
    }
}
