#![forbid(unsafe_code)]

use tracing::{error, warn};

use secreview_kernel_contracts::audit::{AuditEventId, AuditEventInput};
use secreview_kernel_contracts::linked::{
    LinkedLifecyclePoint, LinkedSystemAlert, LinkedSystemOutcome,
};
use secreview_kernel_contracts::notification::NotificationInput;
use secreview_storage::audit::AuditRuntime;
use secreview_storage::repo::{AuditRepo, NotificationRepo};
use secreview_storage::store::NotificationUpsert;

use crate::linked_system::LinkedSystemError;

/// Non-fatal problem raised after the primary write committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffectWarning {
    ExternalAdapterFailure {
        adapter_key: String,
        point: LinkedLifecyclePoint,
        errstr: String,
    },
    PersistenceFailure {
        what: &'static str,
        detail: String,
    },
}

/// Collects the secondary effects of one committed operation.
///
/// Nothing recorded here can undo the primary write; failures become warnings.
#[derive(Debug, Default)]
pub struct SideEffects {
    pub audit_event_id: Option<AuditEventId>,
    pub notifications: Vec<NotificationUpsert>,
    pub linked_alerts: Vec<LinkedSystemAlert>,
    pub warnings: Vec<SideEffectWarning>,
}

impl SideEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit<R: AuditRepo + ?Sized>(&mut self, repo: &mut R, input: AuditEventInput) {
        let event_type = input.event_type;
        match AuditRuntime::emit(repo, input) {
            Ok(id) => self.audit_event_id = Some(id),
            Err(e) => {
                error!(
                    event_type = ?event_type,
                    error = %e,
                    "audit append failed after commit"
                );
                self.warnings.push(SideEffectWarning::PersistenceFailure {
                    what: "audit_event",
                    detail: e.to_string(),
                });
            }
        }
    }

    pub fn notify<R: NotificationRepo + ?Sized>(&mut self, repo: &mut R, input: NotificationInput) {
        let recipient = input.recipient;
        match repo.upsert_notification_row(input) {
            Ok(upsert) => self.notifications.push(upsert),
            Err(e) => {
                error!(
                    recipient = recipient.0,
                    error = %e,
                    "notification write failed after commit"
                );
                self.warnings.push(SideEffectWarning::PersistenceFailure {
                    what: "notification",
                    detail: e.to_string(),
                });
            }
        }
    }

    /// Records a linked-system call result. Alerts are kept even when the call failed.
    pub fn linked(
        &mut self,
        adapter_key: &str,
        point: LinkedLifecyclePoint,
        result: Result<LinkedSystemOutcome, LinkedSystemError>,
    ) {
        let errstr = match result {
            Ok(outcome) => {
                self.linked_alerts.extend(outcome.alerts);
                if outcome.success {
                    return;
                }
                outcome
                    .errstr
                    .unwrap_or_else(|| "linked system reported failure".to_string())
            }
            Err(e) => e.to_string(),
        };
        warn!(
            adapter_key,
            point = point.as_str(),
            errstr = %errstr,
            "linked system action failed"
        );
        self.warnings.push(SideEffectWarning::ExternalAdapterFailure {
            adapter_key: adapter_key.to_string(),
            point,
            errstr,
        });
    }
}
