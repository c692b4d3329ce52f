#![forbid(unsafe_code)]

use secreview_kernel_contracts::audit::{AuditEventId, AuditEventInput};

use crate::repo::AuditRepo;
use crate::store::StorageError;

/// Audit writer.
///
/// A disciplined append-only writer into the store's `audit_events` ledger; it never reads
/// back or rewrites rows.
#[derive(Debug, Default)]
pub struct AuditRuntime;

impl AuditRuntime {
    pub fn emit<R: AuditRepo + ?Sized>(
        repo: &mut R,
        input: AuditEventInput,
    ) -> Result<AuditEventId, StorageError> {
        repo.append_audit_row(input)
    }
}
