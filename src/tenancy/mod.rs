//! Tenant isolation and schema provisioning.
//!
//! Everything that decides *which* tenant a unit of work belongs to, *where*
//! that tenant's data lives, and *how* the storage namespace comes into
//! existence lives under this module:
//!
//! - [`resolver`] turns a request signal into a namespace identifier
//! - [`provisioner`] creates namespaces and applies the migration ledger
//! - [`context`] binds a dedicated connection to one tenant for a scope
//! - [`reconcile`] repairs tenants whose storage is missing or incomplete

pub mod context;
pub mod jobs;
pub mod ledger;
pub mod locks;
pub mod provisioner;
pub mod reconcile;
pub mod registry;
pub mod resolver;

use thiserror::Error;
use uuid::Uuid;

use crate::database::DatabaseError;

/// SQLSTATE raised when statement_timeout cancels a query.
const SQLSTATE_QUERY_CANCELED: &str = "57014";
/// SQLSTATE raised when lock_timeout expires while waiting.
const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";

#[derive(Debug, Error)]
pub enum TenancyError {
    /// Malformed tenant identifier. Fatal to the current operation, never retried.
    #[error("Invalid tenant id: {0}")]
    InvalidTenantId(String),

    #[error("Tenant not found: {0}")]
    TenantNotFound(Uuid),

    /// Namespace or table creation failed; compensating cleanup was attempted
    /// if this was the tenant's first provisioning.
    #[error("Namespace creation failed: {0}")]
    NamespaceCreationFailed(String),

    /// The session tenant binding could not be verified on the dedicated
    /// connection. Always fatal to the current call.
    #[error("Tenant context failure: {0}")]
    TenantContextFailure(String),

    /// Statement or lock-wait timeout exceeded. Transient; surfaced to the
    /// caller without local retry.
    #[error("Provisioning timed out: {0}")]
    ProvisioningTimeout(String),

    #[error("Illegal storage status transition for tenant {tenant_id}: {from} -> {to}")]
    IllegalStatusTransition {
        tenant_id: Uuid,
        from: crate::database::models::StorageStatus,
        to: crate::database::models::StorageStatus,
    },

    #[error("Job submission failed: {0}")]
    JobSubmission(String),

    #[error(transparent)]
    Database(DatabaseError),

    #[error("Query error: {0}")]
    Query(sqlx::Error),
}

impl TenancyError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TenancyError::ProvisioningTimeout(_))
    }
}

impl From<sqlx::Error> for TenancyError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                if code == SQLSTATE_QUERY_CANCELED || code == SQLSTATE_LOCK_NOT_AVAILABLE {
                    return TenancyError::ProvisioningTimeout(db_err.to_string());
                }
            }
        }
        TenancyError::Query(err)
    }
}

impl From<DatabaseError> for TenancyError {
    fn from(err: DatabaseError) -> Self {
        match err {
            // Re-classify wrapped driver errors so timeouts keep their meaning
            DatabaseError::Sqlx(e) => TenancyError::from(e),
            other => TenancyError::Database(other),
        }
    }
}

/// Cap stored error messages so a runaway driver error cannot bloat the
/// registry row. Truncation is char-boundary safe.
pub(crate) fn truncate_error(msg: &str) -> String {
    const MAX_STORED_ERROR: usize = 500;
    if msg.len() <= MAX_STORED_ERROR {
        return msg.to_string();
    }
    let mut end = MAX_STORED_ERROR;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &msg[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_errors_pass_through() {
        assert_eq!(truncate_error("boom"), "boom");
    }

    #[test]
    fn long_errors_are_capped() {
        let long = "x".repeat(2000);
        let stored = truncate_error(&long);
        assert!(stored.chars().count() <= 501);
        assert!(stored.ends_with('…'));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(1000);
        let stored = truncate_error(&long);
        assert!(stored.ends_with('…'));
    }
}
