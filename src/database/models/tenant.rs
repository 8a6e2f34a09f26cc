use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row of the tenant registry (trellis_main.tenants).
///
/// The registry is the platform's system-of-record for tenants. This
/// subsystem reads rows and updates the storage bookkeeping fields
/// (storage_status, last_error, checked_at); it never creates or deletes
/// registry rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub owner_user_id: Uuid,
    /// Storage namespace (Postgres schema) holding this tenant's tables.
    pub namespace: String,
    pub storage_status: StorageStatus,
    pub last_error: Option<String>,
    /// Last time the reconciliation worker looked at this tenant.
    pub checked_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Provisioning state of a tenant's storage namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StorageStatus {
    NotCreated,
    Minimal,
    Complete,
    Error,
}

impl StorageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageStatus::NotCreated => "not_created",
            StorageStatus::Minimal => "minimal",
            StorageStatus::Complete => "complete",
            StorageStatus::Error => "error",
        }
    }

    /// Legal moves: not_created -> minimal -> complete, any -> error,
    /// and error back to minimal/complete on successful re-provisioning.
    pub fn can_transition_to(&self, next: StorageStatus) -> bool {
        use StorageStatus::*;
        match (self, next) {
            (_, Error) => true,
            (NotCreated, Minimal) => true,
            (Minimal, Complete) => true,
            (Error, Minimal) | (Error, Complete) => true,
            // Re-provisioning an already provisioned tenant is a no-op move
            (Minimal, Minimal) | (Complete, Complete) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for StorageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_created" => Ok(StorageStatus::NotCreated),
            "minimal" => Ok(StorageStatus::Minimal),
            "complete" => Ok(StorageStatus::Complete),
            "error" => Ok(StorageStatus::Error),
            other => Err(format!("unknown storage status: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StorageStatus::*;

    #[test]
    fn status_roundtrips_through_strings() {
        for status in [NotCreated, Minimal, Complete, Error] {
            assert_eq!(status.as_str().parse::<StorageStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<StorageStatus>().is_err());
    }

    #[test]
    fn forward_transitions_are_legal() {
        assert!(NotCreated.can_transition_to(Minimal));
        assert!(Minimal.can_transition_to(Complete));
    }

    #[test]
    fn any_state_may_fail() {
        for status in [NotCreated, Minimal, Complete, Error] {
            assert!(status.can_transition_to(Error));
        }
    }

    #[test]
    fn error_is_recoverable() {
        assert!(Error.can_transition_to(Minimal));
        assert!(Error.can_transition_to(Complete));
    }

    #[test]
    fn backward_moves_are_rejected() {
        assert!(!Complete.can_transition_to(Minimal));
        assert!(!Minimal.can_transition_to(NotCreated));
        assert!(!NotCreated.can_transition_to(Complete));
    }
}
