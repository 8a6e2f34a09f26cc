use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{truncate_error, TenancyError};
use crate::database::models::{StorageStatus, Tenant};

const TENANT_COLUMNS: &str = "id, name, owner_user_id, namespace, storage_status, \
     last_error, checked_at, is_active, created_at, updated_at";

/// Tenant Registry contract.
///
/// The registry is an external system-of-record: this subsystem reads tenant
/// rows and updates the storage bookkeeping fields, nothing else. Creation
/// and deletion of tenants belong to the business layer.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<Tenant>, TenancyError>;

    async fn get_by_owner(&self, user_id: Uuid) -> Result<Option<Tenant>, TenancyError>;

    async fn list_active(&self) -> Result<Vec<Tenant>, TenancyError>;

    /// Update a tenant's storage status and last error. Rejects transitions
    /// the status invariant forbids (see [`StorageStatus::can_transition_to`]).
    async fn set_storage_status(
        &self,
        tenant_id: Uuid,
        status: StorageStatus,
        error: Option<&str>,
    ) -> Result<(), TenancyError>;

    /// Stamp the tenant's last health-check time.
    async fn touch_checked(&self, tenant_id: Uuid) -> Result<(), TenancyError>;
}

/// Registry implementation against trellis_main.tenants.
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<Tenant>, TenancyError> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE id = $1",
            TENANT_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    async fn get_by_owner(&self, user_id: Uuid) -> Result<Option<Tenant>, TenancyError> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE owner_user_id = $1 AND is_active",
            TENANT_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    async fn list_active(&self) -> Result<Vec<Tenant>, TenancyError> {
        let tenants = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE is_active ORDER BY created_at",
            TENANT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(tenants)
    }

    async fn set_storage_status(
        &self,
        tenant_id: Uuid,
        status: StorageStatus,
        error: Option<&str>,
    ) -> Result<(), TenancyError> {
        let current = self
            .get(tenant_id)
            .await?
            .ok_or(TenancyError::TenantNotFound(tenant_id))?;

        if !current.storage_status.can_transition_to(status) {
            return Err(TenancyError::IllegalStatusTransition {
                tenant_id,
                from: current.storage_status,
                to: status,
            });
        }

        let stored_error = error.map(truncate_error);
        sqlx::query(
            "UPDATE tenants SET storage_status = $2, last_error = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(tenant_id)
        .bind(status)
        .bind(stored_error)
        .execute(&self.pool)
        .await?;

        tracing::debug!(%tenant_id, status = %status, "updated tenant storage status");
        Ok(())
    }

    async fn touch_checked(&self, tenant_id: Uuid) -> Result<(), TenancyError> {
        sqlx::query("UPDATE tenants SET checked_at = now() WHERE id = $1")
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
