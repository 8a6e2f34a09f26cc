use sqlx::PgConnection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use super::TenancyError;

/// Per-tenant mutual exclusion for provisioning.
///
/// Process-local: provisioning operations for the same tenant are totally
/// ordered within this process; different tenants never contend. Multi-process
/// deployments additionally take the advisory lock below on the dedicated
/// connection, so the map only needs to serialize local callers.
#[derive(Default)]
pub struct TenantLocks {
    inner: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for one tenant. Handles for the same tenant share the
    /// underlying mutex; the map entry lives for the process lifetime.
    pub fn for_tenant(&self, tenant_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(tenant_id).or_default().clone()
    }
}

/// Advisory lock key for a tenant: the first 8 bytes of the UUID.
/// Stable across processes, collision-free for UUIDs sharing no prefix.
pub fn advisory_key(tenant_id: &Uuid) -> i64 {
    let b = tenant_id.as_bytes();
    i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Take the session-scoped advisory lock for a tenant on a dedicated
/// connection. The wait is bounded by the session's statement_timeout, so a
/// stuck holder surfaces as [`TenancyError::ProvisioningTimeout`] instead of
/// blocking forever. Closing the connection releases the lock.
pub async fn acquire_advisory(
    conn: &mut PgConnection,
    tenant_id: &Uuid,
) -> Result<(), TenancyError> {
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(advisory_key(tenant_id))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn release_advisory(
    conn: &mut PgConnection,
    tenant_id: &Uuid,
) -> Result<(), TenancyError> {
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(advisory_key(tenant_id))
        .execute(conn)
        .await?;
    Ok(())
}
