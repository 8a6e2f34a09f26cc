use serde::Serialize;
use sqlx::{Connection, PgConnection, PgPool, Row};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::ledger::{self, ChangeUnit, BOOKKEEPING_TABLE, DEFERRED_SENTINEL};
use super::locks::{self, TenantLocks};
use super::registry::TenantDirectory;
use super::TenancyError;
use crate::config;
use crate::database::models::{StorageStatus, Tenant};
use crate::database::DatabaseManager;

/// Result of a read-only completeness check against the expected table set.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub complete: bool,
    pub missing: Vec<String>,
}

/// Existence and provisioning state of a namespace, as visible from catalog
/// queries alone. Used by the request interceptor, which must stay cheap.
#[derive(Debug, Clone, Copy)]
pub struct NamespaceProbe {
    pub exists: bool,
    pub bookkeeping: bool,
    pub deferred: bool,
}

/// Idempotent creator of tenant namespaces and their tables.
///
/// Operations for the same tenant are serialized by a process-local lock plus
/// a Postgres advisory lock taken on the dedicated connection, so concurrent
/// callers (requests, reconciliation jobs, other instances) cannot interleave
/// structural changes. Different tenants provision fully in parallel.
pub struct SchemaProvisioner {
    directory: Arc<dyn TenantDirectory>,
    locks: Arc<TenantLocks>,
}

impl SchemaProvisioner {
    pub fn new(directory: Arc<dyn TenantDirectory>, locks: Arc<TenantLocks>) -> Self {
        Self { directory, locks }
    }

    /// Create the namespace and the minimal onboarding table set.
    ///
    /// Idempotent; safe under concurrent invocation for the same tenant.
    /// A failure on a tenant whose storage did not exist yet triggers
    /// compensating cleanup (the half-created namespace is dropped) before
    /// the error surfaces.
    pub async fn ensure_minimal(&self, tenant_id: Uuid) -> Result<StorageStatus, TenancyError> {
        self.provision(tenant_id, ProvisionScope::Minimal).await
    }

    /// Apply the full structural change set on top of whatever exists,
    /// skipping units already recorded. Removes the deferred sentinel and
    /// marks the tenant complete. Never drops existing data; a failure leaves
    /// applied units in place so the next call can resume.
    pub async fn ensure_complete(&self, tenant_id: Uuid) -> Result<StorageStatus, TenancyError> {
        self.provision(tenant_id, ProvisionScope::Full).await
    }

    async fn provision(
        &self,
        tenant_id: Uuid,
        scope: ProvisionScope,
    ) -> Result<StorageStatus, TenancyError> {
        let tenant = self
            .directory
            .get(tenant_id)
            .await?
            .ok_or(TenancyError::TenantNotFound(tenant_id))?;

        if !DatabaseManager::is_valid_namespace(&tenant.namespace) {
            return Err(TenancyError::NamespaceCreationFailed(format!(
                "refusing to provision invalid namespace '{}'",
                tenant.namespace
            )));
        }

        // Total order per tenant: local lock first, advisory lock on the
        // connection second. Other tenants never touch either.
        let _guard = self.locks.for_tenant(tenant_id).lock_owned().await;

        let mut conn = DatabaseManager::dedicated_connection().await?;
        let outcome = self.provision_on_conn(&mut conn, &tenant, scope).await;
        // Dedicated connection: closing it also releases the advisory lock
        // even when the work above bailed early.
        let _ = conn.close().await;

        match outcome {
            Ok(status) => {
                if tenant.storage_status != status {
                    self.record_status_steps(&tenant, status).await?;
                }
                info!(%tenant_id, namespace = %tenant.namespace, status = %status, "provisioning finished");
                Ok(status)
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(update_err) = self
                    .directory
                    .set_storage_status(tenant_id, StorageStatus::Error, Some(&message))
                    .await
                {
                    warn!(%tenant_id, error = %update_err, "failed to record provisioning error");
                }
                Err(err)
            }
        }
    }

    /// Registry updates honoring the status invariant: a tenant that starts
    /// at not_created passes through minimal on its way to complete.
    async fn record_status_steps(
        &self,
        tenant: &Tenant,
        target: StorageStatus,
    ) -> Result<(), TenancyError> {
        if target == StorageStatus::Complete && tenant.storage_status == StorageStatus::NotCreated {
            self.directory
                .set_storage_status(tenant.id, StorageStatus::Minimal, None)
                .await?;
        }
        self.directory
            .set_storage_status(tenant.id, target, None)
            .await
    }

    async fn provision_on_conn(
        &self,
        conn: &mut PgConnection,
        tenant: &Tenant,
        scope: ProvisionScope,
    ) -> Result<StorageStatus, TenancyError> {
        locks::acquire_advisory(conn, &tenant.id).await?;

        let existed = schema_exists_on(conn, &tenant.namespace).await?;
        let result = self.apply(conn, &tenant.namespace, scope).await;

        match result {
            Ok(status) => {
                locks::release_advisory(conn, &tenant.id).await?;
                Ok(status)
            }
            Err(err) => {
                // Compensating cleanup: never leave a half-created namespace
                // behind for a tenant that had none before this attempt.
                if !existed && tenant.storage_status == StorageStatus::NotCreated {
                    let drop_sql = format!(
                        "DROP SCHEMA IF EXISTS {} CASCADE",
                        DatabaseManager::quote_identifier(&tenant.namespace)
                    );
                    if let Err(drop_err) = sqlx::query(&drop_sql).execute(&mut *conn).await {
                        warn!(
                            tenant_id = %tenant.id,
                            namespace = %tenant.namespace,
                            error = %drop_err,
                            "compensating cleanup failed; namespace may be half-created"
                        );
                    }
                }
                let _ = locks::release_advisory(conn, &tenant.id).await;
                Err(classify_creation_error(err, scope))
            }
        }
    }

    /// The actual structural work: schema, grants, bookkeeping table, change
    /// units, sentinel maintenance. Everything here is idempotent.
    async fn apply(
        &self,
        conn: &mut PgConnection,
        namespace: &str,
        scope: ProvisionScope,
    ) -> Result<StorageStatus, TenancyError> {
        let quoted = DatabaseManager::quote_identifier(namespace);
        let role = DatabaseManager::quote_identifier(&config::config().database.app_role);

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted))
            .execute(&mut *conn)
            .await?;
        sqlx::query(&format!("GRANT USAGE ON SCHEMA {} TO {}", quoted, role))
            .execute(&mut *conn)
            .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (\
                unit TEXT PRIMARY KEY, \
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()\
            )",
            quoted, BOOKKEEPING_TABLE
        ))
        .execute(&mut *conn)
        .await?;

        let applied = applied_units_on(conn, namespace).await?;

        let units: Vec<&ChangeUnit> = match scope {
            ProvisionScope::Minimal => ledger::minimal_units().collect(),
            ProvisionScope::Full => ledger::CHANGE_UNITS.iter().collect(),
        };

        for unit in units {
            if applied.contains(unit.id) {
                continue;
            }
            let ddl = unit.ddl.replace("{schema}", &quoted);
            sqlx::query(&ddl).execute(&mut *conn).await?;
            sqlx::query(&format!(
                "INSERT INTO {}.{} (unit) VALUES ($1) ON CONFLICT (unit) DO NOTHING",
                quoted, BOOKKEEPING_TABLE
            ))
            .bind(unit.id)
            .execute(&mut *conn)
            .await?;
            tracing::debug!(namespace, unit = unit.id, "applied change unit");
        }

        // Table grants cover everything that exists now; default privileges
        // cover units applied by later passes.
        sqlx::query(&format!(
            "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA {} TO {}",
            quoted, role
        ))
        .execute(&mut *conn)
        .await?;

        match scope {
            ProvisionScope::Minimal => {
                let fully_applied = ledger::CHANGE_UNITS
                    .iter()
                    .all(|u| applied.contains(u.id) || u.onboarding);
                if fully_applied {
                    Ok(StorageStatus::Complete)
                } else {
                    sqlx::query(&format!(
                        "INSERT INTO {}.{} (unit) VALUES ($1) ON CONFLICT (unit) DO NOTHING",
                        quoted, BOOKKEEPING_TABLE
                    ))
                    .bind(DEFERRED_SENTINEL)
                    .execute(&mut *conn)
                    .await?;
                    Ok(StorageStatus::Minimal)
                }
            }
            ProvisionScope::Full => {
                sqlx::query(&format!(
                    "DELETE FROM {}.{} WHERE unit = $1",
                    quoted, BOOKKEEPING_TABLE
                ))
                .bind(DEFERRED_SENTINEL)
                .execute(&mut *conn)
                .await?;
                Ok(StorageStatus::Complete)
            }
        }
    }

    /// Read-only completeness check: the namespace's tables against the
    /// expected set for a fully provisioned tenant.
    pub async fn verify(&self, tenant_id: Uuid) -> Result<Verification, TenancyError> {
        let tenant = self
            .directory
            .get(tenant_id)
            .await?
            .ok_or(TenancyError::TenantNotFound(tenant_id))?;

        let pool = DatabaseManager::main_pool().await?;
        let present = tables_in_namespace(&pool, &tenant.namespace).await?;

        let missing: Vec<String> = ledger::expected_tables()
            .into_iter()
            .filter(|t| !present.contains(*t))
            .map(str::to_string)
            .collect();

        Ok(Verification {
            complete: missing.is_empty(),
            missing,
        })
    }

    /// Cheap catalog probe for the request interceptor.
    pub async fn probe(&self, namespace: &str) -> Result<NamespaceProbe, TenancyError> {
        if !DatabaseManager::is_valid_namespace(namespace) {
            return Err(TenancyError::NamespaceCreationFailed(format!(
                "refusing to probe invalid namespace '{}'",
                namespace
            )));
        }

        let pool = DatabaseManager::main_pool().await?;

        let exists = sqlx::query("SELECT 1 FROM pg_namespace WHERE nspname = $1")
            .bind(namespace)
            .fetch_optional(&pool)
            .await?
            .is_some();
        if !exists {
            return Ok(NamespaceProbe {
                exists: false,
                bookkeeping: false,
                deferred: false,
            });
        }

        let bookkeeping = tables_in_namespace(&pool, namespace)
            .await?
            .contains(BOOKKEEPING_TABLE);
        if !bookkeeping {
            return Ok(NamespaceProbe {
                exists: true,
                bookkeeping: false,
                deferred: false,
            });
        }

        let deferred = sqlx::query(&format!(
            "SELECT 1 FROM {}.{} WHERE unit = $1",
            DatabaseManager::quote_identifier(namespace),
            BOOKKEEPING_TABLE
        ))
        .bind(DEFERRED_SENTINEL)
        .fetch_optional(&pool)
        .await?
        .is_some();

        Ok(NamespaceProbe {
            exists: true,
            bookkeeping: true,
            deferred,
        })
    }

    /// Namespace existence check by registry id, for the reconciler.
    pub async fn namespace_exists(&self, tenant_id: Uuid) -> Result<bool, TenancyError> {
        let tenant = self
            .directory
            .get(tenant_id)
            .await?
            .ok_or(TenancyError::TenantNotFound(tenant_id))?;
        let pool = DatabaseManager::main_pool().await?;
        let exists = sqlx::query("SELECT 1 FROM pg_namespace WHERE nspname = $1")
            .bind(&tenant.namespace)
            .fetch_optional(&pool)
            .await?
            .is_some();
        Ok(exists)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProvisionScope {
    Minimal,
    Full,
}

async fn schema_exists_on(conn: &mut PgConnection, namespace: &str) -> Result<bool, TenancyError> {
    let row = sqlx::query("SELECT 1 FROM pg_namespace WHERE nspname = $1")
        .bind(namespace)
        .fetch_optional(conn)
        .await?;
    Ok(row.is_some())
}

async fn applied_units_on(
    conn: &mut PgConnection,
    namespace: &str,
) -> Result<HashSet<String>, TenancyError> {
    let rows = sqlx::query(&format!(
        "SELECT unit FROM {}.{}",
        DatabaseManager::quote_identifier(namespace),
        BOOKKEEPING_TABLE
    ))
    .fetch_all(conn)
    .await?;

    Ok(rows.into_iter().map(|r| r.get::<String, _>("unit")).collect())
}

async fn tables_in_namespace(
    pool: &PgPool,
    namespace: &str,
) -> Result<HashSet<String>, TenancyError> {
    let rows = sqlx::query(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = $1 AND table_type = 'BASE TABLE'",
    )
    .bind(namespace)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| r.get::<String, _>("table_name"))
        .collect())
}

/// Timeouts keep their identity; everything else that broke structural work
/// during first creation surfaces as NamespaceCreationFailed.
fn classify_creation_error(err: TenancyError, scope: ProvisionScope) -> TenancyError {
    match (&err, scope) {
        (TenancyError::ProvisioningTimeout(_), _) => err,
        (TenancyError::Query(_), ProvisionScope::Minimal) => {
            TenancyError::NamespaceCreationFailed(err.to_string())
        }
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_scope_covers_onboarding_units_only() {
        let minimal: Vec<&str> = ledger::minimal_units().map(|u| u.id).collect();
        assert!(!minimal.is_empty());
        assert!(minimal.len() < ledger::CHANGE_UNITS.len());
    }

    #[test]
    fn ddl_placeholder_renders_quoted_namespace() {
        let unit = &ledger::CHANGE_UNITS[0];
        let rendered = unit.ddl.replace("{schema}", &DatabaseManager::quote_identifier("tenant_abc"));
        assert!(rendered.contains("\"tenant_abc\".profiles"));
        assert!(!rendered.contains("{schema}"));
    }

    #[test]
    fn timeouts_keep_their_identity_through_classification() {
        let err = TenancyError::ProvisioningTimeout("canceling statement".into());
        assert!(classify_creation_error(err, ProvisionScope::Minimal).is_timeout());
    }

    #[test]
    fn creation_failures_are_reclassified_for_minimal_scope() {
        let err = TenancyError::Query(sqlx::Error::PoolClosed);
        let classified = classify_creation_error(err, ProvisionScope::Minimal);
        assert!(matches!(classified, TenancyError::NamespaceCreationFailed(_)));

        let err = TenancyError::Query(sqlx::Error::PoolClosed);
        let classified = classify_creation_error(err, ProvisionScope::Full);
        assert!(matches!(classified, TenancyError::Query(_)));
    }
}
