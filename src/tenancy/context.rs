use futures::future::BoxFuture;
use sqlx::{Connection, PgConnection, Row};
use std::cell::RefCell;
use std::future::Future;
use uuid::Uuid;

use super::resolver;
use super::TenancyError;
use crate::database::DatabaseManager;

/// Session variable carrying the tenant binding on a bound connection.
const TENANT_GUC: &str = "app.tenant_id";

tokio::task_local! {
    static ACTIVE_TENANT: RefCell<Option<TenantBinding>>;
}

/// The tenant a connection (and the surrounding task) is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantBinding {
    pub tenant_id: Uuid,
    pub namespace: String,
}

impl TenantBinding {
    /// Build a binding from a raw tenant identifier. Fails fast on a
    /// malformed id; the namespace is the pure derivation.
    pub fn parse(tenant_id: &str) -> Result<Self, TenancyError> {
        let tenant_id = resolver::parse_tenant_id(tenant_id)?;
        Ok(Self {
            namespace: resolver::namespace_for(&tenant_id),
            tenant_id,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WithTenantOptions {
    /// Leave the task-local binding set after the call returns, for callers
    /// chaining several operations under one tenant. The dedicated
    /// connection is closed regardless.
    pub preserve_context: bool,
}

/// Run a future with a fresh tenant-binding slot.
///
/// The request interceptor wraps each request in this scope, so bindings are
/// task-scoped and a reused worker can never observe a previous request's
/// tenant. There is deliberately no process-wide fallback slot.
pub async fn scope<F: Future>(fut: F) -> F::Output {
    ACTIVE_TENANT.scope(RefCell::new(None), fut).await
}

/// The tenant the current task is bound to, if any, without re-querying.
pub fn current_tenant() -> Option<TenantBinding> {
    ACTIVE_TENANT.try_with(|slot| slot.borrow().clone()).ok().flatten()
}

/// Returns true when a binding slot exists on this task.
fn record_binding(binding: Option<TenantBinding>) -> bool {
    ACTIVE_TENANT
        .try_with(|slot| {
            *slot.borrow_mut() = binding.clone();
        })
        .is_ok()
}

pub(crate) fn bind_task(binding: &TenantBinding) -> bool {
    record_binding(Some(binding.clone()))
}

pub(crate) fn clear_task_binding() {
    record_binding(None);
}

/// Scoped tenant acquisition with guaranteed release.
///
/// Acquires a dedicated (never pooled) connection in autocommit mode, sets
/// and verifies the session tenant binding, runs `f`, then closes the
/// connection on every exit path. The binding value is read back before `f`
/// runs; a mismatch is fatal (`TenantContextFailure`), never silent.
pub async fn with_tenant<T, F>(
    tenant_id: &str,
    options: WithTenantOptions,
    f: F,
) -> Result<T, TenancyError>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, TenancyError>> + Send,
{
    let binding = TenantBinding::parse(tenant_id)?;
    with_binding(&binding, options, f).await
}

/// Same as [`with_tenant`], for callers that already resolved a binding.
pub async fn with_binding<T, F>(
    binding: &TenantBinding,
    options: WithTenantOptions,
    f: F,
) -> Result<T, TenancyError>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, TenancyError>> + Send,
{
    if !DatabaseManager::is_valid_namespace(&binding.namespace) {
        return Err(TenancyError::TenantContextFailure(format!(
            "invalid namespace '{}'",
            binding.namespace
        )));
    }

    // Dedicated connection, autocommit from the start: no transaction is ever
    // begun here, so unrelated aborted work cannot poison the binding.
    let mut conn = DatabaseManager::dedicated_connection().await?;

    if let Err(err) = bind_session(&mut conn, binding).await {
        let _ = conn.close().await;
        return Err(err);
    }

    bind_task(binding);

    let result = f(&mut conn).await;

    // Never return a tenant-bound connection to any pool: close it.
    let _ = conn.close().await;

    if !options.preserve_context {
        clear_task_binding();
    }

    result
}

/// Set the session tenant binding and the schema search path, then verify
/// the binding by reading it back.
async fn bind_session(
    conn: &mut PgConnection,
    binding: &TenantBinding,
) -> Result<(), TenancyError> {
    let tenant_value = binding.tenant_id.to_string();

    sqlx::query("SELECT set_config($1, $2, false)")
        .bind(TENANT_GUC)
        .bind(&tenant_value)
        .execute(&mut *conn)
        .await?;

    // Namespace-qualified access keeps working for shared objects in public.
    sqlx::query("SELECT set_config('search_path', $1, false)")
        .bind(format!("{}, public", binding.namespace))
        .execute(&mut *conn)
        .await?;

    let row = sqlx::query("SELECT current_setting($1) AS bound")
        .bind(TENANT_GUC)
        .fetch_one(&mut *conn)
        .await?;
    let bound: String = row.get("bound");

    if bound != tenant_value {
        return Err(TenancyError::TenantContextFailure(format!(
            "session binding readback returned '{}', expected '{}'",
            bound, tenant_value
        )));
    }

    Ok(())
}
