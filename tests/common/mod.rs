use sqlx::PgPool;
use uuid::Uuid;

use trellis_api_rust::database::models::StorageStatus;
use trellis_api_rust::database::DatabaseManager;
use trellis_api_rust::tenancy::resolver;

/// Connect to the test database, or return None to skip the test.
///
/// Set TRELLIS_TEST_DATABASE_URL to a Postgres URL whose role can create
/// schemas; the suite connects to the `trellis_main` database on that server
/// and bootstraps the registry table it needs. Without the variable the
/// DB-backed tests are skipped, so the rest of the suite runs anywhere.
pub async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TRELLIS_TEST_DATABASE_URL").ok()?;
    std::env::set_var("DATABASE_URL", &url);
    // Keep the timeout-driven tests fast
    std::env::set_var("DATABASE_STATEMENT_TIMEOUT_MS", "2000");
    std::env::set_var("DATABASE_LOCK_TIMEOUT_MS", "1000");

    let pool = DatabaseManager::main_pool()
        .await
        .expect("failed to connect to test database");
    bootstrap(&pool).await;
    Some(pool)
}

async fn bootstrap(pool: &PgPool) {
    // Role the provisioner grants namespace privileges to
    sqlx::query(
        "DO $$ BEGIN CREATE ROLE trellis_app NOLOGIN; \
         EXCEPTION WHEN duplicate_object THEN NULL; END $$;",
    )
    .execute(pool)
    .await
    .expect("failed to create app role");

    // Stand-in for the external tenant registry
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tenants (\
            id UUID PRIMARY KEY, \
            name TEXT NOT NULL, \
            owner_user_id UUID NOT NULL, \
            namespace TEXT NOT NULL UNIQUE, \
            storage_status TEXT NOT NULL DEFAULT 'not_created', \
            last_error TEXT, \
            checked_at TIMESTAMPTZ, \
            is_active BOOLEAN NOT NULL DEFAULT true, \
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()\
        )",
    )
    .execute(pool)
    .await
    .expect("failed to create tenants table");
}

/// Insert a registry row for a fresh tenant and return its id.
///
/// Seeds are inactive by default so the reconciliation tests, which scan all
/// active tenants, never pick up tenants belonging to other tests.
pub async fn seed_tenant(pool: &PgPool, active: bool) -> Uuid {
    let id = Uuid::new_v4();
    let namespace = resolver::namespace_for(&id);

    sqlx::query(
        "INSERT INTO tenants (id, name, owner_user_id, namespace, is_active) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(format!("test-{}", id.simple()))
    .bind(Uuid::new_v4())
    .bind(&namespace)
    .bind(active)
    .execute(pool)
    .await
    .expect("failed to seed tenant");

    id
}

pub async fn namespace_exists(pool: &PgPool, tenant_id: &Uuid) -> bool {
    let namespace = resolver::namespace_for(tenant_id);
    sqlx::query("SELECT 1 FROM pg_namespace WHERE nspname = $1")
        .bind(&namespace)
        .fetch_optional(pool)
        .await
        .expect("namespace query failed")
        .is_some()
}

pub async fn storage_status(pool: &PgPool, tenant_id: &Uuid) -> StorageStatus {
    let status: (String,) =
        sqlx::query_as("SELECT storage_status FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_one(pool)
            .await
            .expect("status query failed");
    status.0.parse().expect("unknown storage status")
}
