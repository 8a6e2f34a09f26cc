use axum::extract::Extension;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use trellis_api_rust::config;
use trellis_api_rust::database::DatabaseManager;
use trellis_api_rust::error::ApiError;
use trellis_api_rust::handlers::{root::tenant as root_tenant, AppState};
use trellis_api_rust::middleware::{
    mark_post_onboarding, tenant_context_middleware, ActiveTenant, TenancyState,
};
use trellis_api_rust::tenancy::context;
use trellis_api_rust::tenancy::jobs;
use trellis_api_rust::tenancy::locks::TenantLocks;
use trellis_api_rust::tenancy::provisioner::SchemaProvisioner;
use trellis_api_rust::tenancy::reconcile::ReconciliationWorker;
use trellis_api_rust::tenancy::registry::PgTenantDirectory;

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let config = config::config();
    tracing::info!("Starting Trellis API in {:?} mode", config.environment);

    let pool = DatabaseManager::main_pool()
        .await
        .unwrap_or_else(|e| panic!("failed to connect system database: {}", e));

    let directory = Arc::new(PgTenantDirectory::new(pool));
    let locks = Arc::new(TenantLocks::new());
    let provisioner = Arc::new(SchemaProvisioner::new(directory.clone(), locks));

    let (job_sink, job_rx) = jobs::queue();
    let job_sink = Arc::new(job_sink);
    let reconciler = Arc::new(ReconciliationWorker::new(
        directory.clone(),
        provisioner.clone(),
        job_sink.clone(),
    ));

    // Background tasks: provision-job worker and the reconciliation schedule
    tokio::spawn(jobs::run_worker(job_rx, provisioner.clone()));
    tokio::spawn(
        reconciler
            .clone()
            .run(Duration::from_secs(config.tenancy.reconcile_interval_secs)),
    );

    let state = Arc::new(AppState {
        directory: directory.clone(),
        provisioner: provisioner.clone(),
        reconciler,
    });
    let tenancy_state = Arc::new(TenancyState {
        directory,
        provisioner,
    });

    let app = app(state, tenancy_state);

    // Allow tests or deployments to override port via env
    let port = std::env::var("TRELLIS_API_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("Trellis API server listening on http://{}", bind_addr);

    axum::serve(listener, app).await.expect("server");
}

fn app(state: Arc<AppState>, tenancy_state: Arc<TenancyState>) -> Router {
    // The post-onboarding marker must run before the interceptor reads it,
    // so the dashboard group stacks it outside its tenant layer.
    let dashboard = dashboard_routes()
        .layer(axum::middleware::from_fn_with_state(
            tenancy_state.clone(),
            tenant_context_middleware,
        ))
        .layer(axum::middleware::from_fn(mark_post_onboarding));

    let api = root_routes(state).layer(axum::middleware::from_fn_with_state(
        tenancy_state,
        tenant_context_middleware,
    ));

    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        // Operator API
        .merge(api)
        // Tenant-scoped surface behind the onboarding gate
        .merge(dashboard)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn root_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/root/tenant", get(root_tenant::tenant_list))
        .route("/api/root/tenant/:id", get(root_tenant::tenant_show))
        .route("/api/root/tenant/:id/provision", post(root_tenant::tenant_provision))
        .route("/api/root/tenant/:id/verify", get(root_tenant::tenant_verify))
        .route("/api/root/reconcile", post(root_tenant::reconcile_now))
        .with_state(state)
}

/// Routes under the configured dashboard prefix; the caller stacks the
/// post-onboarding marker on top, which lifts provisioning deferral.
fn dashboard_routes() -> Router {
    let prefix = config::config().tenancy.dashboard_path_prefix.trim_end_matches('/');

    Router::new().route(&format!("{}/overview", prefix), get(dashboard_overview))
}

/// Minimal tenant-scoped endpoint: everything heavier lives in the business
/// modules, which hang off the same ActiveTenant extension.
async fn dashboard_overview(
    active: Option<Extension<ActiveTenant>>,
) -> Result<axum::response::Json<Value>, ApiError> {
    let Some(Extension(ActiveTenant(binding))) = active else {
        // Deferred or unresolved tenant: the interceptor fell back to shared
        return Ok(axum::response::Json(json!({
            "success": true,
            "data": { "tenant": Value::Null, "namespace": "public" }
        })));
    };

    let profiles = context::with_binding(&binding, Default::default(), |conn| {
        Box::pin(async move {
            let row = sqlx::query("SELECT count(*) AS n FROM profiles")
                .fetch_one(conn)
                .await?;
            Ok(row.get::<i64, _>("n"))
        })
    })
    .await?;

    Ok(axum::response::Json(json!({
        "success": true,
        "data": {
            "tenant": binding.tenant_id,
            "namespace": binding.namespace,
            "profiles": profiles,
        }
    })))
}

async fn root() -> axum::response::Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    axum::response::Json(json!({
        "success": true,
        "data": {
            "name": "Trellis API (Rust)",
            "version": version,
            "description": "Multi-tenant SaaS platform backend with per-tenant schema isolation",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "dashboard": "/api/dashboard/* (tenant-scoped, post-onboarding)",
                "root": "/api/root/tenant[/:id] (operator)",
            }
        }
    }))
}

async fn health() -> impl axum::response::IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check().await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            axum::response::Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::response::Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}
