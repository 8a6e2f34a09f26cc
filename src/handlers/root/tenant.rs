// Operator endpoints for tenant storage: /api/root/tenant/*

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::AppState;

/// GET /api/root/tenant - list active tenants with storage state
pub async fn tenant_list(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let tenants = state.directory.list_active().await?;

    let data: Vec<Value> = tenants
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "name": t.name,
                "namespace": t.namespace,
                "storage_status": t.storage_status,
                "last_error": t.last_error,
                "checked_at": t.checked_at,
            })
        })
        .collect();

    Ok(Json(json!({ "success": true, "data": data })))
}

/// GET /api/root/tenant/:id - show one tenant
pub async fn tenant_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let tenant = state
        .directory
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Tenant not found: {}", id)))?;

    Ok(Json(json!({ "success": true, "data": tenant })))
}

#[derive(Debug, Deserialize)]
pub struct ProvisionParams {
    /// "minimal" (default) or "complete"
    pub mode: Option<String>,
}

/// POST /api/root/tenant/:id/provision?mode=minimal|complete
pub async fn tenant_provision(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<ProvisionParams>,
) -> Result<Json<Value>, ApiError> {
    let status = match params.mode.as_deref() {
        None | Some("minimal") => state.provisioner.ensure_minimal(id).await?,
        Some("complete") => state.provisioner.ensure_complete(id).await?,
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "Unknown provisioning mode '{}', expected 'minimal' or 'complete'",
                other
            )))
        }
    };

    Ok(Json(json!({
        "success": true,
        "data": { "tenant_id": id, "storage_status": status }
    })))
}

/// GET /api/root/tenant/:id/verify - read-only completeness check
pub async fn tenant_verify(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let verification = state.provisioner.verify(id).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "tenant_id": id, "verification": verification }
    })))
}

/// POST /api/root/reconcile - run one reconciliation pass now
pub async fn reconcile_now(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let report = state.reconciler.run_once().await?;

    Ok(Json(json!({ "success": true, "data": report })))
}
