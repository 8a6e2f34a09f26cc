use axum::{
    extract::{Request, State},
    http::{Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::config;
use crate::tenancy::context::{self, TenantBinding};
use crate::tenancy::provisioner::SchemaProvisioner;
use crate::tenancy::registry::TenantDirectory;
use crate::tenancy::resolver::{self, Principal, Resolution};
use crate::tenancy::TenancyError;

/// Marker for request surfaces a tenant only reaches after finishing
/// onboarding. Attached at router construction (see `main.rs`), so the
/// interceptor never inspects request paths to make the deferral decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    PostOnboarding,
}

/// Resolved tenant for the current request, injected for downstream handlers.
#[derive(Debug, Clone)]
pub struct ActiveTenant(pub TenantBinding);

/// Shared state for the tenant interceptor.
pub struct TenancyState {
    pub directory: Arc<dyn TenantDirectory>,
    pub provisioner: Arc<SchemaProvisioner>,
}

/// Per-request tenant entry point: bypass, resolve, probe,
/// provision-or-defer, bind, execute, unbind.
///
/// A provisioning or binding failure never fails the request; it is logged
/// with correlation data and the request runs against the shared namespace.
/// The binding lives in a task-local scope, so a reused worker cannot
/// inherit a stale tenant no matter how the request ends.
pub async fn tenant_context_middleware(
    State(state): State<Arc<TenancyState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if is_public_path(path, &config::config().tenancy.public_path_prefixes) {
        return next.run(request).await;
    }

    context::scope(run_scoped(state, request, next)).await
}

async fn run_scoped(state: Arc<TenancyState>, mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    match prepare_binding(&state, request.headers(), request.extensions()).await {
        Ok(Some(binding)) => {
            tracing::debug!(
                tenant_id = %binding.tenant_id,
                namespace = %binding.namespace,
                request_id = %correlation_id,
                "request bound to tenant"
            );
            request.extensions_mut().insert(ActiveTenant(binding.clone()));
            context::bind_task(&binding);
            let response = next.run(request).await;
            // The scope tears the binding down anyway; clearing here keeps
            // trailing middleware on this task out of tenant context too.
            context::clear_task_binding();
            response
        }
        Ok(None) => next.run(request).await,
        Err(err) => {
            tracing::error!(
                error = %err,
                request_id = %correlation_id,
                path = %path_of(&request),
                "tenant context unavailable, serving request against shared namespace"
            );
            next.run(request).await
        }
    }
}

fn path_of(request: &Request) -> String {
    request.uri().path().to_string()
}

/// Resolve and (maybe) provision. `Ok(None)` means the request runs against
/// the shared namespace: no tenant signal, or creation was deferred.
async fn prepare_binding(
    state: &TenancyState,
    headers: &HeaderMap,
    extensions: &Extensions,
) -> Result<Option<TenantBinding>, TenancyError> {
    let principal = extensions.get::<Principal>().cloned();

    let resolution =
        resolver::resolve(headers, principal.as_ref(), state.directory.as_ref()).await?;
    let (tenant_id, namespace) = match resolution {
        Resolution::Shared => return Ok(None),
        Resolution::Tenant { tenant_id, namespace } => (tenant_id, namespace),
    };

    let probe = state.provisioner.probe(&namespace).await?;
    if !probe.exists {
        let surface = extensions.get::<Surface>().copied();
        if should_provision_inline(surface, principal.as_ref()) {
            state.provisioner.ensure_minimal(tenant_id).await?;
        } else {
            tracing::debug!(
                %tenant_id,
                %namespace,
                "namespace absent and provisioning deferred, serving shared namespace"
            );
            return Ok(None);
        }
    }

    Ok(Some(TenantBinding { tenant_id, namespace }))
}

/// Deferral policy: provision inline only when the request reached a
/// post-onboarding surface, or the principal's profile explicitly turned
/// deferral off. Defaults to deferring.
fn should_provision_inline(surface: Option<Surface>, principal: Option<&Principal>) -> bool {
    if matches!(surface, Some(Surface::PostOnboarding)) {
        return true;
    }
    principal.map(|p| !p.defer_provisioning).unwrap_or(false)
}

fn is_public_path(path: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return false;
        }
        path == prefix || path.starts_with(&format!("{}/", prefix))
    })
}

/// Layer for routes behind the onboarding gate; mounted in `main.rs` under
/// the configured dashboard prefix.
pub async fn mark_post_onboarding(mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(Surface::PostOnboarding);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn principal(defer: bool) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            tenant_id: Some(Uuid::new_v4()),
            defer_provisioning: defer,
        }
    }

    #[test]
    fn public_prefix_matching() {
        let prefixes = vec!["/health".to_string(), "/auth".to_string()];
        assert!(is_public_path("/health", &prefixes));
        assert!(is_public_path("/auth/login", &prefixes));
        assert!(!is_public_path("/api/data", &prefixes));
        // Prefixes match whole segments, not arbitrary substrings
        assert!(!is_public_path("/authx", &prefixes));
    }

    #[test]
    fn empty_prefix_never_matches() {
        let prefixes = vec!["".to_string(), "/".to_string()];
        assert!(!is_public_path("/api/data", &prefixes));
    }

    #[test]
    fn provisioning_defers_by_default() {
        assert!(!should_provision_inline(None, None));
        assert!(!should_provision_inline(None, Some(&principal(true))));
    }

    #[test]
    fn post_onboarding_surface_provisions_inline() {
        assert!(should_provision_inline(Some(Surface::PostOnboarding), None));
        assert!(should_provision_inline(
            Some(Surface::PostOnboarding),
            Some(&principal(true))
        ));
    }

    #[test]
    fn explicit_flag_overrides_deferral() {
        assert!(should_provision_inline(None, Some(&principal(false))));
    }
}
