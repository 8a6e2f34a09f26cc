use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::registry::TenantDirectory;
use super::TenancyError;

/// Header carrying an explicit tenant identifier.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Authenticated principal, inserted into request extensions by the upstream
/// auth layer. Carries the tenant association and the per-user deferral flag
/// written by onboarding.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    /// When true (the default), namespace creation is deferred until the
    /// tenant reaches a post-onboarding surface.
    pub defer_provisioning: bool,
}

/// Outcome of namespace resolution for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No tenant signal; the request runs against the shared namespace.
    Shared,
    Tenant { tenant_id: Uuid, namespace: String },
}

/// Derive the storage namespace for a tenant identifier.
///
/// Pure and deterministic: the same tenant id always yields the same
/// namespace, with no registry lookup. The hash keeps identifiers well under
/// Postgres's 63-byte limit regardless of the id format.
pub fn namespace_for(tenant_id: &Uuid) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    let hash = hasher.finalize();
    let hash_str = format!("{:x}", hash);

    // First 16 hex characters keeps names short and collision-safe
    format!("tenant_{}", &hash_str[..16])
}

/// Resolve the target namespace for a request.
///
/// Precedence: an explicit `x-tenant-id` header wins and derives the
/// namespace purely; otherwise an authenticated principal with an active
/// tenant association resolves to that tenant's stored namespace; otherwise
/// the shared namespace. Read-only and safe to call repeatedly.
pub async fn resolve(
    headers: &HeaderMap,
    principal: Option<&Principal>,
    directory: &dyn TenantDirectory,
) -> Result<Resolution, TenancyError> {
    if let Some(raw) = headers.get(TENANT_HEADER) {
        let value = raw
            .to_str()
            .map_err(|_| TenancyError::InvalidTenantId("non-ascii header value".to_string()))?;
        let tenant_id = parse_tenant_id(value)?;
        return Ok(Resolution::Tenant {
            tenant_id,
            namespace: namespace_for(&tenant_id),
        });
    }

    if let Some(principal) = principal {
        let tenant = match principal.tenant_id {
            Some(tenant_id) => directory.get(tenant_id).await?,
            None => directory.get_by_owner(principal.user_id).await?,
        };
        match tenant {
            Some(tenant) if tenant.is_active => {
                return Ok(Resolution::Tenant {
                    tenant_id: tenant.id,
                    namespace: tenant.namespace,
                });
            }
            _ => {
                tracing::debug!(
                    user_id = %principal.user_id,
                    "principal tenant missing or inactive, resolving to shared"
                );
            }
        }
    }

    Ok(Resolution::Shared)
}

/// Validate a tenant identifier string. Fails fast on malformed input.
pub fn parse_tenant_id(value: &str) -> Result<Uuid, TenancyError> {
    Uuid::parse_str(value.trim()).map_err(|_| TenancyError::InvalidTenantId(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_is_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(namespace_for(&id), namespace_for(&id));
    }

    #[test]
    fn namespace_differs_per_tenant() {
        assert_ne!(namespace_for(&Uuid::new_v4()), namespace_for(&Uuid::new_v4()));
    }

    #[test]
    fn namespace_is_a_valid_identifier() {
        let ns = namespace_for(&Uuid::new_v4());
        assert!(ns.starts_with("tenant_"));
        assert_eq!(ns.len(), "tenant_".len() + 16);
        assert!(crate::database::DatabaseManager::is_valid_namespace(&ns));
    }

    #[test]
    fn parses_valid_tenant_ids() {
        let id = Uuid::new_v4();
        assert_eq!(parse_tenant_id(&id.to_string()).unwrap(), id);
        assert_eq!(parse_tenant_id(&format!("  {}  ", id)).unwrap(), id);
    }

    #[test]
    fn rejects_malformed_tenant_ids() {
        for bad in ["", "not-a-uuid", "1234", "tenant_abc"] {
            assert!(matches!(
                parse_tenant_id(bad),
                Err(TenancyError::InvalidTenantId(_))
            ));
        }
    }
}
