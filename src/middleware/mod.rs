pub mod tenant_context;

pub use tenant_context::{
    mark_post_onboarding, tenant_context_middleware, ActiveTenant, Surface, TenancyState,
};
