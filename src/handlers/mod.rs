pub mod root;

use std::sync::Arc;

use crate::tenancy::provisioner::SchemaProvisioner;
use crate::tenancy::reconcile::ReconciliationWorker;
use crate::tenancy::registry::TenantDirectory;

/// Shared state for the operator API.
pub struct AppState {
    pub directory: Arc<dyn TenantDirectory>,
    pub provisioner: Arc<SchemaProvisioner>,
    pub reconciler: Arc<ReconciliationWorker>,
}
