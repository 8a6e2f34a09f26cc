use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::jobs::{JobSink, ProvisionJob};
use super::provisioner::{SchemaProvisioner, Verification};
use super::registry::TenantDirectory;
use super::TenancyError;
use crate::database::models::StorageStatus;

/// Provisioning operations the reconciler depends on.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    async fn namespace_exists(&self, tenant_id: Uuid) -> Result<bool, TenancyError>;
    async fn ensure_minimal(&self, tenant_id: Uuid) -> Result<StorageStatus, TenancyError>;
    async fn verify(&self, tenant_id: Uuid) -> Result<Verification, TenancyError>;
}

#[async_trait]
impl ProvisioningApi for SchemaProvisioner {
    async fn namespace_exists(&self, tenant_id: Uuid) -> Result<bool, TenancyError> {
        SchemaProvisioner::namespace_exists(self, tenant_id).await
    }

    async fn ensure_minimal(&self, tenant_id: Uuid) -> Result<StorageStatus, TenancyError> {
        SchemaProvisioner::ensure_minimal(self, tenant_id).await
    }

    async fn verify(&self, tenant_id: Uuid) -> Result<Verification, TenancyError> {
        SchemaProvisioner::verify(self, tenant_id).await
    }
}

/// Aggregate counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub created: usize,
    pub submitted: usize,
    pub errored: usize,
}

/// Detects and repairs tenants whose storage is missing or incomplete.
///
/// One pass stays bounded: an absent namespace gets minimal creation inline
/// and a full-provisioning job on the queue; everything heavier runs in the
/// submitted jobs. Overlapping passes are safe because provisioning is
/// idempotent and per-tenant locked, so duplicate submissions are harmless.
pub struct ReconciliationWorker {
    directory: Arc<dyn TenantDirectory>,
    provisioner: Arc<dyn ProvisioningApi>,
    jobs: Arc<dyn JobSink>,
}

impl ReconciliationWorker {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        provisioner: Arc<dyn ProvisioningApi>,
        jobs: Arc<dyn JobSink>,
    ) -> Self {
        Self {
            directory,
            provisioner,
            jobs,
        }
    }

    /// One reconciliation pass over all active tenants.
    pub async fn run_once(&self) -> Result<ReconcileReport, TenancyError> {
        let tenants = self.directory.list_active().await?;
        let mut report = ReconcileReport::default();

        for tenant in tenants {
            report.checked += 1;
            if let Err(err) = self.directory.touch_checked(tenant.id).await {
                warn!(tenant_id = %tenant.id, error = %err, "failed to stamp health check");
            }

            if let Err(err) = self.reconcile_tenant(tenant.id, &mut report).await {
                report.errored += 1;
                warn!(tenant_id = %tenant.id, error = %err, "reconciliation failed for tenant");
                // Surface the failure on the registry row; the next pass or
                // an operator picks it up. Provisioning errors were already
                // recorded by the provisioner itself, re-recording is a no-op.
                if let Err(update_err) = self
                    .directory
                    .set_storage_status(tenant.id, StorageStatus::Error, Some(&err.to_string()))
                    .await
                {
                    warn!(tenant_id = %tenant.id, error = %update_err, "failed to record reconcile error");
                }
            }
        }

        info!(
            checked = report.checked,
            created = report.created,
            submitted = report.submitted,
            errored = report.errored,
            "reconciliation pass finished"
        );
        Ok(report)
    }

    async fn reconcile_tenant(
        &self,
        tenant_id: Uuid,
        report: &mut ReconcileReport,
    ) -> Result<(), TenancyError> {
        if !self.provisioner.namespace_exists(tenant_id).await? {
            // Create with the minimal set only; the full set runs as a job so
            // one scan never blocks on a slow tenant.
            self.provisioner.ensure_minimal(tenant_id).await?;
            report.created += 1;
            self.jobs.submit(ProvisionJob { tenant_id }).await?;
            report.submitted += 1;
            return Ok(());
        }

        let verification = self.provisioner.verify(tenant_id).await?;
        if !verification.complete {
            tracing::debug!(
                %tenant_id,
                missing = ?verification.missing,
                "tenant storage incomplete, submitting full provisioning"
            );
            self.jobs.submit(ProvisionJob { tenant_id }).await?;
            report.submitted += 1;
        }
        Ok(())
    }

    /// Scheduled loop. Each firing is one `run_once`; a pass that fails
    /// outright is logged and retried at the next tick.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                warn!(error = %err, "reconciliation pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Tenant;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn make_tenant(status: StorageStatus) -> Tenant {
        let id = Uuid::new_v4();
        Tenant {
            id,
            name: format!("tenant-{}", id.simple()),
            owner_user_id: Uuid::new_v4(),
            namespace: crate::tenancy::resolver::namespace_for(&id),
            storage_status: status,
            last_error: None,
            checked_at: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct FakeDirectory {
        tenants: Vec<Tenant>,
        status_updates: Mutex<Vec<(Uuid, StorageStatus)>>,
    }

    #[async_trait]
    impl TenantDirectory for FakeDirectory {
        async fn get(&self, tenant_id: Uuid) -> Result<Option<Tenant>, TenancyError> {
            Ok(self.tenants.iter().find(|t| t.id == tenant_id).cloned())
        }

        async fn get_by_owner(&self, user_id: Uuid) -> Result<Option<Tenant>, TenancyError> {
            Ok(self.tenants.iter().find(|t| t.owner_user_id == user_id).cloned())
        }

        async fn list_active(&self) -> Result<Vec<Tenant>, TenancyError> {
            Ok(self.tenants.iter().filter(|t| t.is_active).cloned().collect())
        }

        async fn set_storage_status(
            &self,
            tenant_id: Uuid,
            status: StorageStatus,
            _error: Option<&str>,
        ) -> Result<(), TenancyError> {
            self.status_updates.lock().unwrap().push((tenant_id, status));
            Ok(())
        }

        async fn touch_checked(&self, _tenant_id: Uuid) -> Result<(), TenancyError> {
            Ok(())
        }
    }

    /// Scripted provisioning behavior per tenant.
    #[derive(Default)]
    struct FakeProvisioner {
        exists: HashMap<Uuid, bool>,
        missing: HashMap<Uuid, Vec<String>>,
        fail_verify: Option<Uuid>,
        minimal_calls: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl ProvisioningApi for FakeProvisioner {
        async fn namespace_exists(&self, tenant_id: Uuid) -> Result<bool, TenancyError> {
            Ok(*self.exists.get(&tenant_id).unwrap_or(&false))
        }

        async fn ensure_minimal(&self, tenant_id: Uuid) -> Result<StorageStatus, TenancyError> {
            self.minimal_calls.lock().unwrap().push(tenant_id);
            Ok(StorageStatus::Minimal)
        }

        async fn verify(&self, tenant_id: Uuid) -> Result<Verification, TenancyError> {
            if self.fail_verify == Some(tenant_id) {
                return Err(TenancyError::ProvisioningTimeout("canceled".to_string()));
            }
            let missing = self.missing.get(&tenant_id).cloned().unwrap_or_default();
            Ok(Verification {
                complete: missing.is_empty(),
                missing,
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        jobs: Mutex<Vec<ProvisionJob>>,
    }

    #[async_trait]
    impl JobSink for RecordingSink {
        async fn submit(&self, job: ProvisionJob) -> Result<(), TenancyError> {
            self.jobs.lock().unwrap().push(job);
            Ok(())
        }
    }

    fn worker(
        directory: FakeDirectory,
        provisioner: FakeProvisioner,
        sink: Arc<RecordingSink>,
    ) -> ReconciliationWorker {
        ReconciliationWorker::new(Arc::new(directory), Arc::new(provisioner), sink)
    }

    #[tokio::test]
    async fn absent_namespace_is_created_and_job_submitted() {
        let tenant = make_tenant(StorageStatus::NotCreated);
        let tenant_id = tenant.id;
        let directory = FakeDirectory { tenants: vec![tenant], ..Default::default() };
        let provisioner = FakeProvisioner::default();
        let sink = Arc::new(RecordingSink::default());

        let report = worker(directory, provisioner, sink.clone()).run_once().await.unwrap();

        assert_eq!(report, ReconcileReport { checked: 1, created: 1, submitted: 1, errored: 0 });
        let jobs = sink.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].tenant_id, tenant_id);
    }

    #[tokio::test]
    async fn minimal_tenant_gets_exactly_one_full_provisioning_job() {
        let tenant = make_tenant(StorageStatus::Minimal);
        let tenant_id = tenant.id;
        let directory = FakeDirectory { tenants: vec![tenant], ..Default::default() };
        let provisioner = FakeProvisioner {
            exists: HashMap::from([(tenant_id, true)]),
            missing: HashMap::from([(tenant_id, vec!["invoices".to_string()])]),
            ..Default::default()
        };
        let sink = Arc::new(RecordingSink::default());

        let report = worker(directory, provisioner, sink.clone()).run_once().await.unwrap();

        assert_eq!(report, ReconcileReport { checked: 1, created: 0, submitted: 1, errored: 0 });
        assert_eq!(sink.jobs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn complete_tenant_is_left_alone() {
        let tenant = make_tenant(StorageStatus::Complete);
        let tenant_id = tenant.id;
        let directory = FakeDirectory { tenants: vec![tenant], ..Default::default() };
        let provisioner = FakeProvisioner {
            exists: HashMap::from([(tenant_id, true)]),
            ..Default::default()
        };
        let sink = Arc::new(RecordingSink::default());

        let report = worker(directory, provisioner, sink.clone()).run_once().await.unwrap();

        assert_eq!(report, ReconcileReport { checked: 1, created: 0, submitted: 0, errored: 0 });
        assert!(sink.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_failing_tenant_does_not_stop_the_pass() {
        let bad = make_tenant(StorageStatus::Minimal);
        let good = make_tenant(StorageStatus::Minimal);
        let (bad_id, good_id) = (bad.id, good.id);
        let directory = FakeDirectory { tenants: vec![bad, good], ..Default::default() };
        let provisioner = FakeProvisioner {
            exists: HashMap::from([(bad_id, true), (good_id, true)]),
            missing: HashMap::from([(good_id, vec!["messages".to_string()])]),
            fail_verify: Some(bad_id),
            ..Default::default()
        };
        let sink = Arc::new(RecordingSink::default());

        let report = worker(directory, provisioner, sink.clone()).run_once().await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.errored, 1);
        assert_eq!(report.submitted, 1);
        assert_eq!(sink.jobs.lock().unwrap()[0].tenant_id, good_id);
    }

    #[tokio::test]
    async fn errors_are_recorded_on_the_registry_row() {
        let tenant = make_tenant(StorageStatus::Minimal);
        let tenant_id = tenant.id;
        let provisioner = FakeProvisioner {
            exists: HashMap::from([(tenant_id, true)]),
            fail_verify: Some(tenant_id),
            ..Default::default()
        };

        let directory = Arc::new(FakeDirectory { tenants: vec![tenant], ..Default::default() });
        let sink = Arc::new(RecordingSink::default());
        let worker = ReconciliationWorker::new(directory.clone(), Arc::new(provisioner), sink);

        worker.run_once().await.unwrap();

        let updates = directory.status_updates.lock().unwrap();
        assert_eq!(updates.as_slice(), &[(tenant_id, StorageStatus::Error)]);
    }
}
