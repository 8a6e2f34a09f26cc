use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::provisioner::SchemaProvisioner;
use super::TenancyError;

/// Job type name on the external queue.
pub const PROVISION_JOB_TYPE: &str = "provision-tenant";

/// A request for full provisioning of one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionJob {
    pub tenant_id: Uuid,
}

/// Job-submission contract. Fire-and-forget: delivery and retry semantics
/// belong to the queue behind the sink, not to the submitter.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn submit(&self, job: ProvisionJob) -> Result<(), TenancyError>;
}

/// In-process sink backed by an unbounded channel, standing in for the
/// external queue. Duplicate submissions for the same tenant are harmless:
/// provisioning is idempotent and per-tenant locked.
pub struct QueueJobSink {
    tx: mpsc::UnboundedSender<ProvisionJob>,
}

pub fn queue() -> (QueueJobSink, mpsc::UnboundedReceiver<ProvisionJob>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueJobSink { tx }, rx)
}

#[async_trait]
impl JobSink for QueueJobSink {
    async fn submit(&self, job: ProvisionJob) -> Result<(), TenancyError> {
        info!(tenant_id = %job.tenant_id, job_type = PROVISION_JOB_TYPE, "submitting job");
        self.tx
            .send(job)
            .map_err(|_| TenancyError::JobSubmission("job queue is closed".to_string()))
    }
}

/// Drain the queue, running full provisioning for each submitted tenant.
/// Failures are logged and recorded on the tenant row by the provisioner;
/// the next reconciliation pass picks those tenants up again.
pub async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<ProvisionJob>,
    provisioner: Arc<SchemaProvisioner>,
) {
    while let Some(job) = rx.recv().await {
        match provisioner.ensure_complete(job.tenant_id).await {
            Ok(status) => {
                info!(tenant_id = %job.tenant_id, status = %status, "provision job finished");
            }
            Err(err) => {
                warn!(tenant_id = %job.tenant_id, error = %err, "provision job failed");
            }
        }
    }
    info!("provision job worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_delivers_jobs_in_order() {
        let (sink, mut rx) = queue();
        let first = ProvisionJob { tenant_id: Uuid::new_v4() };
        let second = ProvisionJob { tenant_id: Uuid::new_v4() };

        sink.submit(first).await.unwrap();
        sink.submit(second).await.unwrap();

        assert_eq!(rx.recv().await, Some(first));
        assert_eq!(rx.recv().await, Some(second));
    }

    #[tokio::test]
    async fn submit_fails_once_receiver_is_gone() {
        let (sink, rx) = queue();
        drop(rx);

        let result = sink.submit(ProvisionJob { tenant_id: Uuid::new_v4() }).await;
        assert!(matches!(result, Err(TenancyError::JobSubmission(_))));
    }
}
