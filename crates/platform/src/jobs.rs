//! Background job drivers: retried provisioning, deprovisioning and erasure,
//! export processing, and the fleet-wide retention sweep.

use std::sync::Arc;

use governance_core::{GovernanceError, GovernanceResult, Tenant, TenantStatus};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::SYSTEM_ACTOR;
use crate::erasure::ErasureResult;
use crate::orchestrator::GovernanceOrchestrator;
use crate::ports::{ExportJob, ExportJobStatus};
use crate::retention::CleanupResult;
use crate::retry::RetryPolicy;

const SWEEP_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub tenant_id: Uuid,
    pub error: String,
}

/// Aggregate outcome of one retention sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub tenants_processed: usize,
    /// Tenants whose policy has automatic cleanup turned off.
    pub tenants_skipped: usize,
    pub total_soft_deleted: usize,
    pub total_hard_deleted: usize,
    pub failures: Vec<SweepFailure>,
}

/// Runs long-lived governance work with the retry settings from config.
pub struct JobRunner {
    orch: Arc<GovernanceOrchestrator>,
    provisioning: RetryPolicy,
    deprovisioning: RetryPolicy,
    erasure: RetryPolicy,
    sweep_concurrency: usize,
}

impl JobRunner {
    pub fn new(orch: Arc<GovernanceOrchestrator>) -> Self {
        let config = &orch.context().config;
        let provisioning = RetryPolicy::from(&config.retry.provisioning);
        let deprovisioning = RetryPolicy::from(&config.retry.deprovisioning);
        let erasure = RetryPolicy::from(&config.retry.erasure);
        let sweep_concurrency = config.sweep.max_concurrency.max(1);
        Self {
            orch,
            provisioning,
            deprovisioning,
            erasure,
            sweep_concurrency,
        }
    }

    /// Provision a registered tenant, retrying transient failures. When the
    /// retries are exhausted the tenant is moved to `Deleted`.
    pub async fn provision(&self, tenant_id: Uuid) -> GovernanceResult<Tenant> {
        let orch = &self.orch;
        let outcome = self
            .provisioning
            .run("provision_tenant", tenant_id, || {
                orch.provision_tenant(tenant_id, SYSTEM_ACTOR)
            })
            .await;

        if let Err(e) = &outcome {
            error!(tenant_id = %tenant_id, error = %e, "Provisioning gave up");
            if let Err(rollback) = orch.fail_provisioning(tenant_id).await {
                warn!(tenant_id = %tenant_id, error = %rollback, "Provisioning rollback failed");
            }
        }
        outcome
    }

    /// Finish deprovisioning a tenant, retrying transient failures.
    pub async fn deprovision(&self, tenant_id: Uuid) -> GovernanceResult<Tenant> {
        let orch = &self.orch;
        self.deprovisioning
            .run("deprovision_tenant", tenant_id, || {
                orch.complete_deprovisioning(tenant_id, SYSTEM_ACTOR)
            })
            .await
    }

    /// Run erasure, re-running the whole pipeline while steps keep failing
    /// and retries remain. Returns the last run's result.
    pub async fn erase(&self, tenant_id: Uuid) -> GovernanceResult<ErasureResult> {
        let mut attempt = 0;
        loop {
            let result = self.orch.execute_erasure(tenant_id, SYSTEM_ACTOR).await?;
            if result.success || attempt >= self.erasure.max_retries {
                return Ok(result);
            }
            let backoff = self.erasure.backoff_for_attempt(attempt);
            warn!(
                tenant_id = %tenant_id,
                attempt = attempt + 1,
                failed_steps = ?result.failed_steps(),
                backoff_ms = backoff.as_millis() as u64,
                "Erasure incomplete, retrying"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    /// Produce the archive for a queued export job. A failed export is
    /// recorded on the job rather than returned as an error.
    pub async fn process_export(&self, job_id: &str) -> GovernanceResult<ExportJob> {
        process_export_job(&self.orch, job_id).await
    }

    /// Run retention cleanup for every active tenant with automatic cleanup
    /// enabled, at most `sweep.max_concurrency` tenants at a time.
    pub async fn run_retention_sweep(&self) -> GovernanceResult<SweepReport> {
        let tenants = self.active_tenants().await?;
        info!(tenants = tenants.len(), "Starting retention sweep");

        let semaphore = Arc::new(Semaphore::new(self.sweep_concurrency));
        let mut tasks = JoinSet::new();
        for tenant_id in tenants {
            let orch = self.orch.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (tenant_id, sweep_one(&orch, tenant_id).await)
            });
        }

        let mut report = SweepReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Some(result)))) => {
                    report.tenants_processed += 1;
                    report.total_soft_deleted += result.records_soft_deleted;
                    report.total_hard_deleted += result.records_hard_deleted;
                }
                Ok((_, Ok(None))) => report.tenants_skipped += 1,
                Ok((tenant_id, Err(e))) => {
                    warn!(tenant_id = %tenant_id, error = %e, "Retention cleanup failed");
                    report.failures.push(SweepFailure {
                        tenant_id,
                        error: e.to_string(),
                    });
                }
                Err(e) => error!(error = %e, "Retention task panicked"),
            }
        }

        info!(
            processed = report.tenants_processed,
            skipped = report.tenants_skipped,
            failed = report.failures.len(),
            soft_deleted = report.total_soft_deleted,
            hard_deleted = report.total_hard_deleted,
            "Retention sweep finished"
        );
        Ok(report)
    }

    async fn active_tenants(&self) -> GovernanceResult<Vec<Uuid>> {
        let mut ids = Vec::new();
        let mut page = 1;
        loop {
            let batch = self
                .orch
                .list_tenants(page, SWEEP_PAGE_SIZE, Some(TenantStatus::Active))
                .await?;
            ids.extend(batch.items.iter().map(|t| t.id));
            if page >= batch.pages() {
                return Ok(ids);
            }
            page += 1;
        }
    }
}

async fn sweep_one(
    orch: &GovernanceOrchestrator,
    tenant_id: Uuid,
) -> GovernanceResult<Option<CleanupResult>> {
    let policy = orch.get_retention_policy(tenant_id).await?;
    if !policy.auto_cleanup_enabled {
        return Ok(None);
    }
    orch.run_retention_cleanup(tenant_id).await.map(Some)
}

/// Mark the job in progress, write the archive, and record the outcome.
pub async fn process_export_job(
    orch: &GovernanceOrchestrator,
    job_id: &str,
) -> GovernanceResult<ExportJob> {
    let ctx = orch.context();
    let job = orch.get_export_status(job_id).await?;
    if job.status != ExportJobStatus::Queued {
        return Err(GovernanceError::InvalidInput(format!(
            "export job {job_id} is not queued"
        )));
    }
    let tenant = orch.get_tenant(job.tenant_id).await?;

    ctx.exports
        .update_job(job_id, ExportJobStatus::InProgress, None, None)
        .await?;

    let exported = ctx
        .bounded(
            "export_archive",
            ctx.exporter.export_archive(tenant.id, &tenant.schema_name),
        )
        .await;

    let job = match exported {
        Ok(url) => {
            info!(tenant_id = %tenant.id, job_id, "Data export completed");
            ctx.exports
                .update_job(job_id, ExportJobStatus::Completed, Some(url), None)
                .await?
        }
        Err(e) => {
            warn!(tenant_id = %tenant.id, job_id, error = %e, "Data export failed");
            ctx.exports
                .update_job(job_id, ExportJobStatus::Failed, None, Some(e.to_string()))
                .await?
        }
    };
    Ok(job)
}
