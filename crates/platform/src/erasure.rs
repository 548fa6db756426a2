//! Right-to-erasure pipeline.
//!
//! A fixed sequence of seven steps removes a tenant's data from the platform.
//! Every step is attempted even when an earlier one failed, and every step
//! must be safe to re-run, so a partially failed erasure is recovered by
//! executing it again. Failures are recorded as [`StepResult`]s rather than
//! returned as errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governance_core::StoreError;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditChain, AuditDetails, SYSTEM_ACTOR};
use crate::context::{bounded, GovernanceContext};
use crate::ports::{ExportJob, ExportJobStatus, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErasureStep {
    FreezeTenant,
    ExportFinalArchive,
    CascadeDeleteData,
    DropSchema,
    RotateEncryptionKey,
    PurgeCaches,
    WriteAuditRecord,
}

impl ErasureStep {
    /// Execution order.
    pub const PIPELINE: [ErasureStep; 7] = [
        Self::FreezeTenant,
        Self::ExportFinalArchive,
        Self::CascadeDeleteData,
        Self::DropSchema,
        Self::RotateEncryptionKey,
        Self::PurgeCaches,
        Self::WriteAuditRecord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FreezeTenant => "freeze_tenant",
            Self::ExportFinalArchive => "export_final_archive",
            Self::CascadeDeleteData => "cascade_delete_data",
            Self::DropSchema => "drop_schema",
            Self::RotateEncryptionKey => "rotate_encryption_key",
            Self::PurgeCaches => "purge_caches",
            Self::WriteAuditRecord => "write_audit_record",
        }
    }
}

impl std::fmt::Display for ErasureStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: ErasureStep,
    pub success: bool,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one erasure run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErasureResult {
    pub tenant_id: Uuid,
    /// True iff every step succeeded.
    pub success: bool,
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archive_path: Option<String>,
    pub records_deleted: u64,
    pub schema_dropped: Option<String>,
    /// Set when a single step ran on its own. The counters above then only
    /// reflect that step, not the whole erasure.
    #[serde(default)]
    pub rerun: bool,
}

impl ErasureResult {
    fn begin(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            success: true,
            steps: Vec::with_capacity(ErasureStep::PIPELINE.len()),
            started_at: Utc::now(),
            completed_at: None,
            archive_path: None,
            records_deleted: 0,
            schema_dropped: None,
            rerun: false,
        }
    }

    pub fn failed_steps(&self) -> Vec<ErasureStep> {
        self.steps
            .iter()
            .filter(|s| !s.success)
            .map(|s| s.step)
            .collect()
    }
}

/// Does the work behind each step. Implementations return an error on
/// failure and must tolerate being called again after a partial run.
#[async_trait]
pub trait ErasureBackend: Send + Sync {
    /// Disable all access for the tenant.
    async fn freeze_tenant(&self, tenant_id: Uuid) -> StoreResult<()>;

    /// Write a final export and return its location.
    async fn export_final_archive(&self, tenant_id: Uuid) -> StoreResult<String>;

    /// Delete every tenant row. Returns the number of rows removed.
    async fn cascade_delete_data(&self, tenant_id: Uuid) -> StoreResult<u64>;

    /// Drop the tenant schema. Returns the schema name.
    async fn drop_schema(&self, tenant_id: Uuid) -> StoreResult<String>;

    async fn rotate_encryption_key(&self, tenant_id: Uuid) -> StoreResult<()>;

    async fn purge_caches(&self, tenant_id: Uuid) -> StoreResult<()>;

    /// Persist the tamper-evident record of this erasure. Receives the
    /// result accumulated from the preceding steps.
    async fn write_audit_record(
        &self,
        tenant_id: Uuid,
        result: &ErasureResult,
    ) -> StoreResult<()>;
}

pub struct ErasurePipeline {
    backend: Arc<dyn ErasureBackend>,
    step_timeout: Duration,
}

impl ErasurePipeline {
    pub fn new(backend: Arc<dyn ErasureBackend>, step_timeout: Duration) -> Self {
        Self {
            backend,
            step_timeout,
        }
    }

    /// Run all seven steps in order and aggregate their outcomes.
    pub async fn execute(&self, tenant_id: Uuid) -> ErasureResult {
        info!(tenant_id = %tenant_id, "Starting erasure");
        let mut result = ErasureResult::begin(tenant_id);

        for step in ErasureStep::PIPELINE {
            let step_result = self.run_step_into(step, tenant_id, &mut result).await;
            if !step_result.success {
                result.success = false;
                metrics::counter!("governance.erasure.step_failures", "step" => step.as_str())
                    .increment(1);
                error!(
                    tenant_id = %tenant_id,
                    step = %step,
                    detail = %step_result.detail,
                    "Erasure step failed"
                );
            }
            result.steps.push(step_result);
        }

        result.completed_at = Some(Utc::now());
        info!(
            tenant_id = %tenant_id,
            success = result.success,
            records_deleted = result.records_deleted,
            "Erasure finished"
        );
        result
    }

    /// Run a single step outside the pipeline, e.g. to retry one that failed.
    pub async fn run_step(&self, step: ErasureStep, tenant_id: Uuid) -> StepResult {
        let mut scratch = ErasureResult::begin(tenant_id);
        scratch.rerun = true;
        let step_result = self.run_step_into(step, tenant_id, &mut scratch).await;
        if !step_result.success {
            warn!(
                tenant_id = %tenant_id,
                step = %step,
                detail = %step_result.detail,
                "Standalone erasure step failed"
            );
        }
        step_result
    }

    async fn run_step_into(
        &self,
        step: ErasureStep,
        tenant_id: Uuid,
        result: &mut ErasureResult,
    ) -> StepResult {
        let outcome = self.dispatch(step, tenant_id, result).await;
        let (success, detail) = match outcome {
            Ok(detail) => (true, detail),
            Err(e) => (false, e.to_string()),
        };
        StepResult {
            step,
            success,
            detail,
            timestamp: Utc::now(),
        }
    }

    async fn dispatch(
        &self,
        step: ErasureStep,
        tenant_id: Uuid,
        result: &mut ErasureResult,
    ) -> Result<String, StoreError> {
        let backend = &self.backend;
        let limit = self.step_timeout;
        let op = step.as_str();
        match step {
            ErasureStep::FreezeTenant => {
                bounded(limit, op, backend.freeze_tenant(tenant_id)).await?;
                Ok("tenant access disabled".to_string())
            }
            ErasureStep::ExportFinalArchive => {
                let path = bounded(limit, op, backend.export_final_archive(tenant_id)).await?;
                result.archive_path = Some(path.clone());
                Ok(format!("archive written to {path}"))
            }
            ErasureStep::CascadeDeleteData => {
                let deleted = bounded(limit, op, backend.cascade_delete_data(tenant_id)).await?;
                result.records_deleted = deleted;
                Ok(format!("{deleted} records deleted"))
            }
            ErasureStep::DropSchema => {
                let schema = bounded(limit, op, backend.drop_schema(tenant_id)).await?;
                result.schema_dropped = Some(schema.clone());
                Ok(format!("schema {schema} dropped"))
            }
            ErasureStep::RotateEncryptionKey => {
                bounded(limit, op, backend.rotate_encryption_key(tenant_id)).await?;
                Ok("encryption key rotated".to_string())
            }
            ErasureStep::PurgeCaches => {
                bounded(limit, op, backend.purge_caches(tenant_id)).await?;
                Ok("caches purged".to_string())
            }
            ErasureStep::WriteAuditRecord => {
                bounded(limit, op, backend.write_audit_record(tenant_id, &*result)).await?;
                Ok("audit record written".to_string())
            }
        }
    }
}

/// [`ErasureBackend`] composed from the platform ports.
pub struct PlatformErasureBackend {
    ctx: GovernanceContext,
    chain: Arc<AuditChain>,
    actor_id: Uuid,
}

impl PlatformErasureBackend {
    pub fn new(ctx: GovernanceContext, chain: Arc<AuditChain>) -> Self {
        Self {
            ctx,
            chain,
            actor_id: SYSTEM_ACTOR,
        }
    }

    /// Attribute the erasure audit entry to `actor_id` instead of the system.
    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = actor_id;
        self
    }

    async fn schema_name(&self, tenant_id: Uuid) -> StoreResult<String> {
        self.ctx
            .tenants
            .get(tenant_id)
            .await?
            .map(|t| t.schema_name)
            .ok_or_else(|| StoreError::NotFound(format!("tenant {tenant_id}")))
    }
}

#[async_trait]
impl ErasureBackend for PlatformErasureBackend {
    async fn freeze_tenant(&self, tenant_id: Uuid) -> StoreResult<()> {
        self.ctx.tenants.set_api_access(tenant_id, false).await
    }

    async fn export_final_archive(&self, tenant_id: Uuid) -> StoreResult<String> {
        let schema = self.schema_name(tenant_id).await?;
        let path = self.ctx.exporter.export_archive(tenant_id, &schema).await?;

        let mut job = ExportJob::queued(tenant_id);
        job.status = ExportJobStatus::Completed;
        job.download_url = Some(path.clone());
        job.completed_at = Some(Utc::now());
        self.ctx.exports.save_job(job).await?;
        Ok(path)
    }

    async fn cascade_delete_data(&self, tenant_id: Uuid) -> StoreResult<u64> {
        self.ctx.tenant_data.cascade_delete_all(tenant_id).await
    }

    async fn drop_schema(&self, tenant_id: Uuid) -> StoreResult<String> {
        let schema = self.schema_name(tenant_id).await?;
        if self.ctx.schemas.schema_exists(&schema).await? {
            self.ctx.schemas.drop_schema(&schema).await?;
        }
        Ok(schema)
    }

    async fn rotate_encryption_key(&self, tenant_id: Uuid) -> StoreResult<()> {
        self.ctx.keys.rotate_tenant_key(tenant_id).await
    }

    async fn purge_caches(&self, tenant_id: Uuid) -> StoreResult<()> {
        self.ctx.caches.purge_tenant(tenant_id).await
    }

    async fn write_audit_record(
        &self,
        tenant_id: Uuid,
        result: &ErasureResult,
    ) -> StoreResult<()> {
        let mut details = AuditDetails::new();
        details.insert("rerun".into(), result.rerun.into());
        details.insert("started_at".into(), result.started_at.to_rfc3339().into());
        // A lone re-run has no counters from the other steps to report.
        if !result.rerun {
            let failed: Vec<&'static str> =
                result.failed_steps().iter().map(|s| s.as_str()).collect();
            details.insert("records_deleted".into(), result.records_deleted.into());
            details.insert("schema_dropped".into(), result.schema_dropped.clone().into());
            details.insert("archive_path".into(), result.archive_path.clone().into());
            details.insert("failed_steps".into(), serde_json::json!(failed));
        }

        self.chain
            .append_entry(tenant_id, AuditAction::DataErased, self.actor_id, details)
            .await?;
        Ok(())
    }
}
