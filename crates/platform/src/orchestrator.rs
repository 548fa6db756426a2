//! Governance orchestrator: the entry point for every tenant lifecycle and
//! compliance operation.
//!
//! Each status change is validated against the lifecycle table, persisted,
//! has its side-effect actions dispatched, and is recorded in the tenant's
//! audit chain. Status read-modify-write is serialized per tenant.

use std::sync::Arc;

use chrono::Utc;
use governance_core::{
    GovernanceError, GovernanceResult, QuotaResource, StoreError, Tenant, TenantSettings,
    TenantStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{
    AuditAction, AuditChain, AuditDetails, AuditEntry, ChainVerification, SYSTEM_ACTOR,
};
use crate::context::GovernanceContext;
use crate::erasure::{
    ErasurePipeline, ErasureResult, ErasureStep, PlatformErasureBackend, StepResult,
};
use crate::lifecycle::{transition_actions, validate_transition, TransitionAction};
use crate::locks::TenantLocks;
use crate::ports::ExportJob;
use crate::retention::{CleanupResult, RetentionEngine, RetentionPolicy};

const MAX_PAGE_SIZE: usize = 100;

/// Fields a caller may change on an existing tenant.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub settings: Option<TenantSettings>,
}

/// One page of a listing. `page` is 1-based.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub size: usize,
}

impl<T> Page<T> {
    pub fn pages(&self) -> usize {
        if self.size == 0 {
            return 0;
        }
        self.total.div_ceil(self.size)
    }
}

pub struct GovernanceOrchestrator {
    ctx: GovernanceContext,
    chain: Arc<AuditChain>,
    retention: RetentionEngine,
    status_locks: TenantLocks,
}

impl GovernanceOrchestrator {
    pub fn new(ctx: GovernanceContext) -> Self {
        let chain = Arc::new(AuditChain::new(ctx.ledger.clone()));
        let retention = RetentionEngine::new(ctx.retention.clone());
        Self {
            ctx,
            chain,
            retention,
            status_locks: TenantLocks::new(),
        }
    }

    pub fn context(&self) -> &GovernanceContext {
        &self.ctx
    }

    pub fn chain(&self) -> &Arc<AuditChain> {
        &self.chain
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Register a tenant and provision it through to `Active`.
    ///
    /// If provisioning fails the tenant is moved to `Deleted` on a best-effort
    /// basis and the provisioning error is returned.
    pub async fn create_tenant(
        &self,
        name: String,
        slug: String,
        owner_email: String,
        settings: Option<TenantSettings>,
        actor_id: Uuid,
    ) -> GovernanceResult<Tenant> {
        let tenant = self
            .register_tenant(name, slug, owner_email, settings)
            .await?;

        match self.provision_tenant(tenant.id, actor_id).await {
            Ok(tenant) => Ok(tenant),
            Err(e) => {
                error!(tenant_id = %tenant.id, error = %e, "Provisioning failed, rolling back");
                if let Err(rollback) = self.fail_provisioning(tenant.id).await {
                    warn!(
                        tenant_id = %tenant.id,
                        error = %rollback,
                        "Failed to mark tenant as deleted after provisioning failure"
                    );
                }
                Err(e)
            }
        }
    }

    /// Persist a new tenant in `Pending` without provisioning it.
    pub async fn register_tenant(
        &self,
        name: String,
        slug: String,
        owner_email: String,
        settings: Option<TenantSettings>,
    ) -> GovernanceResult<Tenant> {
        let mut tenant = Tenant::new(name, slug, owner_email)?;
        if let Some(settings) = settings {
            tenant.settings = settings;
        }

        if self.ctx.tenants.get_by_slug(&tenant.slug).await?.is_some() {
            return Err(GovernanceError::TenantAlreadyExists {
                identifier: tenant.slug,
            });
        }
        let slug = tenant.slug.clone();
        let tenant = self.ctx.tenants.insert(tenant).await.map_err(|e| match e {
            StoreError::Conflict(_) => {
                GovernanceError::TenantAlreadyExists { identifier: slug }
            }
            other => other.into(),
        })?;

        info!(tenant_id = %tenant.id, slug = %tenant.slug, "Tenant registered in PENDING state");
        Ok(tenant)
    }

    /// Drive a tenant from `Pending` (or a half-finished `Provisioning`) to
    /// `Active`. Safe to call again after a failure while the tenant is still
    /// `Provisioning`.
    pub async fn provision_tenant(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
    ) -> GovernanceResult<Tenant> {
        let _guard = self.status_locks.acquire(tenant_id).await;
        let mut tenant = self.load(tenant_id).await?;

        match tenant.status {
            TenantStatus::Pending => {
                self.apply_transition(&mut tenant, TenantStatus::Provisioning)
                    .await?;
            }
            TenantStatus::Provisioning => {
                info!(tenant_id = %tenant_id, "Resuming interrupted provisioning");
                let actions = transition_actions(TenantStatus::Pending, TenantStatus::Provisioning);
                self.run_required_actions(&mut tenant, actions).await?;
                tenant = self.ctx.tenants.update(tenant).await?;
            }
            current => {
                return Err(GovernanceError::InvalidStateTransition {
                    current,
                    new: TenantStatus::Provisioning,
                })
            }
        }

        self.apply_transition(&mut tenant, TenantStatus::Active).await?;

        self.audit(
            tenant_id,
            AuditAction::TenantCreated,
            actor_id,
            details([
                ("slug", tenant.slug.clone().into()),
                ("owner_email", tenant.owner_email.clone().into()),
                ("schema_name", tenant.schema_name.clone().into()),
            ]),
        )
        .await?;
        Ok(tenant)
    }

    /// Move a tenant whose provisioning failed to `Deleted`.
    ///
    /// Cleanup of the partially created schema is best-effort: the tenant is
    /// marked `Deleted` even if the drop fails, so a broken tenant never stays
    /// in `Provisioning`. A leftover schema is logged for manual removal.
    pub async fn fail_provisioning(&self, tenant_id: Uuid) -> GovernanceResult<Tenant> {
        let _guard = self.status_locks.acquire(tenant_id).await;
        let mut tenant = self.load(tenant_id).await?;
        let current = tenant.status;
        if !matches!(current, TenantStatus::Pending | TenantStatus::Provisioning) {
            return Err(GovernanceError::InvalidStateTransition {
                current,
                new: TenantStatus::Deleted,
            });
        }

        let actions = transition_actions(current, TenantStatus::Deleted);
        if let Err(e) = self.run_required_actions(&mut tenant, actions).await {
            metrics::counter!("governance.rollback.cleanup_failures").increment(1);
            warn!(
                tenant_id = %tenant_id,
                schema = %tenant.schema_name,
                error = %e,
                "Partial schema cleanup failed; schema may need manual removal"
            );
        }
        self.set_status(&mut tenant, TenantStatus::Deleted).await?;
        self.send_notifications(&tenant, actions).await;
        Ok(tenant)
    }

    pub async fn suspend_tenant(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
    ) -> GovernanceResult<Tenant> {
        self.transition_and_audit(
            tenant_id,
            TenantStatus::Suspended,
            AuditAction::TenantUpdated,
            actor_id,
            "suspend",
        )
        .await
    }

    pub async fn activate_tenant(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
    ) -> GovernanceResult<Tenant> {
        self.transition_and_audit(
            tenant_id,
            TenantStatus::Active,
            AuditAction::TenantUpdated,
            actor_id,
            "activate",
        )
        .await
    }

    /// Start deprovisioning. Data export is queued; the tenant is deleted
    /// later by [`complete_deprovisioning`](Self::complete_deprovisioning).
    pub async fn deprovision_tenant(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
    ) -> GovernanceResult<Tenant> {
        self.transition_and_audit(
            tenant_id,
            TenantStatus::Deprovisioning,
            AuditAction::TenantDeleted,
            actor_id,
            "deprovision_started",
        )
        .await
    }

    /// Drop the schema, purge tenant data and mark the tenant `Deleted`.
    pub async fn complete_deprovisioning(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
    ) -> GovernanceResult<Tenant> {
        self.transition_and_audit(
            tenant_id,
            TenantStatus::Deleted,
            AuditAction::TenantDeleted,
            actor_id,
            "deprovision_completed",
        )
        .await
    }

    // ─── Compliance ─────────────────────────────────────────────────────

    /// Run the right-to-erasure pipeline for a tenant.
    ///
    /// An active tenant is suspended first. When every step succeeds the
    /// tenant is walked to `Deleted`; otherwise it stays where it is so the
    /// erasure can be run again.
    pub async fn execute_erasure(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
    ) -> GovernanceResult<ErasureResult> {
        let _guard = self.status_locks.acquire(tenant_id).await;
        let mut tenant = self.load(tenant_id).await?;

        if tenant.status.is_terminal() {
            return Err(GovernanceError::InvalidStateTransition {
                current: tenant.status,
                new: TenantStatus::Deleted,
            });
        }
        if tenant.status == TenantStatus::Active {
            self.set_status(&mut tenant, TenantStatus::Suspended).await?;
        }

        let result = self.erasure_pipeline(actor_id).execute(tenant_id).await;

        if !result.success {
            warn!(
                tenant_id = %tenant_id,
                failed_steps = ?result.failed_steps(),
                status = %tenant.status,
                "Erasure incomplete; tenant left in place for retry"
            );
            return Ok(result);
        }

        // The freeze step rewrote the tenant record.
        let mut tenant = self.load(tenant_id).await?;
        for next in [TenantStatus::Deprovisioning, TenantStatus::Deleted] {
            if validate_transition(tenant.status, next) {
                self.set_status(&mut tenant, next).await?;
            }
        }
        info!(tenant_id = %tenant_id, status = %tenant.status, "Erasure completed");
        Ok(result)
    }

    /// Re-run one erasure step after a partial failure, under the tenant's
    /// status lock. The tenant must already be frozen by an earlier
    /// [`execute_erasure`](Self::execute_erasure); its status is left as is,
    /// and a later full run walks it to `Deleted`.
    pub async fn rerun_erasure_step(
        &self,
        tenant_id: Uuid,
        step: ErasureStep,
        actor_id: Uuid,
    ) -> GovernanceResult<StepResult> {
        let _guard = self.status_locks.acquire(tenant_id).await;
        let tenant = self.load(tenant_id).await?;
        match tenant.status {
            TenantStatus::Suspended | TenantStatus::Deprovisioning => {}
            TenantStatus::Deleted => {
                return Err(GovernanceError::InvalidStateTransition {
                    current: tenant.status,
                    new: TenantStatus::Deleted,
                })
            }
            current => {
                return Err(GovernanceError::InvalidInput(format!(
                    "cannot re-run erasure step {step} for tenant in {current} state"
                )))
            }
        }

        let result = self.erasure_pipeline(actor_id).run_step(step, tenant_id).await;
        info!(
            tenant_id = %tenant_id,
            step = %step,
            success = result.success,
            "Erasure step re-run"
        );
        Ok(result)
    }

    /// Soft-delete expired records and hard-delete those past their grace
    /// period. Writes an audit entry only if something was deleted.
    pub async fn run_retention_cleanup(
        &self,
        tenant_id: Uuid,
    ) -> GovernanceResult<CleanupResult> {
        self.load(tenant_id).await?;
        let policy = self.get_retention_policy(tenant_id).await?;

        let mut records = self
            .retention
            .scan_expired_records(tenant_id, &policy)
            .await?;
        let soft_deleted = self.retention.soft_delete_records(&mut records).await?;
        let hard_deleted = self
            .retention
            .hard_delete_records(&records, &policy)
            .await?;

        let result = CleanupResult {
            tenant_id,
            records_scanned: records.len(),
            records_soft_deleted: soft_deleted,
            records_hard_deleted: hard_deleted,
            completed_at: Utc::now(),
        };

        if result.deleted_anything() {
            self.audit(
                tenant_id,
                AuditAction::RetentionExecuted,
                SYSTEM_ACTOR,
                details([
                    ("records_scanned", result.records_scanned.into()),
                    ("soft_deleted", soft_deleted.into()),
                    ("hard_deleted", hard_deleted.into()),
                    ("grace_period_days", policy.grace_period_days.into()),
                ]),
            )
            .await?;
        }

        info!(
            tenant_id = %tenant_id,
            soft_deleted,
            hard_deleted,
            "Retention cleanup finished"
        );
        Ok(result)
    }

    /// The tenant's retention policy, created with configured defaults on
    /// first access.
    pub async fn get_retention_policy(
        &self,
        tenant_id: Uuid,
    ) -> GovernanceResult<RetentionPolicy> {
        self.load(tenant_id).await?;
        if let Some(policy) = self.ctx.retention.get_policy(tenant_id).await? {
            return Ok(policy);
        }
        let policy = RetentionPolicy::with_defaults(tenant_id, &self.ctx.config.retention);
        Ok(self.ctx.retention.save_policy(policy).await?)
    }

    pub async fn update_retention_policy(
        &self,
        tenant_id: Uuid,
        mut policy: RetentionPolicy,
        actor_id: Uuid,
    ) -> GovernanceResult<RetentionPolicy> {
        self.load(tenant_id).await?;
        policy.validate()?;
        policy.tenant_id = tenant_id;
        policy.updated_at = Utc::now();
        let saved = self.ctx.retention.save_policy(policy).await?;

        self.audit(
            tenant_id,
            AuditAction::TenantUpdated,
            actor_id,
            details([
                ("event", "retention_policy_updated".into()),
                ("transactional_data_days", saved.transactional_data_days.into()),
                ("log_data_days", saved.log_data_days.into()),
                ("user_activity_days", saved.user_activity_days.into()),
                ("uploaded_files_days", saved.uploaded_files_days.into()),
                ("grace_period_days", saved.grace_period_days.into()),
                ("auto_cleanup_enabled", saved.auto_cleanup_enabled.into()),
            ]),
        )
        .await?;
        Ok(saved)
    }

    /// Queue a data export for the tenant. The returned job is processed by
    /// [`crate::jobs::process_export_job`].
    pub async fn request_data_export(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
    ) -> GovernanceResult<ExportJob> {
        self.load(tenant_id).await?;
        let job = self.queue_export(tenant_id).await?;
        self.audit(
            tenant_id,
            AuditAction::DataExported,
            actor_id,
            details([
                ("job_id", job.job_id.clone().into()),
                ("status", "QUEUED".into()),
            ]),
        )
        .await?;
        info!(tenant_id = %tenant_id, job_id = %job.job_id, "Data export queued");
        Ok(job)
    }

    pub async fn get_export_status(&self, job_id: &str) -> GovernanceResult<ExportJob> {
        self.ctx
            .exports
            .get_job(job_id)
            .await?
            .ok_or_else(|| {
                GovernanceError::InvalidInput(format!("Export job not found: {job_id}"))
            })
    }

    pub async fn verify_chain(&self, tenant_id: Uuid) -> GovernanceResult<ChainVerification> {
        Ok(self.chain.verify_chain_integrity(tenant_id).await?)
    }

    // ─── Tenant administration ──────────────────────────────────────────

    pub async fn get_tenant(&self, tenant_id: Uuid) -> GovernanceResult<Tenant> {
        self.load(tenant_id).await
    }

    pub async fn list_tenants(
        &self,
        page: usize,
        size: usize,
        status: Option<TenantStatus>,
    ) -> GovernanceResult<Page<Tenant>> {
        if page == 0 || size == 0 || size > MAX_PAGE_SIZE {
            return Err(GovernanceError::InvalidInput(format!(
                "page must be >= 1 and size within 1..={MAX_PAGE_SIZE}"
            )));
        }
        let (items, total) = self
            .ctx
            .tenants
            .list((page - 1) * size, size, status)
            .await?;
        Ok(Page {
            items,
            total,
            page,
            size,
        })
    }

    pub async fn update_tenant(
        &self,
        tenant_id: Uuid,
        update: TenantUpdate,
        actor_id: Uuid,
    ) -> GovernanceResult<Tenant> {
        let _guard = self.status_locks.acquire(tenant_id).await;
        let mut tenant = self.load(tenant_id).await?;
        if tenant.status.is_terminal() {
            return Err(GovernanceError::InvalidInput(format!(
                "tenant {tenant_id} is deleted"
            )));
        }

        let mut updated_fields: Vec<&'static str> = Vec::new();
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(GovernanceError::InvalidInput("tenant name must not be empty".into()));
            }
            tenant.name = name;
            updated_fields.push("name");
        }
        if let Some(settings) = update.settings {
            tenant.settings = settings;
            updated_fields.push("settings");
        }
        if updated_fields.is_empty() {
            return Ok(tenant);
        }

        tenant.updated_at = Utc::now();
        let tenant = self.ctx.tenants.update(tenant).await?;
        self.audit(
            tenant_id,
            AuditAction::TenantUpdated,
            actor_id,
            details([("updated_fields", serde_json::json!(updated_fields))]),
        )
        .await?;
        Ok(tenant)
    }

    /// Apply pending migrations to the tenant's schema.
    pub async fn run_schema_migrations(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
    ) -> GovernanceResult<Tenant> {
        let _guard = self.status_locks.acquire(tenant_id).await;
        let tenant = self.load(tenant_id).await?;
        if !matches!(tenant.status, TenantStatus::Active | TenantStatus::Suspended) {
            return Err(GovernanceError::InvalidInput(format!(
                "cannot migrate schema of tenant in {} state",
                tenant.status
            )));
        }

        self.ctx
            .bounded("run_migrations", self.ctx.schemas.run_migrations(&tenant.schema_name))
            .await?;

        self.audit(
            tenant_id,
            AuditAction::SchemaMigrated,
            actor_id,
            details([("schema_name", tenant.schema_name.clone().into())]),
        )
        .await?;
        info!(tenant_id = %tenant_id, schema = %tenant.schema_name, "Tenant schema migrated");
        Ok(tenant)
    }

    pub async fn record_login(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> GovernanceResult<AuditEntry> {
        self.load(tenant_id).await?;
        self.audit(
            tenant_id,
            AuditAction::UserLogin,
            user_id,
            details([("user_id", user_id.to_string().into())]),
        )
        .await
    }

    pub async fn record_data_access(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
        resource: &str,
    ) -> GovernanceResult<AuditEntry> {
        self.load(tenant_id).await?;
        self.audit(
            tenant_id,
            AuditAction::DataAccessed,
            actor_id,
            details([("resource", resource.into())]),
        )
        .await
    }

    /// Record a cost anomaly flagged by the billing side. The statistics are
    /// computed elsewhere and passed through as `details`.
    pub async fn record_cost_anomaly(
        &self,
        tenant_id: Uuid,
        details: AuditDetails,
    ) -> GovernanceResult<AuditEntry> {
        self.load(tenant_id).await?;
        warn!(tenant_id = %tenant_id, "Cost anomaly detected");
        self.audit(tenant_id, AuditAction::CostAnomalyDetected, SYSTEM_ACTOR, details)
            .await
    }

    /// Reject usage at or above the tenant's configured limit.
    pub async fn check_quota(
        &self,
        tenant_id: Uuid,
        resource: QuotaResource,
        current_usage: u64,
    ) -> GovernanceResult<()> {
        let tenant = self.load(tenant_id).await?;
        let limit = tenant.settings.limit_for(resource);
        if current_usage >= limit {
            return Err(GovernanceError::TenantQuotaExceeded {
                tenant_id,
                resource: resource.to_string(),
                limit,
            });
        }
        Ok(())
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn erasure_pipeline(&self, actor_id: Uuid) -> ErasurePipeline {
        let backend = PlatformErasureBackend::new(self.ctx.clone(), self.chain.clone())
            .with_actor(actor_id);
        ErasurePipeline::new(Arc::new(backend), self.ctx.external_call_timeout())
    }

    async fn load(&self, tenant_id: Uuid) -> GovernanceResult<Tenant> {
        self.ctx
            .tenants
            .get(tenant_id)
            .await?
            .ok_or(GovernanceError::TenantNotFound { tenant_id })
    }

    async fn audit(
        &self,
        tenant_id: Uuid,
        action: AuditAction,
        actor_id: Uuid,
        details: AuditDetails,
    ) -> GovernanceResult<AuditEntry> {
        Ok(self
            .chain
            .append_entry(tenant_id, action, actor_id, details)
            .await?)
    }

    async fn transition_and_audit(
        &self,
        tenant_id: Uuid,
        new: TenantStatus,
        action: AuditAction,
        actor_id: Uuid,
        label: &str,
    ) -> GovernanceResult<Tenant> {
        let _guard = self.status_locks.acquire(tenant_id).await;
        let mut tenant = self.load(tenant_id).await?;
        let previous = tenant.status;

        self.apply_transition(&mut tenant, new).await?;

        self.audit(
            tenant_id,
            action,
            actor_id,
            details([
                ("action", label.into()),
                ("previous_status", previous.as_str().into()),
                ("new_status", new.as_str().into()),
            ]),
        )
        .await?;
        Ok(tenant)
    }

    /// Validate, dispatch and persist one lifecycle transition. Callers hold
    /// the tenant's status lock.
    ///
    /// Required actions run before the new status is stored, so a failure
    /// leaves the tenant in its previous state and the call can be repeated.
    /// `Provisioning` is the exception: it is stored first so that a failed
    /// provisioning is visible to the rollback.
    async fn apply_transition(
        &self,
        tenant: &mut Tenant,
        new: TenantStatus,
    ) -> GovernanceResult<()> {
        let current = tenant.status;
        if !validate_transition(current, new) {
            return Err(GovernanceError::InvalidStateTransition { current, new });
        }
        let actions = transition_actions(current, new);

        if new == TenantStatus::Provisioning {
            tenant.status = new;
            tenant.updated_at = Utc::now();
            *tenant = self.ctx.tenants.update(tenant.clone()).await?;
        }

        self.run_required_actions(tenant, actions).await?;

        tenant.status = new;
        tenant.updated_at = Utc::now();
        *tenant = self.ctx.tenants.update(tenant.clone()).await?;

        metrics::counter!(
            "governance.transitions",
            "from" => current.as_str(),
            "to" => new.as_str()
        )
        .increment(1);
        info!(
            tenant_id = %tenant.id,
            from = %current,
            to = %new,
            "Tenant status changed"
        );

        self.send_notifications(tenant, actions).await;
        Ok(())
    }

    /// Persist a validated status change without dispatching its actions.
    /// Used by erasure, whose pipeline performs the side effects itself.
    async fn set_status(&self, tenant: &mut Tenant, new: TenantStatus) -> GovernanceResult<()> {
        let current = tenant.status;
        if !validate_transition(current, new) {
            return Err(GovernanceError::InvalidStateTransition { current, new });
        }
        tenant.status = new;
        tenant.updated_at = Utc::now();
        *tenant = self.ctx.tenants.update(tenant.clone()).await?;

        metrics::counter!(
            "governance.transitions",
            "from" => current.as_str(),
            "to" => new.as_str()
        )
        .increment(1);
        info!(tenant_id = %tenant.id, from = %current, to = %new, "Tenant status changed");
        Ok(())
    }

    /// Run every non-notification action in order, stopping at the first
    /// failure. Access toggles and defaults are applied to `tenant` in place.
    async fn run_required_actions(
        &self,
        tenant: &mut Tenant,
        actions: &[TransitionAction],
    ) -> GovernanceResult<()> {
        for &action in actions.iter().filter(|a| !a.is_notification()) {
            match action {
                TransitionAction::CreateSchema => {
                    self.ctx
                        .bounded(
                            "create_schema",
                            self.ctx.schemas.create_schema(&tenant.schema_name),
                        )
                        .await
                        .map_err(|e| GovernanceError::SchemaCreationFailed {
                            schema_name: tenant.schema_name.clone(),
                            reason: e.to_string(),
                        })?;
                }
                TransitionAction::ActivateSchema => {
                    self.ctx
                        .bounded(
                            "run_migrations",
                            self.ctx.schemas.run_migrations(&tenant.schema_name),
                        )
                        .await
                        .map_err(|e| GovernanceError::SchemaCreationFailed {
                            schema_name: tenant.schema_name.clone(),
                            reason: e.to_string(),
                        })?;
                }
                TransitionAction::InitializeDefaultSettings => {
                    if self.ctx.retention.get_policy(tenant.id).await?.is_none() {
                        let policy =
                            RetentionPolicy::with_defaults(tenant.id, &self.ctx.config.retention);
                        self.ctx.retention.save_policy(policy).await?;
                    }
                }
                TransitionAction::EnableApiAccess => tenant.api_access_enabled = true,
                TransitionAction::DisableApiAccess => tenant.api_access_enabled = false,
                TransitionAction::CleanupPartialSchema | TransitionAction::DeleteSchema => {
                    self.drop_schema_if_exists(&tenant.schema_name).await?;
                }
                TransitionAction::ScheduleDataExport => {
                    let job = self.queue_export(tenant.id).await?;
                    info!(
                        tenant_id = %tenant.id,
                        job_id = %job.job_id,
                        "Final data export scheduled"
                    );
                }
                TransitionAction::PurgeTenantData => {
                    let deleted = self
                        .ctx
                        .bounded(
                            "cascade_delete_all",
                            self.ctx.tenant_data.cascade_delete_all(tenant.id),
                        )
                        .await?;
                    self.ctx
                        .bounded("purge_tenant", self.ctx.caches.purge_tenant(tenant.id))
                        .await?;
                    info!(tenant_id = %tenant.id, records_deleted = deleted, "Tenant data purged");
                }
                notification => {
                    debug_assert!(notification.is_notification());
                }
            }
        }
        Ok(())
    }

    /// Deliver notifications best-effort; failures are logged only.
    async fn send_notifications(&self, tenant: &Tenant, actions: &[TransitionAction]) {
        for &action in actions.iter().filter(|a| a.is_notification()) {
            if let Err(e) = self.ctx.notifier.notify(tenant, action).await {
                warn!(
                    tenant_id = %tenant.id,
                    notification = %action,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        }
    }

    async fn drop_schema_if_exists(&self, schema_name: &str) -> GovernanceResult<()> {
        let exists = self
            .ctx
            .bounded("schema_exists", self.ctx.schemas.schema_exists(schema_name))
            .await?;
        if exists {
            self.ctx
                .bounded("drop_schema", self.ctx.schemas.drop_schema(schema_name))
                .await?;
        }
        Ok(())
    }

    async fn queue_export(&self, tenant_id: Uuid) -> GovernanceResult<ExportJob> {
        let job = ExportJob::queued(tenant_id);
        self.ctx.exports.save_job(job.clone()).await?;
        Ok(job)
    }
}

/// Reject a caller scoped to one tenant touching another tenant's data.
pub fn ensure_tenant_scope(caller_tenant: Uuid, target_tenant: Uuid) -> GovernanceResult<()> {
    if caller_tenant != target_tenant {
        warn!(
            source_tenant = %caller_tenant,
            target_tenant = %target_tenant,
            "Cross-tenant access denied"
        );
        return Err(GovernanceError::CrossTenantAccessDenied {
            source_tenant: caller_tenant,
            target_tenant,
        });
    }
    Ok(())
}

fn details<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> AuditDetails {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
