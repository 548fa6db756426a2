//! Ports the governance core depends on. Each trait has one in-memory
//! implementation in [`crate::memory`]; production backends live elsewhere.
//!
//! All implementations must be `Send + Sync` so they can sit behind an `Arc`
//! in [`crate::context::GovernanceContext`] and be shared across tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governance_core::{StoreError, Tenant, TenantStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::lifecycle::TransitionAction;
use crate::retention::{DataCategory, ExpiredRecord, RetentionPolicy};

pub type StoreResult<T> = Result<T, StoreError>;

/// Tenant persistence.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get(&self, tenant_id: Uuid) -> StoreResult<Option<Tenant>>;

    async fn get_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>>;

    /// Returns `StoreError::Conflict` if the id or slug is taken.
    async fn insert(&self, tenant: Tenant) -> StoreResult<Tenant>;

    /// Returns `StoreError::NotFound` if the tenant does not exist.
    async fn update(&self, tenant: Tenant) -> StoreResult<Tenant>;

    /// Set only the API access flag, leaving every other field as stored.
    /// Returns `StoreError::NotFound` if the tenant does not exist.
    async fn set_api_access(&self, tenant_id: Uuid, enabled: bool) -> StoreResult<()>;

    /// Page of tenants ordered by creation time, plus the unpaged total.
    async fn list(
        &self,
        offset: usize,
        limit: usize,
        status: Option<TenantStatus>,
    ) -> StoreResult<(Vec<Tenant>, usize)>;
}

/// Schema-per-tenant DDL. Every call is idempotent from the core's
/// perspective: creating an existing schema or dropping a missing one must
/// not be treated as fatal by callers that retry.
#[async_trait]
pub trait SchemaManager: Send + Sync {
    async fn create_schema(&self, schema_name: &str) -> StoreResult<()>;

    async fn drop_schema(&self, schema_name: &str) -> StoreResult<()>;

    async fn run_migrations(&self, schema_name: &str) -> StoreResult<()>;

    async fn schema_exists(&self, schema_name: &str) -> StoreResult<bool>;
}

/// Tenant cache invalidation.
#[async_trait]
pub trait CacheManager: Send + Sync {
    async fn purge_tenant(&self, tenant_id: Uuid) -> StoreResult<()>;
}

/// Status of an asynchronous data-export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportJobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub job_id: String,
    pub tenant_id: Uuid,
    pub status: ExportJobStatus,
    pub download_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportJob {
    pub fn queued(tenant_id: Uuid) -> Self {
        Self {
            job_id: Uuid::new_v4().simple().to_string(),
            tenant_id,
            status: ExportJobStatus::Queued,
            download_url: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Export-job tracking.
#[async_trait]
pub trait ExportStore: Send + Sync {
    async fn save_job(&self, job: ExportJob) -> StoreResult<()>;

    async fn get_job(&self, job_id: &str) -> StoreResult<Option<ExportJob>>;

    async fn update_job(
        &self,
        job_id: &str,
        status: ExportJobStatus,
        download_url: Option<String>,
        error: Option<String>,
    ) -> StoreResult<ExportJob>;
}

/// Produces a portable archive of everything in a tenant schema.
#[async_trait]
pub trait DataExporter: Send + Sync {
    /// Returns the archive location.
    async fn export_archive(&self, tenant_id: Uuid, schema_name: &str) -> StoreResult<String>;
}

/// Append-only audit ledger, partitioned by tenant.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist `entry` as the new tip of its tenant's chain.
    ///
    /// Implementations must reject the write with `StoreError::Conflict` when
    /// `entry.previous_hash` is not the current tip hash ("" for an empty
    /// chain); this is the storage-level compare-and-append.
    async fn append(&self, entry: AuditEntry) -> StoreResult<AuditEntry>;

    async fn latest(&self, tenant_id: Uuid) -> StoreResult<Option<AuditEntry>>;

    /// Every entry for the tenant in append order.
    async fn list_by_tenant(&self, tenant_id: Uuid) -> StoreResult<Vec<AuditEntry>>;
}

/// Retention policy persistence and record-level deletion.
#[async_trait]
pub trait RetentionStore: Send + Sync {
    async fn get_policy(&self, tenant_id: Uuid) -> StoreResult<Option<RetentionPolicy>>;

    async fn save_policy(&self, policy: RetentionPolicy) -> StoreResult<RetentionPolicy>;

    /// Records in `category` created before `cutoff` that are not yet
    /// hard-deleted (soft-deleted ones included, with their flags set).
    async fn find_expired(
        &self,
        tenant_id: Uuid,
        category: DataCategory,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<ExpiredRecord>>;

    /// Mark records soft-deleted at `at`. Returns affected rows.
    async fn soft_delete(&self, records: &[ExpiredRecord], at: DateTime<Utc>) -> StoreResult<usize>;

    /// Permanently remove records. Returns affected rows.
    async fn hard_delete(&self, records: &[ExpiredRecord]) -> StoreResult<usize>;
}

/// Bulk tenant data removal.
#[async_trait]
pub trait TenantDataStore: Send + Sync {
    /// Delete every row the tenant owns. Returns the number removed; zero on
    /// a repeat call.
    async fn cascade_delete_all(&self, tenant_id: Uuid) -> StoreResult<u64>;
}

/// Encryption key custody.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Rotate (or destroy) the tenant's data key so residual ciphertext is
    /// unreadable.
    async fn rotate_tenant_key(&self, tenant_id: Uuid) -> StoreResult<()>;
}

/// Outbound tenant notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, tenant: &Tenant, action: TransitionAction) -> StoreResult<()>;
}
