//! In-memory implementations of every port, backed by `DashMap` and
//! `parking_lot` locks. Used by the test suites and the demo binary.
//!
//! Stores that front an external system carry a failure switch so tests can
//! exercise partial-failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use governance_core::{StoreError, Tenant, TenantStatus};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::lifecycle::TransitionAction;
use crate::ports::{
    CacheManager, DataExporter, ExportJob, ExportJobStatus, ExportStore, KeyManager, LedgerStore,
    Notifier, RetentionStore, SchemaManager, StoreResult, TenantDataStore, TenantStore,
};
use crate::retention::{DataCategory, ExpiredRecord, RetentionPolicy};

/// Failure switch shared by the fault-injectable stores.
#[derive(Debug, Default)]
struct FailSwitch(AtomicBool);

impl FailSwitch {
    fn set(&self, failing: bool) {
        self.0.store(failing, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> StoreResult<()> {
        if self.0.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("{operation}: injected failure")));
        }
        Ok(())
    }
}

// ─── Tenants ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    tenants: DashMap<Uuid, Tenant>,
    slugs: DashMap<String, Uuid>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn get(&self, tenant_id: Uuid) -> StoreResult<Option<Tenant>> {
        Ok(self.tenants.get(&tenant_id).map(|t| t.clone()))
    }

    async fn get_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>> {
        let Some(id) = self.slugs.get(slug).map(|id| *id) else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn insert(&self, tenant: Tenant) -> StoreResult<Tenant> {
        if self.tenants.contains_key(&tenant.id) {
            return Err(StoreError::Conflict(format!("tenant {} already exists", tenant.id)));
        }
        match self.slugs.entry(tenant.slug.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "slug {} already taken",
                tenant.slug
            ))),
            Entry::Vacant(slot) => {
                slot.insert(tenant.id);
                self.tenants.insert(tenant.id, tenant.clone());
                Ok(tenant)
            }
        }
    }

    async fn update(&self, tenant: Tenant) -> StoreResult<Tenant> {
        match self.tenants.get_mut(&tenant.id) {
            Some(mut existing) => {
                *existing = tenant.clone();
                Ok(tenant)
            }
            None => Err(StoreError::NotFound(format!("tenant {}", tenant.id))),
        }
    }

    async fn set_api_access(&self, tenant_id: Uuid, enabled: bool) -> StoreResult<()> {
        let mut tenant = self
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| StoreError::NotFound(format!("tenant {tenant_id}")))?;
        if tenant.api_access_enabled != enabled {
            tenant.api_access_enabled = enabled;
            tenant.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list(
        &self,
        offset: usize,
        limit: usize,
        status: Option<TenantStatus>,
    ) -> StoreResult<(Vec<Tenant>, usize)> {
        let mut matching: Vec<Tenant> = self
            .tenants
            .iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .map(|t| t.clone())
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let total = matching.len();
        let page = matching.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }
}

// ─── Schemas ────────────────────────────────────────────────────────────────

/// Tracks which schemas exist and how many times each was migrated.
#[derive(Debug, Default)]
pub struct InMemorySchemaManager {
    schemas: DashMap<String, u32>,
    fail_create: FailSwitch,
    fail_migrate: FailSwitch,
    fail_drop: FailSwitch,
}

impl InMemorySchemaManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_create(&self, failing: bool) {
        self.fail_create.set(failing);
    }

    pub fn set_fail_migrate(&self, failing: bool) {
        self.fail_migrate.set(failing);
    }

    pub fn set_fail_drop(&self, failing: bool) {
        self.fail_drop.set(failing);
    }

    pub fn migration_count(&self, schema_name: &str) -> u32 {
        self.schemas.get(schema_name).map(|m| *m).unwrap_or(0)
    }
}

#[async_trait]
impl SchemaManager for InMemorySchemaManager {
    async fn create_schema(&self, schema_name: &str) -> StoreResult<()> {
        self.fail_create.check("create_schema")?;
        self.schemas.entry(schema_name.to_string()).or_insert(0);
        Ok(())
    }

    async fn drop_schema(&self, schema_name: &str) -> StoreResult<()> {
        self.fail_drop.check("drop_schema")?;
        self.schemas.remove(schema_name);
        Ok(())
    }

    async fn run_migrations(&self, schema_name: &str) -> StoreResult<()> {
        self.fail_migrate.check("run_migrations")?;
        match self.schemas.get_mut(schema_name) {
            Some(mut count) => {
                *count += 1;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("schema {schema_name}"))),
        }
    }

    async fn schema_exists(&self, schema_name: &str) -> StoreResult<bool> {
        Ok(self.schemas.contains_key(schema_name))
    }
}

// ─── Caches ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryCacheManager {
    purges: DashMap<Uuid, u32>,
    fail: FailSwitch,
}

impl InMemoryCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.set(failing);
    }

    pub fn purge_count(&self, tenant_id: Uuid) -> u32 {
        self.purges.get(&tenant_id).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl CacheManager for InMemoryCacheManager {
    async fn purge_tenant(&self, tenant_id: Uuid) -> StoreResult<()> {
        self.fail.check("purge_tenant")?;
        *self.purges.entry(tenant_id).or_insert(0) += 1;
        Ok(())
    }
}

// ─── Exports ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryExportStore {
    jobs: DashMap<String, ExportJob>,
}

impl InMemoryExportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs_for(&self, tenant_id: Uuid) -> Vec<ExportJob> {
        self.jobs
            .iter()
            .filter(|j| j.tenant_id == tenant_id)
            .map(|j| j.clone())
            .collect()
    }
}

#[async_trait]
impl ExportStore for InMemoryExportStore {
    async fn save_job(&self, job: ExportJob) -> StoreResult<()> {
        self.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> StoreResult<Option<ExportJob>> {
        Ok(self.jobs.get(job_id).map(|j| j.clone()))
    }

    async fn update_job(
        &self,
        job_id: &str,
        status: ExportJobStatus,
        download_url: Option<String>,
        error: Option<String>,
    ) -> StoreResult<ExportJob> {
        let mut job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(format!("export job {job_id}")))?;
        job.status = status;
        if download_url.is_some() {
            job.download_url = download_url;
        }
        job.error = error;
        if matches!(status, ExportJobStatus::Completed | ExportJobStatus::Failed) {
            job.completed_at = Some(Utc::now());
        }
        Ok(job.clone())
    }
}

/// Pretends to write archives and hands back a `memory://` location.
#[derive(Debug, Default)]
pub struct InMemoryDataExporter {
    archives: DashMap<String, Uuid>,
    fail: FailSwitch,
}

impl InMemoryDataExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.set(failing);
    }

    pub fn archive_count(&self) -> usize {
        self.archives.len()
    }
}

#[async_trait]
impl DataExporter for InMemoryDataExporter {
    async fn export_archive(&self, tenant_id: Uuid, schema_name: &str) -> StoreResult<String> {
        self.fail.check("export_archive")?;
        let path = format!(
            "memory://exports/{tenant_id}/{schema_name}-{}.tar.gz",
            Utc::now().format("%Y%m%dT%H%M%S%6f")
        );
        self.archives.insert(path.clone(), tenant_id);
        Ok(path)
    }
}

// ─── Ledger ─────────────────────────────────────────────────────────────────

/// Append-only ledger. One mutex guards every chain so the tip check and the
/// push are a single critical section.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    chains: Mutex<HashMap<Uuid, Vec<AuditEntry>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored entry in place, bypassing the append path.
    /// Only tamper-detection tests have a reason to call this.
    pub fn overwrite_entry(&self, tenant_id: Uuid, index: usize, entry: AuditEntry) -> bool {
        let mut chains = self.chains.lock();
        match chains.get_mut(&tenant_id).and_then(|c| c.get_mut(index)) {
            Some(slot) => {
                *slot = entry;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append(&self, entry: AuditEntry) -> StoreResult<AuditEntry> {
        let mut chains = self.chains.lock();
        let chain = chains.entry(entry.tenant_id).or_default();
        let tip = chain.last().map(|e| e.entry_hash.as_str()).unwrap_or("");
        if entry.previous_hash != tip {
            return Err(StoreError::Conflict(format!(
                "chain tip moved for tenant {}",
                entry.tenant_id
            )));
        }
        chain.push(entry.clone());
        Ok(entry)
    }

    async fn latest(&self, tenant_id: Uuid) -> StoreResult<Option<AuditEntry>> {
        Ok(self
            .chains
            .lock()
            .get(&tenant_id)
            .and_then(|c| c.last().cloned()))
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        Ok(self.chains.lock().get(&tenant_id).cloned().unwrap_or_default())
    }
}

// ─── Retention ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredRecord {
    tenant_id: Uuid,
    category: DataCategory,
    record_id: String,
    created_at: DateTime<Utc>,
    soft_deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct InMemoryRetentionStore {
    policies: DashMap<Uuid, RetentionPolicy>,
    records: Mutex<Vec<StoredRecord>>,
}

impl InMemoryRetentionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a live tenant record created at `created_at`.
    pub fn seed_record(
        &self,
        tenant_id: Uuid,
        category: DataCategory,
        record_id: &str,
        created_at: DateTime<Utc>,
    ) {
        self.records.lock().push(StoredRecord {
            tenant_id,
            category,
            record_id: record_id.to_string(),
            created_at,
            soft_deleted_at: None,
        });
    }

    pub fn contains_record(&self, tenant_id: Uuid, record_id: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|r| r.tenant_id == tenant_id && r.record_id == record_id)
    }

    pub fn record_count(&self, tenant_id: Uuid) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .count()
    }
}

fn same_record(stored: &StoredRecord, record: &ExpiredRecord) -> bool {
    stored.tenant_id == record.tenant_id
        && stored.category == record.category
        && stored.record_id == record.record_id
}

#[async_trait]
impl RetentionStore for InMemoryRetentionStore {
    async fn get_policy(&self, tenant_id: Uuid) -> StoreResult<Option<RetentionPolicy>> {
        Ok(self.policies.get(&tenant_id).map(|p| p.clone()))
    }

    async fn save_policy(&self, policy: RetentionPolicy) -> StoreResult<RetentionPolicy> {
        self.policies.insert(policy.tenant_id, policy.clone());
        Ok(policy)
    }

    async fn find_expired(
        &self,
        tenant_id: Uuid,
        category: DataCategory,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<ExpiredRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.category == category)
            .filter(|r| r.created_at < cutoff)
            .map(|r| ExpiredRecord {
                tenant_id,
                table_name: category.table_name().to_string(),
                category,
                record_id: r.record_id.clone(),
                created_at: r.created_at,
                expired_at: cutoff,
                soft_deleted: r.soft_deleted_at.is_some(),
                soft_deleted_at: r.soft_deleted_at,
            })
            .collect())
    }

    async fn soft_delete(
        &self,
        records: &[ExpiredRecord],
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut stored = self.records.lock();
        let mut affected = 0;
        for row in stored.iter_mut().filter(|r| r.soft_deleted_at.is_none()) {
            if records.iter().any(|rec| same_record(row, rec)) {
                row.soft_deleted_at = Some(at);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn hard_delete(&self, records: &[ExpiredRecord]) -> StoreResult<usize> {
        let mut stored = self.records.lock();
        let before = stored.len();
        stored.retain(|row| !records.iter().any(|rec| same_record(row, rec)));
        Ok(before - stored.len())
    }
}

// ─── Tenant data, keys, notifications ───────────────────────────────────────

/// Row counts per tenant, standing in for every table a tenant owns.
#[derive(Debug, Default)]
pub struct InMemoryTenantDataStore {
    rows: DashMap<Uuid, u64>,
    fail: FailSwitch,
}

impl InMemoryTenantDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_rows(&self, tenant_id: Uuid, rows: u64) {
        *self.rows.entry(tenant_id).or_insert(0) += rows;
    }

    pub fn row_count(&self, tenant_id: Uuid) -> u64 {
        self.rows.get(&tenant_id).map(|r| *r).unwrap_or(0)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.set(failing);
    }
}

#[async_trait]
impl TenantDataStore for InMemoryTenantDataStore {
    async fn cascade_delete_all(&self, tenant_id: Uuid) -> StoreResult<u64> {
        self.fail.check("cascade_delete_all")?;
        Ok(self.rows.remove(&tenant_id).map(|(_, n)| n).unwrap_or(0))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryKeyManager {
    rotations: DashMap<Uuid, u32>,
    fail: FailSwitch,
}

impl InMemoryKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rotation_count(&self, tenant_id: Uuid) -> u32 {
        self.rotations.get(&tenant_id).map(|r| *r).unwrap_or(0)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.set(failing);
    }
}

#[async_trait]
impl KeyManager for InMemoryKeyManager {
    async fn rotate_tenant_key(&self, tenant_id: Uuid) -> StoreResult<()> {
        self.fail.check("rotate_tenant_key")?;
        *self.rotations.entry(tenant_id).or_insert(0) += 1;
        Ok(())
    }
}

/// Records every notification it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, TransitionAction)>>,
    fail: FailSwitch,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_to(&self, tenant_id: Uuid) -> Vec<TransitionAction> {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| *id == tenant_id)
            .map(|(_, action)| *action)
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.set(failing);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, tenant: &Tenant, action: TransitionAction) -> StoreResult<()> {
        self.fail.check("notify")?;
        self.sent.lock().push((tenant.id, action));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditDetails, SYSTEM_ACTOR};

    #[tokio::test]
    async fn test_tenant_slug_is_unique() {
        let store = InMemoryTenantStore::new();
        let a = Tenant::new("Acme".into(), "acme".into(), "a@acme.example".into()).unwrap();
        let b = Tenant::new("Acme 2".into(), "acme".into(), "b@acme.example".into()).unwrap();
        store.insert(a.clone()).await.unwrap();
        assert!(matches!(store.insert(b).await, Err(StoreError::Conflict(_))));
        assert_eq!(store.get_by_slug("acme").await.unwrap().unwrap().id, a.id);
    }

    #[tokio::test]
    async fn test_set_api_access_keeps_other_fields() {
        let store = InMemoryTenantStore::new();
        let mut tenant =
            Tenant::new("Acme".into(), "acme".into(), "a@acme.example".into()).unwrap();
        tenant.api_access_enabled = true;
        let stale = store.insert(tenant).await.unwrap();

        let mut moved = stale.clone();
        moved.status = TenantStatus::Deprovisioning;
        store.update(moved).await.unwrap();

        store.set_api_access(stale.id, false).await.unwrap();
        let stored = store.get(stale.id).await.unwrap().unwrap();
        assert!(!stored.api_access_enabled);
        assert_eq!(stored.status, TenantStatus::Deprovisioning);

        assert!(matches!(
            store.set_api_access(Uuid::new_v4(), false).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tenant_list_paginates_and_filters() {
        let store = InMemoryTenantStore::new();
        for i in 0..5 {
            let mut t =
                Tenant::new(format!("T{i}"), format!("t{i}"), "ops@example.com".into()).unwrap();
            if i % 2 == 0 {
                t.status = TenantStatus::Active;
            }
            store.insert(t).await.unwrap();
        }
        let (page, total) = store.list(0, 2, None).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        let (active, total) = store.list(0, 10, Some(TenantStatus::Active)).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(active.len(), 3);
    }

    #[tokio::test]
    async fn test_ledger_rejects_stale_tip() {
        let ledger = InMemoryLedgerStore::new();
        let tenant = Uuid::new_v4();
        let first = AuditEntry::new(
            tenant,
            AuditAction::TenantCreated,
            SYSTEM_ACTOR,
            AuditDetails::new(),
            String::new(),
        );
        ledger.append(first).await.unwrap();

        let stale = AuditEntry::new(
            tenant,
            AuditAction::TenantUpdated,
            SYSTEM_ACTOR,
            AuditDetails::new(),
            String::new(),
        );
        assert!(matches!(ledger.append(stale).await, Err(StoreError::Conflict(_))));
        assert_eq!(ledger.list_by_tenant(tenant).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cascade_delete_is_repeatable() {
        let data = InMemoryTenantDataStore::new();
        let tenant = Uuid::new_v4();
        data.seed_rows(tenant, 42);
        assert_eq!(data.cascade_delete_all(tenant).await.unwrap(), 42);
        assert_eq!(data.cascade_delete_all(tenant).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fail_switch() {
        let schemas = InMemorySchemaManager::new();
        schemas.set_fail_create(true);
        assert!(matches!(
            schemas.create_schema("tenant_x").await,
            Err(StoreError::Backend(_))
        ));
        schemas.set_fail_create(false);
        schemas.create_schema("tenant_x").await.unwrap();
        assert!(schemas.schema_exists("tenant_x").await.unwrap());
        // Dropping a missing schema is not an error.
        schemas.drop_schema("tenant_missing").await.unwrap();
    }
}
