//! Data retention: per-category retention windows, expired-record scanning,
//! soft deletion, and hard deletion once the grace period has elapsed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use governance_core::config::RetentionDefaults;
use governance_core::{GovernanceError, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::ports::RetentionStore;

/// Classes of tenant data with independent retention windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Transactional,
    Log,
    UserActivity,
    UploadedFile,
}

impl DataCategory {
    pub const ALL: [DataCategory; 4] = [
        Self::Transactional,
        Self::Log,
        Self::UserActivity,
        Self::UploadedFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactional => "transactional",
            Self::Log => "log",
            Self::UserActivity => "user_activity",
            Self::UploadedFile => "uploaded_file",
        }
    }

    /// Table holding records of this category inside a tenant schema.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Transactional => "transactions",
            Self::Log => "activity_logs",
            Self::UserActivity => "user_sessions",
            Self::UploadedFile => "uploaded_files",
        }
    }
}

impl std::fmt::Display for DataCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tenant's retention windows, in days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub tenant_id: Uuid,
    pub transactional_data_days: u32,
    pub log_data_days: u32,
    pub user_activity_days: u32,
    pub uploaded_files_days: u32,
    /// Time a soft-deleted record stays recoverable before hard deletion.
    pub grace_period_days: u32,
    /// Whether the fleet sweep processes this tenant.
    pub auto_cleanup_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl RetentionPolicy {
    pub fn with_defaults(tenant_id: Uuid, defaults: &RetentionDefaults) -> Self {
        Self {
            tenant_id,
            transactional_data_days: defaults.transactional_data_days,
            log_data_days: defaults.log_data_days,
            user_activity_days: defaults.user_activity_days,
            uploaded_files_days: defaults.uploaded_files_days,
            grace_period_days: defaults.grace_period_days,
            auto_cleanup_enabled: true,
            updated_at: Utc::now(),
        }
    }

    pub fn days_for(&self, category: DataCategory) -> u32 {
        match category {
            DataCategory::Transactional => self.transactional_data_days,
            DataCategory::Log => self.log_data_days,
            DataCategory::UserActivity => self.user_activity_days,
            DataCategory::UploadedFile => self.uploaded_files_days,
        }
    }

    /// Every window must be at least one day. A zero grace period is allowed.
    pub fn validate(&self) -> Result<(), GovernanceError> {
        for category in DataCategory::ALL {
            if self.days_for(category) == 0 {
                return Err(GovernanceError::InvalidInput(format!(
                    "retention window for {category} must be at least 1 day"
                )));
            }
        }
        Ok(())
    }
}

/// Pointer to one record that has outlived its retention window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiredRecord {
    pub tenant_id: Uuid,
    pub table_name: String,
    pub category: DataCategory,
    pub record_id: String,
    pub created_at: DateTime<Utc>,
    /// Cutoff the record was scanned against.
    pub expired_at: DateTime<Utc>,
    pub soft_deleted: bool,
    pub soft_deleted_at: Option<DateTime<Utc>>,
}

/// Outcome of one retention cleanup run for a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub tenant_id: Uuid,
    pub records_scanned: usize,
    pub records_soft_deleted: usize,
    pub records_hard_deleted: usize,
    pub completed_at: DateTime<Utc>,
}

impl CleanupResult {
    pub fn deleted_anything(&self) -> bool {
        self.records_soft_deleted > 0 || self.records_hard_deleted > 0
    }
}

/// Scans and deletes expired tenant data through a [`RetentionStore`].
///
/// Storage errors propagate; nothing here is best-effort.
pub struct RetentionEngine {
    store: Arc<dyn RetentionStore>,
}

impl RetentionEngine {
    pub fn new(store: Arc<dyn RetentionStore>) -> Self {
        Self { store }
    }

    pub async fn scan_expired_records(
        &self,
        tenant_id: Uuid,
        policy: &RetentionPolicy,
    ) -> Result<Vec<ExpiredRecord>, StoreError> {
        self.scan_expired_records_at(tenant_id, policy, Utc::now()).await
    }

    /// Union over all categories of records created before
    /// `now - days_for(category)`.
    pub async fn scan_expired_records_at(
        &self,
        tenant_id: Uuid,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredRecord>, StoreError> {
        let mut expired = Vec::new();
        for category in DataCategory::ALL {
            let cutoff = now - Duration::days(i64::from(policy.days_for(category)));
            let records = self.store.find_expired(tenant_id, category, cutoff).await?;
            debug!(
                tenant_id = %tenant_id,
                category = %category,
                found = records.len(),
                "Retention scan"
            );
            expired.extend(records);
        }
        Ok(expired)
    }

    pub async fn soft_delete_records(
        &self,
        records: &mut [ExpiredRecord],
    ) -> Result<usize, StoreError> {
        self.soft_delete_records_at(records, Utc::now()).await
    }

    /// Soft-delete every record not already soft-deleted and mark it in
    /// place. A second call over the same slice returns 0.
    pub async fn soft_delete_records_at(
        &self,
        records: &mut [ExpiredRecord],
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let candidates: Vec<ExpiredRecord> =
            records.iter().filter(|r| !r.soft_deleted).cloned().collect();
        if candidates.is_empty() {
            return Ok(0);
        }

        let affected = self.store.soft_delete(&candidates, now).await?;
        for record in records.iter_mut().filter(|r| !r.soft_deleted) {
            record.soft_deleted = true;
            record.soft_deleted_at = Some(now);
        }

        metrics::counter!("governance.retention.soft_deleted").increment(affected as u64);
        Ok(affected)
    }

    pub async fn hard_delete_records(
        &self,
        records: &[ExpiredRecord],
        policy: &RetentionPolicy,
    ) -> Result<usize, StoreError> {
        self.hard_delete_records_at(records, policy, Utc::now()).await
    }

    /// Permanently remove records soft-deleted at least `grace_period_days`
    /// before `now`. Records still inside the grace window are left alone.
    pub async fn hard_delete_records_at(
        &self,
        records: &[ExpiredRecord],
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let grace = Duration::days(i64::from(policy.grace_period_days));
        let eligible: Vec<ExpiredRecord> = records
            .iter()
            .filter(|r| r.soft_deleted)
            .filter(|r| r.soft_deleted_at.is_some_and(|at| now - at >= grace))
            .cloned()
            .collect();
        if eligible.is_empty() {
            return Ok(0);
        }

        let affected = self.store.hard_delete(&eligible).await?;
        metrics::counter!("governance.retention.hard_deleted").increment(affected as u64);
        info!(
            tenant_id = %policy.tenant_id,
            hard_deleted = affected,
            "Expired records permanently removed"
        );
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRetentionStore;

    fn policy(tenant_id: Uuid) -> RetentionPolicy {
        RetentionPolicy::with_defaults(tenant_id, &RetentionDefaults::default())
    }

    #[test]
    fn test_default_windows() {
        let p = policy(Uuid::new_v4());
        assert_eq!(p.days_for(DataCategory::Transactional), 90);
        assert_eq!(p.days_for(DataCategory::Log), 365);
        assert_eq!(p.days_for(DataCategory::UserActivity), 180);
        assert_eq!(p.days_for(DataCategory::UploadedFile), 365);
        assert_eq!(p.grace_period_days, 30);
        assert!(p.auto_cleanup_enabled);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let mut p = policy(Uuid::new_v4());
        p.log_data_days = 0;
        assert!(matches!(p.validate(), Err(GovernanceError::InvalidInput(_))));

        let mut p = policy(Uuid::new_v4());
        p.grace_period_days = 0;
        assert!(p.validate().is_ok());
    }

    #[tokio::test]
    async fn test_scan_uses_per_category_cutoff() {
        let store = Arc::new(InMemoryRetentionStore::new());
        let tenant = Uuid::new_v4();
        let now = Utc::now();
        // 100 days old: past the 90-day transactional window, inside the log window.
        store.seed_record(tenant, DataCategory::Transactional, "tx-1", now - Duration::days(100));
        store.seed_record(tenant, DataCategory::Log, "log-1", now - Duration::days(100));
        store.seed_record(tenant, DataCategory::Log, "log-2", now - Duration::days(400));
        store.seed_record(Uuid::new_v4(), DataCategory::Log, "other", now - Duration::days(400));

        let engine = RetentionEngine::new(store);
        let expired = engine
            .scan_expired_records_at(tenant, &policy(tenant), now)
            .await
            .unwrap();

        let mut ids: Vec<_> = expired.iter().map(|r| r.record_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, ["log-2", "tx-1"]);
    }

    #[tokio::test]
    async fn test_soft_delete_is_idempotent() {
        let store = Arc::new(InMemoryRetentionStore::new());
        let tenant = Uuid::new_v4();
        let now = Utc::now();
        for i in 0..3 {
            store.seed_record(
                tenant,
                DataCategory::Transactional,
                &format!("tx-{i}"),
                now - Duration::days(120),
            );
        }
        let engine = RetentionEngine::new(store);
        let mut records = engine.scan_expired_records(tenant, &policy(tenant)).await.unwrap();

        assert_eq!(engine.soft_delete_records(&mut records).await.unwrap(), 3);
        assert!(records.iter().all(|r| r.soft_deleted && r.soft_deleted_at.is_some()));
        assert_eq!(engine.soft_delete_records(&mut records).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hard_delete_grace_boundary() {
        let store = Arc::new(InMemoryRetentionStore::new());
        let tenant = Uuid::new_v4();
        let now = Utc::now();
        store.seed_record(tenant, DataCategory::Log, "at-grace", now - Duration::days(500));
        store.seed_record(tenant, DataCategory::Log, "inside-grace", now - Duration::days(500));

        let engine = RetentionEngine::new(store.clone());
        let p = policy(tenant);
        let mut records = engine.scan_expired_records_at(tenant, &p, now).await.unwrap();
        assert_eq!(records.len(), 2);

        for record in records.iter_mut() {
            let days_ago = if record.record_id == "at-grace" { 30 } else { 29 };
            let at = now - Duration::days(days_ago);
            engine
                .soft_delete_records_at(std::slice::from_mut(record), at)
                .await
                .unwrap();
        }

        let removed = engine.hard_delete_records_at(&records, &p, now).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.contains_record(tenant, "at-grace"));
        assert!(store.contains_record(tenant, "inside-grace"));
    }

    #[tokio::test]
    async fn test_hard_delete_skips_live_records() {
        let store = Arc::new(InMemoryRetentionStore::new());
        let tenant = Uuid::new_v4();
        let now = Utc::now();
        store.seed_record(tenant, DataCategory::Transactional, "tx", now - Duration::days(365));

        let engine = RetentionEngine::new(store.clone());
        let p = policy(tenant);
        let records = engine.scan_expired_records_at(tenant, &p, now).await.unwrap();
        assert_eq!(engine.hard_delete_records_at(&records, &p, now).await.unwrap(), 0);
        assert!(store.contains_record(tenant, "tx"));
    }
}
