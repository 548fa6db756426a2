//! Explicit handle to every collaborator the governance core uses.
//!
//! Built once at startup and passed by reference; nothing in this crate
//! reaches for process-wide state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use governance_core::{AppConfig, StoreError};

use crate::memory::{
    InMemoryCacheManager, InMemoryDataExporter, InMemoryExportStore, InMemoryKeyManager,
    InMemoryLedgerStore, InMemoryRetentionStore, InMemorySchemaManager, InMemoryTenantDataStore,
    InMemoryTenantStore, RecordingNotifier,
};
use crate::ports::{
    CacheManager, DataExporter, ExportStore, KeyManager, LedgerStore, Notifier, RetentionStore,
    SchemaManager, TenantDataStore, TenantStore,
};

#[derive(Clone)]
pub struct GovernanceContext {
    pub config: AppConfig,
    pub tenants: Arc<dyn TenantStore>,
    pub schemas: Arc<dyn SchemaManager>,
    pub caches: Arc<dyn CacheManager>,
    pub exports: Arc<dyn ExportStore>,
    pub exporter: Arc<dyn DataExporter>,
    pub ledger: Arc<dyn LedgerStore>,
    pub retention: Arc<dyn RetentionStore>,
    pub tenant_data: Arc<dyn TenantDataStore>,
    pub keys: Arc<dyn KeyManager>,
    pub notifier: Arc<dyn Notifier>,
}

/// Concrete handles to the in-memory backends behind a context built by
/// [`GovernanceContext::in_memory`], for seeding data and injecting faults.
#[derive(Clone, Default)]
pub struct InMemoryBackends {
    pub tenants: Arc<InMemoryTenantStore>,
    pub schemas: Arc<InMemorySchemaManager>,
    pub caches: Arc<InMemoryCacheManager>,
    pub exports: Arc<InMemoryExportStore>,
    pub exporter: Arc<InMemoryDataExporter>,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub retention: Arc<InMemoryRetentionStore>,
    pub tenant_data: Arc<InMemoryTenantDataStore>,
    pub keys: Arc<InMemoryKeyManager>,
    pub notifier: Arc<RecordingNotifier>,
}

impl GovernanceContext {
    pub fn in_memory(config: AppConfig) -> (Self, InMemoryBackends) {
        let backends = InMemoryBackends::default();
        let ctx = Self {
            config,
            tenants: backends.tenants.clone(),
            schemas: backends.schemas.clone(),
            caches: backends.caches.clone(),
            exports: backends.exports.clone(),
            exporter: backends.exporter.clone(),
            ledger: backends.ledger.clone(),
            retention: backends.retention.clone(),
            tenant_data: backends.tenant_data.clone(),
            keys: backends.keys.clone(),
            notifier: backends.notifier.clone(),
        };
        (ctx, backends)
    }

    pub fn external_call_timeout(&self) -> Duration {
        self.config.timeouts.external_call()
    }

    /// Run a call into an external collaborator under the configured timeout.
    pub async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        bounded(self.external_call_timeout(), operation, fut).await
    }
}

/// Await `fut` for at most `limit`; elapsing becomes `StoreError::Timeout`.
pub async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation: operation.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), StoreError> = bounded(Duration::from_millis(10), "slow_call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(
            result,
            Err(StoreError::Timeout {
                operation: "slow_call".into()
            })
        );
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let (ctx, _) = GovernanceContext::in_memory(AppConfig::default());
        let value = ctx.bounded("fast_call", async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(value, Ok(7));
    }
}
