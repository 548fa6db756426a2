use serde::Deserialize;
use std::time::Duration;

/// Root application configuration. Loaded from environment variables
/// with the prefix `GOVERNANCE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub retention: RetentionDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound for every call into an external collaborator
    /// (schema DDL, cache purge, export, cascade delete, key rotation).
    #[serde(default = "default_external_call_ms")]
    pub external_call_ms: u64,
}

impl TimeoutConfig {
    pub fn external_call(&self) -> Duration {
        Duration::from_millis(self.external_call_ms)
    }
}

/// Backoff settings for one class of background job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Per-job backoff settings. Each field of each job can be overridden on its
/// own; anything left unset keeps that job's default.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RetryOverrides")]
pub struct RetryConfig {
    pub provisioning: JobRetryConfig,
    pub deprovisioning: JobRetryConfig,
    /// Erasure is destructive; keep this low so operators can inspect
    /// a failed run before it is retried automatically.
    pub erasure: JobRetryConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RetryOverrides {
    #[serde(default)]
    provisioning: JobRetryOverride,
    #[serde(default)]
    deprovisioning: JobRetryOverride,
    #[serde(default)]
    erasure: JobRetryOverride,
}

#[derive(Debug, Default, Deserialize)]
struct JobRetryOverride {
    max_retries: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

impl JobRetryOverride {
    fn over(self, base: JobRetryConfig) -> JobRetryConfig {
        JobRetryConfig {
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            initial_backoff_ms: self.initial_backoff_ms.unwrap_or(base.initial_backoff_ms),
            max_backoff_ms: self.max_backoff_ms.unwrap_or(base.max_backoff_ms),
        }
    }
}

impl From<RetryOverrides> for RetryConfig {
    fn from(raw: RetryOverrides) -> Self {
        Self {
            provisioning: raw.provisioning.over(default_provisioning_retry()),
            deprovisioning: raw.deprovisioning.over(default_deprovisioning_retry()),
            erasure: raw.erasure.over(default_erasure_retry()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_concurrency")]
    pub max_concurrency: usize,
    /// Seconds between scheduled sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

/// Retention windows applied when a tenant has no explicit policy yet.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionDefaults {
    #[serde(default = "default_transactional_days")]
    pub transactional_data_days: u32,
    #[serde(default = "default_log_days")]
    pub log_data_days: u32,
    #[serde(default = "default_user_activity_days")]
    pub user_activity_days: u32,
    #[serde(default = "default_uploaded_files_days")]
    pub uploaded_files_days: u32,
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: u32,
}

fn default_node_id() -> String {
    "governance-01".to_string()
}
fn default_log_filter() -> String {
    "governance_engine=info,governance_platform=info".to_string()
}
fn default_external_call_ms() -> u64 {
    30_000
}
fn default_max_backoff_ms() -> u64 {
    600_000
}
fn default_provisioning_retry() -> JobRetryConfig {
    JobRetryConfig {
        max_retries: 3,
        initial_backoff_ms: 30_000,
        max_backoff_ms: default_max_backoff_ms(),
    }
}
fn default_deprovisioning_retry() -> JobRetryConfig {
    JobRetryConfig {
        max_retries: 3,
        initial_backoff_ms: 60_000,
        max_backoff_ms: default_max_backoff_ms(),
    }
}
fn default_erasure_retry() -> JobRetryConfig {
    JobRetryConfig {
        max_retries: 1,
        initial_backoff_ms: 60_000,
        max_backoff_ms: default_max_backoff_ms(),
    }
}
fn default_sweep_concurrency() -> usize {
    8
}
fn default_sweep_interval_secs() -> u64 {
    86_400
}
fn default_transactional_days() -> u32 {
    90
}
fn default_log_days() -> u32 {
    365
}
fn default_user_activity_days() -> u32 {
    180
}
fn default_uploaded_files_days() -> u32 {
    365
}
fn default_grace_period_days() -> u32 {
    30
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            external_call_ms: default_external_call_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryOverrides::default().into()
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_sweep_concurrency(),
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for RetentionDefaults {
    fn default() -> Self {
        Self {
            transactional_data_days: default_transactional_days(),
            log_data_days: default_log_days(),
            user_activity_days: default_user_activity_days(),
            uploaded_files_days: default_uploaded_files_days(),
            grace_period_days: default_grace_period_days(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            log_filter: default_log_filter(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            sweep: SweepConfig::default(),
            retention: RetentionDefaults::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Uses `GOVERNANCE__` prefix with `__` as separator,
    /// e.g. `GOVERNANCE__SWEEP__MAX_CONCURRENCY=16`.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("GOVERNANCE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.timeouts.external_call(), Duration::from_secs(30));
        assert_eq!(config.retry.provisioning.max_retries, 3);
        assert_eq!(config.retry.erasure.max_retries, 1);
        assert_eq!(config.sweep.max_concurrency, 8);
        assert_eq!(config.retention.grace_period_days, 30);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: AppConfig =
            serde_json::from_value(serde_json::json!({ "sweep": { "max_concurrency": 2 } }))
                .unwrap();
        assert_eq!(config.sweep.max_concurrency, 2);
        assert_eq!(config.node_id, "governance-01");
        assert_eq!(config.retry.deprovisioning.initial_backoff_ms, 60_000);
    }

    #[test]
    fn test_single_retry_field_override_keeps_job_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "retry": { "erasure": { "max_retries": 0 } }
        }))
        .unwrap();
        assert_eq!(config.retry.erasure.max_retries, 0);
        assert_eq!(config.retry.erasure.initial_backoff_ms, 60_000);
        assert_eq!(config.retry.erasure.max_backoff_ms, 600_000);
        assert_eq!(config.retry.provisioning.max_retries, 3);
        assert_eq!(config.retry.provisioning.initial_backoff_ms, 30_000);
    }

    #[test]
    fn test_retry_override_from_environment_source() {
        // Same shape the `GOVERNANCE__RETRY__PROVISIONING__INITIAL_BACKOFF_MS`
        // variable produces once the env source has split and parsed it.
        let config: AppConfig = config::Config::builder()
            .set_override("retry.provisioning.initial_backoff_ms", 5_000i64)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.retry.provisioning.initial_backoff_ms, 5_000);
        assert_eq!(config.retry.provisioning.max_retries, 3);
        assert_eq!(config.retry.deprovisioning.initial_backoff_ms, 60_000);
    }
}
