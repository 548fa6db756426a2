use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GovernanceError;

/// Tenant lifecycle status. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantStatus {
    Pending,
    Provisioning,
    Active,
    Suspended,
    Deprovisioning,
    Deleted,
}

impl TenantStatus {
    pub const ALL: [TenantStatus; 6] = [
        Self::Pending,
        Self::Provisioning,
        Self::Active,
        Self::Suspended,
        Self::Deprovisioning,
        Self::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Provisioning => "PROVISIONING",
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Deprovisioning => "DEPROVISIONING",
            Self::Deleted => "DELETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources subject to per-tenant quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResource {
    Users,
    StorageGb,
    ApiRequestsPerMinute,
}

impl std::fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Users => "users",
            Self::StorageGb => "storage_gb",
            Self::ApiRequestsPerMinute => "api_requests_per_minute",
        };
        f.write_str(s)
    }
}

/// Per-tenant configuration limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub max_users: u32,
    pub storage_limit_gb: u32,
    pub api_rate_limit: u32,
    pub data_retention_days: u32,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            max_users: 50,
            storage_limit_gb: 100,
            api_rate_limit: 1000,
            data_retention_days: 365,
        }
    }
}

impl TenantSettings {
    pub fn limit_for(&self, resource: QuotaResource) -> u64 {
        match resource {
            QuotaResource::Users => u64::from(self.max_users),
            QuotaResource::StorageGb => u64::from(self.storage_limit_gb),
            QuotaResource::ApiRequestsPerMinute => u64::from(self.api_rate_limit),
        }
    }
}

/// A single tenant organization on the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub owner_email: String,
    pub status: TenantStatus,
    pub schema_name: String,
    pub settings: TenantSettings,
    pub api_access_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Build a new tenant in `Pending` with a schema name derived from the slug.
    pub fn new(name: String, slug: String, owner_email: String) -> Result<Self, GovernanceError> {
        let schema_name = schema_name_for(&slug)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            slug,
            owner_email,
            status: TenantStatus::Pending,
            schema_name,
            settings: TenantSettings::default(),
            api_access_enabled: false,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Derive the dedicated schema name for a tenant slug.
///
/// Slugs must start with `[a-z0-9]` and contain only `[a-z0-9_-]`; hyphens
/// become underscores, so `acme-gmbh` maps to `tenant_acme_gmbh`.
pub fn schema_name_for(slug: &str) -> Result<String, GovernanceError> {
    let mut chars = slug.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let valid_tail =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !valid_head || !valid_tail {
        return Err(GovernanceError::InvalidInput(format!(
            "invalid tenant slug {slug:?}: must match ^[a-z0-9][a-z0-9_-]*$"
        )));
    }
    Ok(format!("tenant_{}", slug.replace('-', "_")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_name_for() {
        assert_eq!(schema_name_for("acme-gmbh").unwrap(), "tenant_acme_gmbh");
        assert_eq!(schema_name_for("a1").unwrap(), "tenant_a1");
        assert!(schema_name_for("").is_err());
        assert!(schema_name_for("-acme").is_err());
        assert!(schema_name_for("Acme").is_err());
        assert!(schema_name_for("acme; drop schema x").is_err());
    }

    #[test]
    fn test_new_tenant_starts_pending() {
        let tenant = Tenant::new("Acme".into(), "acme".into(), "ops@acme.example".into()).unwrap();
        assert_eq!(tenant.status, TenantStatus::Pending);
        assert_eq!(tenant.schema_name, "tenant_acme");
        assert!(!tenant.api_access_enabled);
        assert_eq!(tenant.settings.limit_for(QuotaResource::Users), 50);
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&TenantStatus::Deprovisioning).unwrap();
        assert_eq!(json, "\"DEPROVISIONING\"");
        let back: TenantStatus = serde_json::from_str("\"SUSPENDED\"").unwrap();
        assert_eq!(back, TenantStatus::Suspended);
        assert!(TenantStatus::Deleted.is_terminal());
    }
}
