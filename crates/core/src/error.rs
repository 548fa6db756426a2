use thiserror::Error;
use uuid::Uuid;

use crate::types::TenantStatus;

pub type GovernanceResult<T> = Result<T, GovernanceError>;

/// Failures raised by storage and infrastructure collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Write rejected because the stored state moved underneath the caller
    /// (duplicate key, stale chain tip).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Domain errors surfaced by the governance core.
#[derive(Error, Debug)]
pub enum GovernanceError {
    #[error("Tenant not found: {tenant_id}")]
    TenantNotFound { tenant_id: Uuid },

    #[error("Invalid state transition from {current} to {new}")]
    InvalidStateTransition {
        current: TenantStatus,
        new: TenantStatus,
    },

    #[error("Failed to create schema '{schema_name}': {reason}")]
    SchemaCreationFailed { schema_name: String, reason: String },

    #[error("Tenant already exists: {identifier}")]
    TenantAlreadyExists { identifier: String },

    #[error("Cross-tenant access denied: {source_tenant} -> {target_tenant}")]
    CrossTenantAccessDenied {
        source_tenant: Uuid,
        target_tenant: Uuid,
    },

    #[error("Tenant {tenant_id} exceeded quota for {resource} (limit: {limit})")]
    TenantQuotaExceeded {
        tenant_id: Uuid,
        resource: String,
        limit: u64,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl GovernanceError {
    /// HTTP-equivalent status for the presentation layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::TenantNotFound { .. } => 404,
            Self::InvalidStateTransition { .. } => 409,
            Self::SchemaCreationFailed { .. } => 500,
            Self::TenantAlreadyExists { .. } => 409,
            Self::CrossTenantAccessDenied { .. } => 403,
            Self::TenantQuotaExceeded { .. } => 429,
            Self::InvalidInput(_) => 422,
            Self::Store(StoreError::NotFound(_)) => 404,
            Self::Store(StoreError::Conflict(_)) => 409,
            Self::Store(_) => 503,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::TenantNotFound { .. } => "Tenant Not Found",
            Self::InvalidStateTransition { .. } => "Invalid State Transition",
            Self::SchemaCreationFailed { .. } => "Schema Creation Failed",
            Self::TenantAlreadyExists { .. } => "Tenant Conflict",
            Self::CrossTenantAccessDenied { .. } => "Cross-Tenant Access Denied",
            Self::TenantQuotaExceeded { .. } => "Quota Exceeded",
            Self::InvalidInput(_) => "Invalid Input",
            Self::Store(_) => "Storage Unavailable",
        }
    }

    /// Whether a background driver should retry after this error.
    /// Validation failures are permanent; infrastructure failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SchemaCreationFailed { .. }
                | Self::Store(StoreError::Timeout { .. })
                | Self::Store(StoreError::Backend(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let err = GovernanceError::InvalidStateTransition {
            current: TenantStatus::Pending,
            new: TenantStatus::Active,
        };
        assert_eq!(err.status_code(), 409);
        assert_eq!(
            err.to_string(),
            "Invalid state transition from PENDING to ACTIVE"
        );

        let err = GovernanceError::TenantNotFound {
            tenant_id: Uuid::nil(),
        };
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.title(), "Tenant Not Found");

        let err: GovernanceError = StoreError::Timeout {
            operation: "drop_schema".into(),
        }
        .into();
        assert_eq!(err.status_code(), 503);
        assert!(err.is_transient());
    }

    #[test]
    fn test_validation_errors_are_permanent() {
        let err = GovernanceError::TenantAlreadyExists {
            identifier: "acme".into(),
        };
        assert!(!err.is_transient());
        let err = GovernanceError::TenantQuotaExceeded {
            tenant_id: Uuid::nil(),
            resource: "users".into(),
            limit: 50,
        };
        assert_eq!(err.status_code(), 429);
        assert!(!err.is_transient());
    }
}
