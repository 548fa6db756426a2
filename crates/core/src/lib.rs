//! Foundational types for the tenant governance engine: configuration,
//! the error taxonomy, and the tenant model.

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{GovernanceError, GovernanceResult, StoreError};
pub use types::{QuotaResource, Tenant, TenantSettings, TenantStatus};
