//! Tenant governance: lifecycle state machine, hash-chained audit ledger,
//! data retention, right-to-erasure pipeline, and the orchestrator that
//! ties them together over pluggable storage ports.

pub mod audit;
pub mod context;
pub mod erasure;
pub mod jobs;
pub mod lifecycle;
pub mod locks;
pub mod memory;
pub mod orchestrator;
pub mod ports;
pub mod retention;
pub mod retry;

pub use audit::{AuditAction, AuditChain, AuditEntry, ChainVerification, SYSTEM_ACTOR};
pub use context::{GovernanceContext, InMemoryBackends};
pub use erasure::{ErasurePipeline, ErasureResult, ErasureStep, StepResult};
pub use jobs::{JobRunner, SweepReport};
pub use lifecycle::{allowed_transitions, transition_actions, validate_transition, TransitionAction};
pub use orchestrator::{ensure_tenant_scope, GovernanceOrchestrator, Page, TenantUpdate};
pub use retention::{CleanupResult, DataCategory, RetentionEngine, RetentionPolicy};
pub use retry::RetryPolicy;
