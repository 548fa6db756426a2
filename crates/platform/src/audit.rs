//! Audit ledger: tamper-evident, per-tenant hash chains over governance
//! events, with integrity verification and compliance reporting.
//!
//! Each entry's SHA-256 hash covers its own fields and the hash of the entry
//! before it, so editing any persisted entry breaks verification from that
//! entry onwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use governance_core::StoreError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::locks::TenantLocks;
use crate::ports::LedgerStore;

/// Opaque key-value payload attached to an entry.
pub type AuditDetails = BTreeMap<String, serde_json::Value>;

/// Actor recorded for entries written by background jobs.
pub const SYSTEM_ACTOR: Uuid = Uuid::nil();

/// Governance-relevant event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    TenantCreated,
    TenantUpdated,
    TenantDeleted,
    UserLogin,
    DataAccessed,
    DataExported,
    DataErased,
    SchemaMigrated,
    CostAnomalyDetected,
    RetentionExecuted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenantCreated => "TENANT_CREATED",
            Self::TenantUpdated => "TENANT_UPDATED",
            Self::TenantDeleted => "TENANT_DELETED",
            Self::UserLogin => "USER_LOGIN",
            Self::DataAccessed => "DATA_ACCESSED",
            Self::DataExported => "DATA_EXPORTED",
            Self::DataErased => "DATA_ERASED",
            Self::SchemaMigrated => "SCHEMA_MIGRATED",
            Self::CostAnomalyDetected => "COST_ANOMALY_DETECTED",
            Self::RetentionExecuted => "RETENTION_EXECUTED",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single link in a tenant's audit chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub action: AuditAction,
    pub actor_id: Uuid,
    pub details: AuditDetails,
    pub timestamp: DateTime<Utc>,
    /// Hash of the preceding entry for this tenant; empty for the first.
    pub previous_hash: String,
    /// SHA-256 over the canonical field set, hex-encoded.
    pub entry_hash: String,
}

impl AuditEntry {
    /// Build an entry stamped with the current time and hash it.
    pub fn new(
        tenant_id: Uuid,
        action: AuditAction,
        actor_id: Uuid,
        details: AuditDetails,
        previous_hash: String,
    ) -> Self {
        Self::at(tenant_id, action, actor_id, details, previous_hash, Utc::now())
    }

    /// Build an entry with an explicit timestamp. The timestamp is truncated
    /// to microseconds so storage backends with microsecond columns
    /// round-trip it without changing the hash.
    pub fn at(
        tenant_id: Uuid,
        action: AuditAction,
        actor_id: Uuid,
        details: AuditDetails,
        previous_hash: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            tenant_id,
            action,
            actor_id,
            details,
            timestamp: timestamp.trunc_subsecs(6),
            previous_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();
        entry
    }

    /// Recompute the hash from the entry's current fields.
    pub fn compute_hash(&self) -> String {
        let content = format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.previous_hash,
            self.action.as_str(),
            self.tenant_id,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.id,
            self.actor_id,
            canonical_details(&self.details),
        );
        sha256_hex(&content)
    }
}

/// Outcome of verifying one tenant's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_entries: usize,
    pub broken_at_index: Option<usize>,
    pub broken_entry_id: Option<Uuid>,
}

/// Verify linkage and hashes of `entries`, given in chain order.
///
/// Reports the first entry whose `previous_hash` does not match its
/// predecessor's hash, or whose recomputed hash differs from the stored one.
/// An empty slice is vacuously valid.
pub fn verify_entries(entries: &[AuditEntry]) -> ChainVerification {
    let mut expected_prev = "";
    for (index, entry) in entries.iter().enumerate() {
        if entry.previous_hash != expected_prev || entry.compute_hash() != entry.entry_hash {
            return ChainVerification {
                valid: false,
                total_entries: entries.len(),
                broken_at_index: Some(index),
                broken_entry_id: Some(entry.id),
            };
        }
        expected_prev = &entry.entry_hash;
    }
    ChainVerification {
        valid: true,
        total_entries: entries.len(),
        broken_at_index: None,
        broken_entry_id: None,
    }
}

/// Append-only audit chain over a [`LedgerStore`].
///
/// Appends for one tenant are serialized so that two writers never read the
/// same tip; the store's compare-and-append rejects any write that slips past.
pub struct AuditChain {
    store: Arc<dyn LedgerStore>,
    locks: TenantLocks,
}

impl AuditChain {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            locks: TenantLocks::new(),
        }
    }

    /// Chain a new entry onto the tenant's tip and persist it.
    pub async fn append_entry(
        &self,
        tenant_id: Uuid,
        action: AuditAction,
        actor_id: Uuid,
        details: AuditDetails,
    ) -> Result<AuditEntry, StoreError> {
        let _guard = self.locks.acquire(tenant_id).await;

        let previous_hash = self
            .store
            .latest(tenant_id)
            .await?
            .map(|e| e.entry_hash)
            .unwrap_or_default();

        let entry = AuditEntry::new(tenant_id, action, actor_id, details, previous_hash);
        let entry = self.store.append(entry).await?;

        metrics::counter!("governance.audit.appends").increment(1);
        info!(
            tenant_id = %tenant_id,
            entry_id = %entry.id,
            action = %entry.action,
            "Audit entry appended (hash-chained)"
        );
        Ok(entry)
    }

    /// Load the tenant's chain and verify it end to end.
    pub async fn verify_chain_integrity(
        &self,
        tenant_id: Uuid,
    ) -> Result<ChainVerification, StoreError> {
        let entries = self.store.list_by_tenant(tenant_id).await?;
        let verification = verify_entries(&entries);
        if !verification.valid {
            warn!(
                tenant_id = %tenant_id,
                broken_at_index = ?verification.broken_at_index,
                broken_entry_id = ?verification.broken_entry_id,
                "Audit chain integrity check failed"
            );
        }
        Ok(verification)
    }

    pub async fn latest_entry(&self, tenant_id: Uuid) -> Result<Option<AuditEntry>, StoreError> {
        self.store.latest(tenant_id).await
    }

    pub async fn entries(&self, tenant_id: Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        self.store.list_by_tenant(tenant_id).await
    }

    /// Query a tenant's entries with optional time range and action filter,
    /// newest first.
    pub async fn query(
        &self,
        tenant_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        action: Option<AuditAction>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let mut results: Vec<AuditEntry> = self
            .store
            .list_by_tenant(tenant_id)
            .await?
            .into_iter()
            .filter(|e| from.map_or(true, |f| e.timestamp >= f))
            .filter(|e| to.map_or(true, |t| e.timestamp <= t))
            .filter(|e| action.map_or(true, |a| e.action == a))
            .collect();

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        results.truncate(limit);
        Ok(results)
    }

    /// Summarise a tenant's audit activity in a time range, including the
    /// result of a full chain verification.
    pub async fn compliance_report(
        &self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<serde_json::Value, StoreError> {
        let entries = self.store.list_by_tenant(tenant_id).await?;

        let mut action_counts: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut total: u64 = 0;
        for entry in entries.iter().filter(|e| e.timestamp >= from && e.timestamp <= to) {
            *action_counts.entry(entry.action.as_str()).or_default() += 1;
            total += 1;
        }

        let chain = verify_entries(&entries);

        Ok(serde_json::json!({
            "tenant_id": tenant_id,
            "period": { "from": from, "to": to },
            "total_events": total,
            "events_by_action": action_counts,
            "chain_integrity": {
                "total": chain.total_entries,
                "intact": chain.valid,
                "broken_at_index": chain.broken_at_index,
            },
        }))
    }
}

/// JSON with object keys sorted at every depth, independent of how the
/// `serde_json` map type is configured.
fn canonical_details(details: &AuditDetails) -> String {
    let mut out = String::new();
    out.push('{');
    for (i, (key, value)) in details.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_json_string(&mut out, key);
        out.push(':');
        write_canonical_value(&mut out, value);
    }
    out.push('}');
    out
}

fn write_canonical_value(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(out, key);
                out.push(':');
                write_canonical_value(out, &map[key.as_str()]);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_value(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_json_string(out: &mut String, s: &str) {
    out.push_str(&serde_json::Value::String(s.to_owned()).to_string());
}

/// Compute SHA-256 hex digest.
fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
