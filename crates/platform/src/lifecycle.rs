//! Tenant lifecycle state machine: which status transitions are allowed, and
//! which side-effect actions each allowed transition implies.
//!
//! ```text
//! Pending ──▶ Provisioning ──▶ Active ◀──▶ Suspended
//!    │             │              │            │
//!    │             │              ▼            ▼
//!    │             │         Deprovisioning ◀──┘
//!    │             │              │
//!    └─────────────┴──────▶ Deleted (terminal) ◀┘
//! ```
//!
//! Both tables are exhaustive `match`es over `TenantStatus`, so adding a status
//! fails to compile until its transitions are declared. Nothing here performs
//! I/O or raises; callers turn a rejected transition into
//! `GovernanceError::InvalidStateTransition`.

use governance_core::TenantStatus;
use serde::{Deserialize, Serialize};

/// Side-effect token attached to a transition. The orchestrator dispatches
/// these; the state machine only names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    CreateSchema,
    InitializeDefaultSettings,
    SendProvisioningNotification,
    ActivateSchema,
    EnableApiAccess,
    SendWelcomeNotification,
    CleanupPartialSchema,
    SendFailureNotification,
    DisableApiAccess,
    SendSuspensionNotification,
    ScheduleDataExport,
    SendDeprovisioningNotification,
    SendReactivationNotification,
    DeleteSchema,
    PurgeTenantData,
    SendDeletionConfirmation,
    SendCancellationNotification,
}

impl TransitionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateSchema => "create_schema",
            Self::InitializeDefaultSettings => "initialize_default_settings",
            Self::SendProvisioningNotification => "send_provisioning_notification",
            Self::ActivateSchema => "activate_schema",
            Self::EnableApiAccess => "enable_api_access",
            Self::SendWelcomeNotification => "send_welcome_notification",
            Self::CleanupPartialSchema => "cleanup_partial_schema",
            Self::SendFailureNotification => "send_failure_notification",
            Self::DisableApiAccess => "disable_api_access",
            Self::SendSuspensionNotification => "send_suspension_notification",
            Self::ScheduleDataExport => "schedule_data_export",
            Self::SendDeprovisioningNotification => "send_deprovisioning_notification",
            Self::SendReactivationNotification => "send_reactivation_notification",
            Self::DeleteSchema => "delete_schema",
            Self::PurgeTenantData => "purge_tenant_data",
            Self::SendDeletionConfirmation => "send_deletion_confirmation",
            Self::SendCancellationNotification => "send_cancellation_notification",
        }
    }

    /// Notifications are delivered best-effort; every other action must succeed.
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Self::SendProvisioningNotification
                | Self::SendWelcomeNotification
                | Self::SendFailureNotification
                | Self::SendSuspensionNotification
                | Self::SendDeprovisioningNotification
                | Self::SendReactivationNotification
                | Self::SendDeletionConfirmation
                | Self::SendCancellationNotification
        )
    }
}

impl std::fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States reachable in one step from `current`.
pub fn allowed_transitions(current: TenantStatus) -> &'static [TenantStatus] {
    use TenantStatus::*;
    match current {
        Pending => &[Provisioning, Deleted],
        Provisioning => &[Active, Deleted],
        Active => &[Suspended, Deprovisioning],
        Suspended => &[Active, Deprovisioning],
        Deprovisioning => &[Deleted],
        Deleted => &[],
    }
}

/// True iff `new` is reachable from `current` in one step.
pub fn validate_transition(current: TenantStatus, new: TenantStatus) -> bool {
    allowed_transitions(current).contains(&new)
}

/// Ordered side effects for `current -> new`; empty when the transition is
/// not defined.
pub fn transition_actions(current: TenantStatus, new: TenantStatus) -> &'static [TransitionAction] {
    use TenantStatus::*;
    use TransitionAction::*;
    match (current, new) {
        (Pending, Provisioning) => &[
            CreateSchema,
            InitializeDefaultSettings,
            SendProvisioningNotification,
        ],
        (Provisioning, Active) => &[ActivateSchema, EnableApiAccess, SendWelcomeNotification],
        (Provisioning, Deleted) => &[CleanupPartialSchema, SendFailureNotification],
        (Active, Suspended) => &[DisableApiAccess, SendSuspensionNotification],
        (Active, Deprovisioning) => &[
            DisableApiAccess,
            ScheduleDataExport,
            SendDeprovisioningNotification,
        ],
        (Suspended, Active) => &[EnableApiAccess, SendReactivationNotification],
        (Suspended, Deprovisioning) => &[ScheduleDataExport, SendDeprovisioningNotification],
        (Deprovisioning, Deleted) => &[DeleteSchema, PurgeTenantData, SendDeletionConfirmation],
        (Pending, Deleted) => &[SendCancellationNotification],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TenantStatus::*;

    const DEFINED: [(TenantStatus, TenantStatus); 9] = [
        (Pending, Provisioning),
        (Pending, Deleted),
        (Provisioning, Active),
        (Provisioning, Deleted),
        (Active, Suspended),
        (Active, Deprovisioning),
        (Suspended, Active),
        (Suspended, Deprovisioning),
        (Deprovisioning, Deleted),
    ];

    #[test]
    fn test_only_table_pairs_validate() {
        for current in TenantStatus::ALL {
            for new in TenantStatus::ALL {
                let expected = DEFINED.contains(&(current, new));
                assert_eq!(
                    validate_transition(current, new),
                    expected,
                    "{current} -> {new}"
                );
            }
        }
    }

    #[test]
    fn test_deleted_is_terminal() {
        for new in TenantStatus::ALL {
            assert!(!validate_transition(Deleted, new));
            assert!(transition_actions(Deleted, new).is_empty());
        }
    }

    #[test]
    fn test_every_defined_transition_has_actions() {
        for (current, new) in DEFINED {
            assert!(!transition_actions(current, new).is_empty(), "{current} -> {new}");
        }
    }

    #[test]
    fn test_undefined_transitions_have_no_actions() {
        for current in TenantStatus::ALL {
            for new in TenantStatus::ALL {
                if !DEFINED.contains(&(current, new)) {
                    assert!(transition_actions(current, new).is_empty());
                }
            }
        }
    }

    #[test]
    fn test_exact_action_lists() {
        let tokens = |c, n| {
            transition_actions(c, n)
                .iter()
                .map(TransitionAction::as_str)
                .collect::<Vec<_>>()
        };
        assert_eq!(
            tokens(Pending, Provisioning),
            [
                "create_schema",
                "initialize_default_settings",
                "send_provisioning_notification"
            ]
        );
        assert_eq!(
            tokens(Deprovisioning, Deleted),
            ["delete_schema", "purge_tenant_data", "send_deletion_confirmation"]
        );
        assert_eq!(tokens(Pending, Deleted), ["send_cancellation_notification"]);
        // Repeated lookups return the same list.
        assert_eq!(tokens(Active, Suspended), tokens(Active, Suspended));
    }

    #[test]
    fn test_action_serde_matches_token() {
        let json = serde_json::to_string(&TransitionAction::ScheduleDataExport).unwrap();
        assert_eq!(json, "\"schedule_data_export\"");
        assert!(TransitionAction::SendWelcomeNotification.is_notification());
        assert!(!TransitionAction::CreateSchema.is_notification());
    }
}
