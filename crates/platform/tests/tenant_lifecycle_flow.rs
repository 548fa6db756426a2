//! End-to-end tenant governance flows against the in-memory backends.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use governance_core::{AppConfig, GovernanceError, TenantStatus};
    use governance_platform::audit::AuditAction;
    use governance_platform::ports::SchemaManager;
    use governance_platform::{
        ensure_tenant_scope, ErasureStep, GovernanceContext, GovernanceOrchestrator,
        InMemoryBackends, JobRunner, TransitionAction, SYSTEM_ACTOR,
    };
    use uuid::Uuid;

    fn setup() -> (Arc<GovernanceOrchestrator>, InMemoryBackends) {
        let (ctx, mem) = GovernanceContext::in_memory(AppConfig::default());
        (Arc::new(GovernanceOrchestrator::new(ctx)), mem)
    }

    #[tokio::test]
    async fn test_full_lifecycle_produces_valid_chain() {
        let (orch, mem) = setup();
        let admin = Uuid::new_v4();

        let tenant = orch
            .create_tenant(
                "Acme GmbH".into(),
                "acme".into(),
                "dpo@acme.example".into(),
                None,
                admin,
            )
            .await
            .unwrap();
        assert_eq!(tenant.status, TenantStatus::Active);

        let tenant = orch.suspend_tenant(tenant.id, admin).await.unwrap();
        assert_eq!(tenant.status, TenantStatus::Suspended);
        assert!(!tenant.api_access_enabled);

        let tenant = orch.activate_tenant(tenant.id, admin).await.unwrap();
        assert!(tenant.api_access_enabled);

        let tenant = orch.deprovision_tenant(tenant.id, admin).await.unwrap();
        assert_eq!(tenant.status, TenantStatus::Deprovisioning);
        assert_eq!(mem.exports.jobs_for(tenant.id).len(), 1);

        let tenant = orch.complete_deprovisioning(tenant.id, admin).await.unwrap();
        assert_eq!(tenant.status, TenantStatus::Deleted);
        assert!(!mem.schemas.schema_exists("tenant_acme").await.unwrap());

        let entries = orch.chain().entries(tenant.id).await.unwrap();
        let actions: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::TenantCreated,
                AuditAction::TenantUpdated,
                AuditAction::TenantUpdated,
                AuditAction::TenantDeleted,
                AuditAction::TenantDeleted,
            ]
        );
        for pair in entries.windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].entry_hash);
        }

        let verification = orch.verify_chain(tenant.id).await.unwrap();
        assert!(verification.valid);
        assert_eq!(verification.total_entries, 5);

        // Deleted is terminal.
        let err = orch.activate_tenant(tenant.id, admin).await.unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_pending_tenant_cannot_skip_provisioning() {
        let (orch, _) = setup();
        let tenant = orch
            .register_tenant("Beta".into(), "beta".into(), "ops@beta.example".into(), None)
            .await
            .unwrap();

        let err = orch.activate_tenant(tenant.id, SYSTEM_ACTOR).await.unwrap_err();
        match err {
            GovernanceError::InvalidStateTransition { current, new } => {
                assert_eq!(current, TenantStatus::Pending);
                assert_eq!(new, TenantStatus::Active);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tenant_status(&orch, tenant.id).await, TenantStatus::Pending);
    }

    async fn tenant_status(orch: &GovernanceOrchestrator, id: Uuid) -> TenantStatus {
        orch.get_tenant(id).await.unwrap().status
    }

    #[tokio::test]
    async fn test_failed_provisioning_rolls_back_to_deleted() {
        let (orch, mem) = setup();
        mem.schemas.set_fail_create(true);

        let err = orch
            .create_tenant(
                "Gamma".into(),
                "gamma".into(),
                "ops@gamma.example".into(),
                None,
                SYSTEM_ACTOR,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::SchemaCreationFailed { .. }));
        assert_eq!(err.status_code(), 500);

        let page = orch.list_tenants(1, 10, Some(TenantStatus::Deleted)).await.unwrap();
        assert_eq!(page.total, 1);
        let tenant = &page.items[0];
        assert!(mem
            .notifier
            .sent_to(tenant.id)
            .contains(&TransitionAction::SendFailureNotification));
    }

    #[tokio::test]
    async fn test_rollback_with_failing_cleanup_still_deletes() {
        let (orch, mem) = setup();
        mem.schemas.set_fail_migrate(true);
        mem.schemas.set_fail_drop(true);

        let err = orch
            .create_tenant(
                "Eta".into(),
                "eta".into(),
                "ops@eta.example".into(),
                None,
                SYSTEM_ACTOR,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::SchemaCreationFailed { .. }));

        let deleted = orch.list_tenants(1, 10, Some(TenantStatus::Deleted)).await.unwrap();
        assert_eq!(deleted.total, 1);
        let stuck = orch
            .list_tenants(1, 10, Some(TenantStatus::Provisioning))
            .await
            .unwrap();
        assert_eq!(stuck.total, 0);
        assert!(mem.schemas.schema_exists("tenant_eta").await.unwrap());
    }

    #[tokio::test]
    async fn test_background_provisioning_rollback_with_failing_cleanup() {
        let mut config = AppConfig::default();
        config.retry.provisioning.max_retries = 0;
        let (ctx, mem) = GovernanceContext::in_memory(config);
        let orch = Arc::new(GovernanceOrchestrator::new(ctx));
        let runner = JobRunner::new(orch.clone());
        mem.schemas.set_fail_migrate(true);
        mem.schemas.set_fail_drop(true);

        let tenant = orch
            .register_tenant("Theta".into(), "theta".into(), "ops@theta.example".into(), None)
            .await
            .unwrap();
        assert!(runner.provision(tenant.id).await.is_err());
        assert_eq!(tenant_status(&orch, tenant.id).await, TenantStatus::Deleted);
    }

    #[tokio::test]
    async fn test_erasure_recovers_by_rerunning_failed_step() {
        let (orch, mem) = setup();
        let tenant = orch
            .create_tenant(
                "Iota".into(),
                "iota".into(),
                "ops@iota.example".into(),
                None,
                SYSTEM_ACTOR,
            )
            .await
            .unwrap();
        mem.tenant_data.seed_rows(tenant.id, 3);
        mem.schemas.set_fail_drop(true);

        let result = orch.execute_erasure(tenant.id, SYSTEM_ACTOR).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_steps(), vec![ErasureStep::DropSchema]);
        assert_eq!(tenant_status(&orch, tenant.id).await, TenantStatus::Suspended);

        mem.schemas.set_fail_drop(false);
        let step = orch
            .rerun_erasure_step(tenant.id, ErasureStep::DropSchema, SYSTEM_ACTOR)
            .await
            .unwrap();
        assert!(step.success);
        assert!(!mem.schemas.schema_exists("tenant_iota").await.unwrap());
        assert_eq!(tenant_status(&orch, tenant.id).await, TenantStatus::Suspended);
        assert!(!orch.get_tenant(tenant.id).await.unwrap().api_access_enabled);

        let entries = orch.chain().entries(tenant.id).await.unwrap();
        let erased = entries
            .iter()
            .filter(|e| e.action == AuditAction::DataErased)
            .count();
        assert_eq!(erased, 1);
        assert!(orch.verify_chain(tenant.id).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_concurrent_suspends_serialize() {
        let (orch, _) = setup();
        let tenant = orch
            .create_tenant(
                "Delta".into(),
                "delta".into(),
                "ops@delta.example".into(),
                None,
                SYSTEM_ACTOR,
            )
            .await
            .unwrap();
        let id = tenant.id;

        let a = tokio::spawn({
            let orch = orch.clone();
            async move { orch.suspend_tenant(id, SYSTEM_ACTOR).await }
        });
        let b = tokio::spawn({
            let orch = orch.clone();
            async move { orch.suspend_tenant(id, SYSTEM_ACTOR).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(GovernanceError::InvalidStateTransition {
                current: TenantStatus::Suspended,
                new: TenantStatus::Suspended,
            })
        )));

        // Creation plus exactly one suspension.
        let verification = orch.verify_chain(id).await.unwrap();
        assert!(verification.valid);
        assert_eq!(verification.total_entries, 2);
    }

    #[tokio::test]
    async fn test_tampering_is_detected() {
        let (orch, mem) = setup();
        let tenant = orch
            .create_tenant(
                "Epsilon".into(),
                "epsilon".into(),
                "ops@epsilon.example".into(),
                None,
                SYSTEM_ACTOR,
            )
            .await
            .unwrap();
        orch.record_login(tenant.id, Uuid::new_v4()).await.unwrap();
        orch.record_login(tenant.id, Uuid::new_v4()).await.unwrap();

        let entries = orch.chain().entries(tenant.id).await.unwrap();
        let mut forged = entries[1].clone();
        forged.actor_id = Uuid::new_v4();
        assert!(mem.ledger.overwrite_entry(tenant.id, 1, forged.clone()));

        let verification = orch.verify_chain(tenant.id).await.unwrap();
        assert!(!verification.valid);
        assert_eq!(verification.broken_at_index, Some(1));
        assert_eq!(verification.broken_entry_id, Some(forged.id));
    }

    #[tokio::test]
    async fn test_erasure_of_active_tenant() {
        let (orch, mem) = setup();
        let tenant = orch
            .create_tenant(
                "Zeta".into(),
                "zeta".into(),
                "ops@zeta.example".into(),
                None,
                SYSTEM_ACTOR,
            )
            .await
            .unwrap();
        mem.tenant_data.seed_rows(tenant.id, 12);

        let result = orch.execute_erasure(tenant.id, SYSTEM_ACTOR).await.unwrap();
        assert!(result.success);
        assert_eq!(result.steps.len(), 7);
        assert_eq!(result.records_deleted, 12);
        assert_eq!(result.schema_dropped.as_deref(), Some("tenant_zeta"));
        assert!(result.archive_path.is_some());
        assert_eq!(mem.keys.rotation_count(tenant.id), 1);

        let tenant = orch.get_tenant(tenant.id).await.unwrap();
        assert_eq!(tenant.status, TenantStatus::Deleted);
        assert!(orch.verify_chain(tenant.id).await.unwrap().valid);

        let err = orch.execute_erasure(tenant.id, SYSTEM_ACTOR).await.unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_cross_tenant_access_denied() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(ensure_tenant_scope(a, a).is_ok());
        let err = ensure_tenant_scope(a, b).unwrap_err();
        assert_eq!(err.status_code(), 403);
    }
}
