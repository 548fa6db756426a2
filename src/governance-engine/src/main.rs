//! Governance Engine: tenant lifecycle, audit ledger, retention and erasure.
//!
//! Runs a single governance node over the in-memory backends, seeds a set of
//! demo tenants, exercises the compliance flows and then drives the
//! scheduled retention sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use governance_core::config::AppConfig;
use governance_core::Tenant;
use governance_platform::{
    DataCategory, GovernanceContext, GovernanceOrchestrator, InMemoryBackends, JobRunner,
};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "governance-engine")]
#[command(about = "Tenant lifecycle, audit ledger, retention and erasure engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "GOVERNANCE__NODE_ID")]
    node_id: Option<String>,

    /// Maximum tenants cleaned concurrently during a sweep (overrides config)
    #[arg(long, env = "GOVERNANCE__SWEEP__MAX_CONCURRENCY")]
    sweep_concurrency: Option<usize>,

    /// Seconds between retention sweeps (overrides config)
    #[arg(long, env = "GOVERNANCE__SWEEP__INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,

    /// Number of demo tenants to seed
    #[arg(long, default_value_t = 4)]
    demo_tenants: usize,

    /// Run one retention sweep and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = AppConfig::load();
    let mut config = loaded.as_ref().cloned().unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .json()
        .init();

    if let Err(e) = &loaded {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(concurrency) = cli.sweep_concurrency {
        config.sweep.max_concurrency = concurrency;
    }
    if let Some(secs) = cli.sweep_interval_secs {
        config.sweep.interval_secs = secs;
    }

    info!(
        node_id = %config.node_id,
        sweep_concurrency = config.sweep.max_concurrency,
        sweep_interval_secs = config.sweep.interval_secs,
        external_call_ms = config.timeouts.external_call_ms,
        "Configuration loaded"
    );

    let interval = Duration::from_secs(config.sweep.interval_secs.max(1));
    let (ctx, backends) = GovernanceContext::in_memory(config);
    let orch = Arc::new(GovernanceOrchestrator::new(ctx));
    let runner = JobRunner::new(orch.clone());

    let tenants = seed_tenants(&orch, &runner, &backends, cli.demo_tenants).await?;
    info!(tenants = tenants.len(), "Demo tenants provisioned");

    if let Err(e) = run_compliance_demo(&orch, &runner, &tenants).await {
        error!(error = %e, "Compliance demo failed");
    }

    if cli.once {
        let report = runner.run_retention_sweep().await?;
        info!(?report, "Retention sweep complete");
        return Ok(());
    }

    info!("Governance engine is running");
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match runner.run_retention_sweep().await {
                    Ok(report) => info!(?report, "Retention sweep complete"),
                    Err(e) => error!(error = %e, "Retention sweep failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Governance engine shut down");
    Ok(())
}

async fn seed_tenants(
    orch: &GovernanceOrchestrator,
    runner: &JobRunner,
    backends: &InMemoryBackends,
    count: usize,
) -> anyhow::Result<Vec<Tenant>> {
    let now = Utc::now();
    let mut tenants = Vec::with_capacity(count);
    for i in 0..count {
        let slug = format!("demo-{i:02}");
        let tenant = orch
            .register_tenant(
                format!("Demo Tenant {i}"),
                slug.clone(),
                format!("dpo@{slug}.example"),
                None,
            )
            .await?;
        let tenant = runner.provision(tenant.id).await?;

        backends.tenant_data.seed_rows(tenant.id, 100 + i as u64);
        for (n, category) in DataCategory::ALL.iter().enumerate() {
            let age = chrono::Duration::days(30 * (n as i64 + 1) + 400);
            backends
                .retention
                .seed_record(tenant.id, *category, &format!("{slug}-old-{n}"), now - age);
            backends.retention.seed_record(
                tenant.id,
                *category,
                &format!("{slug}-new-{n}"),
                now - chrono::Duration::days(1),
            );
        }
        tenants.push(tenant);
    }
    Ok(tenants)
}

async fn run_compliance_demo(
    orch: &GovernanceOrchestrator,
    runner: &JobRunner,
    tenants: &[Tenant],
) -> anyhow::Result<()> {
    let Some(first) = tenants.first() else {
        return Ok(());
    };
    let operator = Uuid::new_v4();

    orch.record_login(first.id, operator).await?;
    orch.suspend_tenant(first.id, operator).await?;
    orch.activate_tenant(first.id, operator).await?;

    let job = orch.request_data_export(first.id, operator).await?;
    let job = runner.process_export(&job.job_id).await?;
    info!(tenant_id = %first.id, status = ?job.status, url = ?job.download_url, "Export processed");

    if let Some(last) = tenants.get(1..).and_then(|rest| rest.last()) {
        let result = runner.erase(last.id).await?;
        info!(
            tenant_id = %last.id,
            success = result.success,
            records_deleted = result.records_deleted,
            "Erasure finished"
        );
    }

    for tenant in tenants {
        let verification = orch.verify_chain(tenant.id).await?;
        info!(
            tenant_id = %tenant.id,
            valid = verification.valid,
            entries = verification.total_entries,
            "Audit chain verified"
        );
    }
    Ok(())
}
