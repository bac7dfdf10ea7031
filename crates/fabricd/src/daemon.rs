//! Daemon run loop.
//!
//! In run mode, the daemon:
//! 1. Opens the state store named by the configuration
//! 2. Seeds the object model and creates the flow-rule engine
//! 3. Restores VNFs and VNF policies from the store
//! 4. Applies the optional intent file
//! 5. Logs store changes until Ctrl-C

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use fabric_core::{FabricConfig, VnfPolicyRecord, VnfRecord};
use fabric_policy::{InMemoryFlowEngine, InMemoryObjectModel, Netmaster, RecordEvent, RecordWatch};
use fabric_state::{RedbStateDriver, StateDriver};

use crate::intents::IntentFile;

pub async fn run(
    mut config: FabricConfig,
    data_dir: Option<PathBuf>,
    intents: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("Fabric daemon starting");

    if let Some(dir) = data_dir {
        config.store.path = Some(dir.join("fabric.redb"));
    }

    // ── Initialize subsystems ──────────────────────────────────

    let driver = open_store(&config)?;

    let model = Arc::new(InMemoryObjectModel::from_seed(&config.objects));
    info!(
        endpoint_groups = config.objects.endpoint_groups.len(),
        vnfs = config.objects.vnfs.len(),
        networks = config.objects.networks.len(),
        "object model seeded"
    );

    let engine = InMemoryFlowEngine::new();
    let master = Netmaster::new(driver, model, Arc::new(engine.clone()), &config);
    info!(
        config_root = %config.store.config_root,
        policy_enabled = config.policy.enabled,
        "netmaster initialized"
    );

    let report = master.restore().await?;
    info!(
        vnfs = report.vnfs.restored,
        policies = report.policies.restored,
        flow_rules = engine.len(),
        "state restored"
    );

    // Subscribe before applying intents so their changes are logged too.
    let vnf_watch = master.watch_vnfs()?;
    let policy_watch = master.watch_policies()?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let logger_handle = tokio::spawn(async move {
        log_changes(vnf_watch, policy_watch, shutdown_rx).await;
    });

    if let Some(path) = intents {
        let file = IntentFile::load(&path)?;
        let summary = file.apply(&master).await;
        info!(
            path = ?path,
            applied = summary.applied,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "intents applied"
        );
    }

    info!(flow_rules = engine.len(), "Fabric daemon ready");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = logger_handle.await;

    info!(flow_rules = engine.len(), "Fabric daemon stopped");
    Ok(())
}

fn open_store(config: &FabricConfig) -> anyhow::Result<Arc<dyn StateDriver>> {
    let driver = match &config.store.path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let driver = RedbStateDriver::open(path)?;
            info!(path = ?path, "state store opened");
            driver
        }
        None => {
            let driver = RedbStateDriver::open_in_memory()?;
            info!("in-memory state store opened; state will not survive a restart");
            driver
        }
    };
    Ok(Arc::new(driver))
}

/// Log every VNF and VNF policy change until shutdown.
async fn log_changes(
    mut vnfs: RecordWatch<VnfRecord>,
    mut policies: RecordWatch<VnfPolicyRecord>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            Some(event) = vnfs.next() => {
                let instances = event.curr.as_ref().map_or(0, |r| r.vnf_instances.len());
                info!(key = %event.key, change = change_kind(&event), instances, "vnf record changed");
            }
            Some(event) = policies.next() => {
                let rules = event.curr.as_ref().map_or(0, |r| r.rule_maps.len());
                info!(key = %event.key, change = change_kind(&event), rules, "vnf policy record changed");
            }
            _ = shutdown.changed() => break,
            else => break,
        }
    }
    debug!("change logger stopped");
}

fn change_kind<T>(event: &RecordEvent<T>) -> &'static str {
    match (&event.prev, &event.curr) {
        (_, None) => "deleted",
        (None, Some(_)) => "created",
        (Some(_), Some(_)) => "updated",
    }
}
