//! Netmaster — administrative entry points for VNFs and VNF policies.
//!
//! Intents arrive by name; the facade resolves them against the object
//! model and hands fully resolved requests to the managers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use fabric_core::{
    FabricConfig, Rule, RuleMap, VnfInstance, VnfIntent, VnfPolicyIntent, VnfPolicyRecord,
    VnfRecord, ids,
};
use fabric_state::StateDriver;

use crate::engine::FlowRuleEngine;
use crate::error::{EntityKind, PolicyError, PolicyResult};
use crate::model::ObjectModel;
use crate::policy::{PolicyInstall, PolicyManager, RestoreStats};
use crate::repository::{ConfigRepository, RecordWatch};
use crate::vnf::VnfManager;

/// Outcome of a full restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub vnfs: RestoreStats,
    pub policies: RestoreStats,
}

pub struct Netmaster {
    driver: Arc<dyn StateDriver>,
    config_root: String,
    model: Arc<dyn ObjectModel>,
    vnfs: VnfManager,
    policies: PolicyManager,
    policy_enabled: bool,
    /// Held while a VNF is deleted or a policy is attached to one.
    attach: Mutex<()>,
}

impl Netmaster {
    pub fn new(
        driver: Arc<dyn StateDriver>,
        model: Arc<dyn ObjectModel>,
        engine: Arc<dyn FlowRuleEngine>,
        config: &FabricConfig,
    ) -> Self {
        let config_root = config.store.config_root.clone();
        Self {
            vnfs: VnfManager::new(driver.clone(), &config_root),
            policies: PolicyManager::new(driver.clone(), model.clone(), engine, &config_root),
            driver,
            config_root,
            model,
            policy_enabled: config.policy.enabled,
            attach: Mutex::new(()),
        }
    }

    /// Rebuild both caches from the store. VNFs are restored first.
    pub async fn restore(&self) -> PolicyResult<RestoreReport> {
        let vnfs = self.vnfs.restore().await?;
        let policies = self.policies.restore().await?;
        info!(
            vnfs = vnfs.restored,
            policies = policies.restored,
            skipped = vnfs.skipped + policies.skipped,
            "netmaster state restored"
        );
        Ok(RestoreReport { vnfs, policies })
    }

    // ── VNFs ──────────────────────────────────────────────────────

    pub async fn create_vnf(&self, intent: &VnfIntent) -> PolicyResult<VnfRecord> {
        self.vnfs.create(intent).await
    }

    /// Delete a VNF; refused with `InUse` while policies reference it.
    pub async fn delete_vnf(&self, tenant: &str, vnf_name: &str) -> PolicyResult<VnfRecord> {
        let vnf_id = ids::vnf_id(tenant, vnf_name);
        let _attach = self.attach.lock().await;
        let attached = self.policies.policies_for_vnf(&vnf_id).await;
        self.vnfs.delete(&vnf_id, attached).await
    }

    pub async fn update_vnf_labels(
        &self,
        vnf_id: &str,
        labels: HashMap<String, String>,
    ) -> PolicyResult<VnfRecord> {
        self.vnfs.update_labels(vnf_id, labels).await
    }

    pub async fn upsert_vnf_instance(
        &self,
        vnf_id: &str,
        instance: VnfInstance,
    ) -> PolicyResult<VnfRecord> {
        self.vnfs.upsert_instance(vnf_id, instance).await
    }

    pub async fn remove_vnf_instance(
        &self,
        vnf_id: &str,
        instance_name: &str,
    ) -> PolicyResult<VnfRecord> {
        self.vnfs.remove_instance(vnf_id, instance_name).await
    }

    // ── VNF policies ──────────────────────────────────────────────

    /// Create a VNF policy. Returns `None` when policy handling is disabled.
    pub async fn create_vnf_policy(
        &self,
        intent: &VnfPolicyIntent,
    ) -> PolicyResult<Option<VnfPolicyRecord>> {
        if !self.policy_enabled {
            info!(policy = %intent.key, "policy handling disabled, ignoring create");
            return Ok(None);
        }

        let request = self.resolve(intent)?;
        let _attach = self.attach.lock().await;
        self.policies.install(request).await.map(Some)
    }

    /// Delete a VNF policy. Returns `None` when policy handling is disabled.
    ///
    /// When the referenced objects no longer resolve, or resolve to ids that
    /// derive a key nothing is installed under, the policy is located by its
    /// administrative key instead.
    pub async fn delete_vnf_policy(
        &self,
        intent: &VnfPolicyIntent,
    ) -> PolicyResult<Option<VnfPolicyRecord>> {
        if !self.policy_enabled {
            info!(policy = %intent.key, "policy handling disabled, ignoring delete");
            return Ok(None);
        }

        let policy_key = match self.resolve(intent) {
            Ok(request) => request.policy_key(),
            Err(e @ PolicyError::NotFound { .. }) => {
                warn!(policy = %intent.key, error = %e, "policy objects unresolved, looking up by name");
                self.policies.key_for_name(&intent.key).await.ok_or(e)?
            }
            Err(e) => return Err(e),
        };

        match self.policies.uninstall(&policy_key).await {
            Err(
                e @ PolicyError::NotFound {
                    kind: EntityKind::VnfPolicy,
                    ..
                },
            ) => {
                let Some(named) = self.policies.key_for_name(&intent.key).await else {
                    return Err(e);
                };
                if named == policy_key {
                    return Err(e);
                }
                warn!(
                    policy = %intent.key,
                    derived = %policy_key,
                    installed = %named,
                    "derived policy key not installed, deleting by name"
                );
                self.policies.uninstall(&named).await.map(Some)
            }
            result => result.map(Some),
        }
    }

    pub async fn add_policy_rule(&self, policy_key: &str, rule: Rule) -> PolicyResult<RuleMap> {
        self.policies.add_rule(policy_key, rule).await
    }

    pub async fn remove_policy_rule(
        &self,
        policy_key: &str,
        rule_key: &str,
    ) -> PolicyResult<RuleMap> {
        self.policies.remove_rule(policy_key, rule_key).await
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn vnfs(&self) -> &VnfManager {
        &self.vnfs
    }

    pub fn policies(&self) -> &PolicyManager {
        &self.policies
    }

    /// Subscribe to VNF record changes in the store.
    pub fn watch_vnfs(&self) -> PolicyResult<RecordWatch<VnfRecord>> {
        let repo: ConfigRepository<VnfRecord> =
            ConfigRepository::new(self.driver.clone(), &self.config_root);
        repo.watch_all()
            .map_err(|e| PolicyError::store(repo.prefix(), e))
    }

    /// Subscribe to VNF policy record changes in the store.
    pub fn watch_policies(&self) -> PolicyResult<RecordWatch<VnfPolicyRecord>> {
        let repo: ConfigRepository<VnfPolicyRecord> =
            ConfigRepository::new(self.driver.clone(), &self.config_root);
        repo.watch_all()
            .map_err(|e| PolicyError::store(repo.prefix(), e))
    }

    /// Resolve a policy intent's endpoint groups and VNF.
    fn resolve(&self, intent: &VnfPolicyIntent) -> PolicyResult<PolicyInstall> {
        let tenant = &intent.tenant_name;

        let src_key = ids::object_key(tenant, &intent.source_unit);
        let src = self
            .model
            .find_endpoint_group(&src_key)
            .ok_or_else(|| PolicyError::not_found(EntityKind::EndpointGroup, src_key))?;

        let dest_key = ids::object_key(tenant, &intent.dest_unit);
        let dest = self
            .model
            .find_endpoint_group(&dest_key)
            .ok_or_else(|| PolicyError::not_found(EntityKind::EndpointGroup, dest_key))?;

        let vnf_key = ids::object_key(tenant, &intent.vnf);
        let vnf = self
            .model
            .find_vnf(&vnf_key)
            .ok_or_else(|| PolicyError::not_found(EntityKind::Vnf, vnf_key))?;

        Ok(PolicyInstall {
            policy_name: intent.key.clone(),
            tenant: tenant.clone(),
            src_unit_id: src.endpoint_group_id,
            dest_unit_id: dest.endpoint_group_id,
            vnf,
            rules: intent.rules.clone(),
        })
    }
}
