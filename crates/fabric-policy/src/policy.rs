//! Policy manager — the VNF policy lifecycle.
//!
//! The `PolicyManager` owns the in-memory policy cache and is the only
//! writer of VNF policy records. Every operation that checks the cache and
//! then acts on it holds the cache mutex for the whole sequence:
//! - Compiles declarative rules before touching the engine or the store
//! - Installs compiled rules, retracting them again if a later step fails
//! - Persists the record before the cache is updated
//! - Re-derives and re-installs persisted policies on restore

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use fabric_core::{CompiledRule, Rule, RuleMap, Vnf, VnfPolicyRecord, ids};
use fabric_state::StateDriver;

use crate::compiler::{PolicyContext, RuleCompiler};
use crate::engine::FlowRuleEngine;
use crate::error::{EntityKind, PolicyError, PolicyResult};
use crate::model::ObjectModel;
use crate::repository::ConfigRepository;

/// A fully resolved request to install a VNF policy.
#[derive(Debug, Clone)]
pub struct PolicyInstall {
    /// Administrative object key of the policy.
    pub policy_name: String,
    pub tenant: String,
    /// Endpoint group id of the source unit.
    pub src_unit_id: u32,
    /// Endpoint group id of the destination unit.
    pub dest_unit_id: u32,
    pub vnf: Vnf,
    pub rules: Vec<Rule>,
}

impl PolicyInstall {
    /// Derived identity of the policy this request creates.
    pub fn policy_key(&self) -> String {
        ids::vnf_policy_id(
            &self.tenant,
            self.src_unit_id,
            self.dest_unit_id,
            self.vnf.short_name(),
        )
    }
}

/// Outcome of a policy restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreStats {
    pub restored: usize,
    pub skipped: usize,
}

/// Installs, retracts and caches VNF policies.
pub struct PolicyManager {
    repo: ConfigRepository<VnfPolicyRecord>,
    model: Arc<dyn ObjectModel>,
    engine: Arc<dyn FlowRuleEngine>,
    /// Installed policies: policy key → record.
    cache: Mutex<HashMap<String, VnfPolicyRecord>>,
}

impl PolicyManager {
    pub fn new(
        driver: Arc<dyn StateDriver>,
        model: Arc<dyn ObjectModel>,
        engine: Arc<dyn FlowRuleEngine>,
        config_root: &str,
    ) -> Self {
        Self {
            repo: ConfigRepository::new(driver, config_root),
            model,
            engine,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Install a new policy.
    ///
    /// Nothing is cached unless every compiled rule was installed and the
    /// record was persisted.
    pub async fn install(&self, request: PolicyInstall) -> PolicyResult<VnfPolicyRecord> {
        let policy_key = request.policy_key();
        let mut cache = self.cache.lock().await;

        if cache.contains_key(&policy_key) {
            return Err(PolicyError::already_exists(EntityKind::VnfPolicy, policy_key));
        }

        let mut record = VnfPolicyRecord {
            id: policy_key.clone(),
            policy_name: request.policy_name,
            tenant: request.tenant,
            src_unit_id: request.src_unit_id,
            dest_unit_id: request.dest_unit_id,
            attached_vnf: request.vnf,
            rule_maps: BTreeMap::new(),
        };
        record.rule_maps = self.compile_rules(&record, &request.rules)?;

        self.install_rules(&policy_key, record.compiled_rules())?;

        if let Err(e) = self.repo.write(&record) {
            error!(%policy_key, error = %e, "failed to persist vnf policy, retracting rules");
            self.retract_rules(&policy_key, record.compiled_rules());
            return Err(PolicyError::store(self.repo.key(&policy_key), e));
        }

        info!(
            %policy_key,
            rules = record.rule_maps.len(),
            flow_rules = record.compiled_rules().count(),
            "vnf policy installed"
        );
        cache.insert(policy_key, record.clone());
        Ok(record)
    }

    /// Remove an installed policy.
    ///
    /// Rule retraction is best-effort; a failure to clear the record from
    /// the store is returned after the cache entry is already gone.
    pub async fn uninstall(&self, policy_key: &str) -> PolicyResult<VnfPolicyRecord> {
        let mut cache = self.cache.lock().await;

        let record = cache
            .remove(policy_key)
            .ok_or_else(|| PolicyError::not_found(EntityKind::VnfPolicy, policy_key))?;

        self.retract_rules(policy_key, record.compiled_rules());

        self.repo
            .clear(policy_key)
            .map_err(|e| PolicyError::store(self.repo.key(policy_key), e))?;

        info!(%policy_key, "vnf policy uninstalled");
        Ok(record)
    }

    /// Add one rule to an installed policy.
    pub async fn add_rule(&self, policy_key: &str, rule: Rule) -> PolicyResult<RuleMap> {
        let mut cache = self.cache.lock().await;

        let current = cache
            .get(policy_key)
            .ok_or_else(|| PolicyError::not_found(EntityKind::VnfPolicy, policy_key))?;
        if current.rule_maps.contains_key(&rule.key) {
            return Err(PolicyError::already_exists(
                EntityKind::Rule,
                ids::object_key(policy_key, &rule.key),
            ));
        }

        let compiler = RuleCompiler::new(self.model.as_ref());
        let map = compiler.compile(&PolicyContext::for_record(current), &rule)?;

        self.install_rules(policy_key, map.compiled.values())?;

        let mut updated = current.clone();
        updated.rule_maps.insert(rule.key.clone(), map.clone());
        if let Err(e) = self.repo.write(&updated) {
            error!(%policy_key, rule = %rule.key, error = %e, "failed to persist rule, retracting");
            self.retract_rules(policy_key, map.compiled.values());
            return Err(PolicyError::store(self.repo.key(policy_key), e));
        }

        cache.insert(policy_key.to_string(), updated);
        info!(%policy_key, rule = %rule.key, flow_rules = map.compiled.len(), "rule added");
        Ok(map)
    }

    /// Remove one rule from an installed policy.
    ///
    /// The updated record is persisted first so that a store failure leaves
    /// the engine and the cache untouched.
    pub async fn remove_rule(&self, policy_key: &str, rule_key: &str) -> PolicyResult<RuleMap> {
        let mut cache = self.cache.lock().await;

        let current = cache
            .get(policy_key)
            .ok_or_else(|| PolicyError::not_found(EntityKind::VnfPolicy, policy_key))?;

        let mut updated = current.clone();
        let Some(removed) = updated.rule_maps.remove(rule_key) else {
            return Err(PolicyError::not_found(
                EntityKind::Rule,
                ids::object_key(policy_key, rule_key),
            ));
        };

        self.repo
            .write(&updated)
            .map_err(|e| PolicyError::store(self.repo.key(policy_key), e))?;

        self.retract_rules(policy_key, removed.compiled.values());
        cache.insert(policy_key.to_string(), updated);

        info!(%policy_key, rule = %rule_key, "rule removed");
        Ok(removed)
    }

    /// Rebuild the cache from the store.
    ///
    /// Each persisted record is re-compiled from its declarative rules and
    /// re-installed. Records that cannot be decoded, re-derived or installed
    /// are logged and skipped; only a failed listing is an error.
    pub async fn restore(&self) -> PolicyResult<RestoreStats> {
        let entries = self
            .repo
            .read_all_entries()
            .map_err(|e| PolicyError::store(self.repo.prefix(), e))?;

        let mut cache = self.cache.lock().await;
        let mut stats = RestoreStats::default();

        for (key, decoded) in entries {
            let stored = match decoded {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(%key, error = %e, "skipping undecodable vnf policy record");
                    stats.skipped += 1;
                    continue;
                }
            };

            if cache.contains_key(&stored.id) {
                debug!(policy_key = %stored.id, "vnf policy already cached");
                continue;
            }

            match self.reinstall(&key, &stored) {
                Ok(record) => {
                    debug!(policy_key = %record.id, "vnf policy restored");
                    cache.insert(record.id.clone(), record);
                    stats.restored += 1;
                }
                Err(e) => {
                    warn!(%key, error = %e, "skipping vnf policy record");
                    stats.skipped += 1;
                }
            }
        }

        info!(
            restored = stats.restored,
            skipped = stats.skipped,
            "vnf policies restored"
        );
        Ok(stats)
    }

    // ── Queries ───────────────────────────────────────────────────

    pub async fn find(&self, policy_key: &str) -> Option<VnfPolicyRecord> {
        self.cache.lock().await.get(policy_key).cloned()
    }

    /// Keys of all installed policies, sorted.
    pub async fn policy_keys(&self) -> Vec<String> {
        let cache = self.cache.lock().await;
        let mut keys: Vec<String> = cache.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Key of the installed policy created under an administrative name.
    pub async fn key_for_name(&self, policy_name: &str) -> Option<String> {
        let cache = self.cache.lock().await;
        cache
            .values()
            .find(|record| record.policy_name == policy_name)
            .map(|record| record.id.clone())
    }

    /// Keys of installed policies attached to a VNF, sorted.
    pub async fn policies_for_vnf(&self, vnf_key: &str) -> Vec<String> {
        let cache = self.cache.lock().await;
        let mut keys: Vec<String> = cache
            .values()
            .filter(|record| record.attached_vnf.key() == vnf_key)
            .map(|record| record.id.clone())
            .collect();
        keys.sort();
        keys
    }

    // ── Internals ─────────────────────────────────────────────────

    /// Compile a rule set for a policy. Rule keys must be unique.
    fn compile_rules(
        &self,
        record: &VnfPolicyRecord,
        rules: &[Rule],
    ) -> PolicyResult<BTreeMap<String, RuleMap>> {
        let ctx = PolicyContext::for_record(record);
        let compiler = RuleCompiler::new(self.model.as_ref());

        let mut maps = BTreeMap::new();
        for rule in rules {
            if maps.contains_key(&rule.key) {
                return Err(PolicyError::already_exists(
                    EntityKind::Rule,
                    ids::object_key(&record.id, &rule.key),
                ));
            }
            maps.insert(rule.key.clone(), compiler.compile(&ctx, rule)?);
        }
        Ok(maps)
    }

    /// Re-derive a persisted record and install its rules.
    fn reinstall(&self, key: &str, stored: &VnfPolicyRecord) -> PolicyResult<VnfPolicyRecord> {
        let derived = ids::vnf_policy_id(
            &stored.tenant,
            stored.src_unit_id,
            stored.dest_unit_id,
            stored.attached_vnf.short_name(),
        );
        if stored.id != derived || key != self.repo.key(&derived) {
            return Err(PolicyError::validation(
                key,
                format!("record identity {} does not match derived key {derived}", stored.id),
            ));
        }

        let rules: Vec<Rule> = stored.rule_maps.values().map(|m| m.rule.clone()).collect();
        let mut record = stored.clone();
        record.rule_maps = self.compile_rules(stored, &rules)?;

        self.install_rules(&record.id, record.compiled_rules())?;
        Ok(record)
    }

    /// Install rules in order; on failure retract the ones already installed.
    fn install_rules<'r>(
        &self,
        policy_key: &str,
        rules: impl IntoIterator<Item = &'r CompiledRule>,
    ) -> PolicyResult<()> {
        let mut installed: Vec<&CompiledRule> = Vec::new();
        for rule in rules {
            if let Err(e) = self.engine.add_rule(rule) {
                error!(
                    %policy_key,
                    rule_id = %rule.rule_id,
                    error = %e,
                    rollback = installed.len(),
                    "flow rule install failed, rolling back"
                );
                self.retract_rules(policy_key, installed);
                return Err(e.into());
            }
            installed.push(rule);
        }
        Ok(())
    }

    /// Best-effort retraction.
    fn retract_rules<'r>(
        &self,
        policy_key: &str,
        rules: impl IntoIterator<Item = &'r CompiledRule>,
    ) {
        for rule in rules {
            if let Err(e) = self.engine.delete_rule(rule) {
                warn!(%policy_key, rule_id = %rule.rule_id, error = %e, "failed to retract flow rule");
            }
        }
    }
}
