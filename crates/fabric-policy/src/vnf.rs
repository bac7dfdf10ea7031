//! VNF manager — CRUD for VNF records with a write-through cache.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fabric_core::{VnfInstance, VnfIntent, VnfRecord, ids};
use fabric_state::StateDriver;

use crate::error::{EntityKind, PolicyError, PolicyResult};
use crate::policy::RestoreStats;
use crate::repository::ConfigRepository;

/// Owns the VNF records of one control-plane instance.
pub struct VnfManager {
    repo: ConfigRepository<VnfRecord>,
    /// vnf id → record.
    cache: Mutex<HashMap<String, VnfRecord>>,
}

impl VnfManager {
    pub fn new(driver: Arc<dyn StateDriver>, config_root: &str) -> Self {
        Self {
            repo: ConfigRepository::new(driver, config_root),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create(&self, intent: &VnfIntent) -> PolicyResult<VnfRecord> {
        let record = VnfRecord::from_intent(intent);
        let mut cache = self.cache.lock().await;

        if cache.contains_key(&record.id) {
            return Err(PolicyError::already_exists(EntityKind::VnfRecord, record.id));
        }

        self.persist(&record)?;
        info!(vnf_id = %record.id, instances = record.vnf_instances.len(), "vnf created");
        cache.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Delete a VNF record. `attached` lists the policies that still
    /// reference the VNF; deletion is refused while it is non-empty.
    pub async fn delete(&self, vnf_id: &str, attached: Vec<String>) -> PolicyResult<VnfRecord> {
        if !attached.is_empty() {
            return Err(PolicyError::InUse {
                key: vnf_id.to_string(),
                policies: attached,
            });
        }

        let mut cache = self.cache.lock().await;
        if !cache.contains_key(vnf_id) {
            return Err(PolicyError::not_found(EntityKind::VnfRecord, vnf_id));
        }

        self.repo
            .clear(vnf_id)
            .map_err(|e| PolicyError::store(self.repo.key(vnf_id), e))?;

        let record = cache
            .remove(vnf_id)
            .ok_or_else(|| PolicyError::not_found(EntityKind::VnfRecord, vnf_id))?;
        info!(%vnf_id, "vnf deleted");
        Ok(record)
    }

    /// Replace the label set of a VNF.
    pub async fn update_labels(
        &self,
        vnf_id: &str,
        labels: HashMap<String, String>,
    ) -> PolicyResult<VnfRecord> {
        self.update(vnf_id, |record| {
            record.vnf_labels = labels;
            Ok(())
        })
        .await
    }

    /// Add or replace an instance, keyed by its name.
    pub async fn upsert_instance(
        &self,
        vnf_id: &str,
        instance: VnfInstance,
    ) -> PolicyResult<VnfRecord> {
        self.update(vnf_id, |record| {
            record.vnf_instances.insert(instance.name.clone(), instance);
            Ok(())
        })
        .await
    }

    pub async fn remove_instance(&self, vnf_id: &str, instance_name: &str) -> PolicyResult<VnfRecord> {
        self.update(vnf_id, |record| {
            record
                .vnf_instances
                .remove(instance_name)
                .map(|_| ())
                .ok_or_else(|| {
                    PolicyError::not_found(
                        EntityKind::VnfInstance,
                        ids::object_key(vnf_id, instance_name),
                    )
                })
        })
        .await
    }

    pub async fn find(&self, vnf_id: &str) -> Option<VnfRecord> {
        self.cache.lock().await.get(vnf_id).cloned()
    }

    /// Ids of all cached VNFs, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let cache = self.cache.lock().await;
        let mut ids: Vec<String> = cache.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Load every persisted VNF record into the cache, skipping entries
    /// that cannot be decoded or whose identity does not match their key.
    pub async fn restore(&self) -> PolicyResult<RestoreStats> {
        let entries = self
            .repo
            .read_all_entries()
            .map_err(|e| PolicyError::store(self.repo.prefix(), e))?;

        let mut cache = self.cache.lock().await;
        let mut stats = RestoreStats::default();

        for (key, decoded) in entries {
            let record = match decoded {
                Ok(record) => record,
                Err(e) => {
                    warn!(%key, error = %e, "skipping undecodable vnf record");
                    stats.skipped += 1;
                    continue;
                }
            };

            let derived = ids::vnf_id(&record.tenant, &record.vnf_name);
            if record.id != derived || key != self.repo.key(&derived) {
                warn!(%key, vnf_id = %record.id, "skipping vnf record with mismatched identity");
                stats.skipped += 1;
                continue;
            }

            debug!(vnf_id = %record.id, "vnf restored");
            cache.insert(derived, record);
            stats.restored += 1;
        }

        info!(restored = stats.restored, skipped = stats.skipped, "vnfs restored");
        Ok(stats)
    }

    /// Apply a mutation to a copy of the cached record, persist it, then
    /// swap it into the cache.
    async fn update<F>(&self, vnf_id: &str, mutate: F) -> PolicyResult<VnfRecord>
    where
        F: FnOnce(&mut VnfRecord) -> PolicyResult<()>,
    {
        let mut cache = self.cache.lock().await;
        let mut record = cache
            .get(vnf_id)
            .cloned()
            .ok_or_else(|| PolicyError::not_found(EntityKind::VnfRecord, vnf_id))?;

        mutate(&mut record)?;
        self.persist(&record)?;

        debug!(%vnf_id, "vnf updated");
        cache.insert(vnf_id.to_string(), record.clone());
        Ok(record)
    }

    fn persist(&self, record: &VnfRecord) -> PolicyResult<()> {
        self.repo
            .write(record)
            .map_err(|e| PolicyError::store(self.repo.key(&record.id), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_state::RedbStateDriver;

    const ROOT: &str = "/fabric/state";

    fn test_driver() -> Arc<dyn StateDriver> {
        Arc::new(RedbStateDriver::open_in_memory().unwrap())
    }

    fn test_intent(name: &str) -> VnfIntent {
        VnfIntent {
            tenant_name: "acme".to_string(),
            vnf_name: name.to_string(),
            traffic_action: "redirect".to_string(),
            vnf_type: "firewall".to_string(),
            group: "svc".to_string(),
            vnf_labels: HashMap::from([("tier".to_string(), "edge".to_string())]),
            vtep_ip: "192.168.1.10".to_string(),
            vnf_instances: vec![test_instance("fw-0")],
        }
    }

    fn test_instance(name: &str) -> VnfInstance {
        VnfInstance {
            name: name.to_string(),
            tenant: "acme".to_string(),
            labels: HashMap::new(),
            container_id: format!("c-{name}"),
            endpoint_id: format!("ep-{name}"),
        }
    }

    #[tokio::test]
    async fn create_persists_and_rejects_duplicates() {
        let driver = test_driver();
        let vnfs = VnfManager::new(driver.clone(), ROOT);

        let record = vnfs.create(&test_intent("fw")).await.unwrap();
        assert_eq!(record.id, "acme:fw");

        let repo: ConfigRepository<VnfRecord> = ConfigRepository::new(driver, ROOT);
        assert_eq!(repo.read("acme:fw").unwrap(), record);

        let err = vnfs.create(&test_intent("fw")).await.unwrap_err();
        assert!(matches!(err, PolicyError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn delete_refuses_while_attached() {
        let vnfs = VnfManager::new(test_driver(), ROOT);
        vnfs.create(&test_intent("fw")).await.unwrap();

        let err = vnfs
            .delete("acme:fw", vec!["acme:1:2:fw".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::InUse { ref policies, .. } if policies.len() == 1));
        assert!(vnfs.find("acme:fw").await.is_some());

        vnfs.delete("acme:fw", vec![]).await.unwrap();
        assert!(vnfs.find("acme:fw").await.is_none());
        assert!(matches!(
            vnfs.delete("acme:fw", vec![]).await,
            Err(PolicyError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn labels_and_instances_are_written_through() {
        let driver = test_driver();
        let vnfs = VnfManager::new(driver.clone(), ROOT);
        vnfs.create(&test_intent("fw")).await.unwrap();

        vnfs.update_labels("acme:fw", HashMap::from([("zone".to_string(), "b".to_string())]))
            .await
            .unwrap();
        vnfs.upsert_instance("acme:fw", test_instance("fw-1")).await.unwrap();
        let record = vnfs.remove_instance("acme:fw", "fw-0").await.unwrap();

        assert_eq!(record.vnf_labels.len(), 1);
        assert_eq!(record.vnf_labels["zone"], "b");
        assert_eq!(record.vnf_instances.keys().collect::<Vec<_>>(), vec!["fw-1"]);

        let repo: ConfigRepository<VnfRecord> = ConfigRepository::new(driver, ROOT);
        assert_eq!(repo.read("acme:fw").unwrap(), record);

        let err = vnfs.remove_instance("acme:fw", "fw-0").await.unwrap_err();
        assert!(matches!(err, PolicyError::NotFound { kind: EntityKind::VnfInstance, .. }));
        assert_eq!(vnfs.find("acme:fw").await, Some(record));
    }

    #[tokio::test]
    async fn updating_unknown_vnf_is_not_found() {
        let vnfs = VnfManager::new(test_driver(), ROOT);
        let err = vnfs.update_labels("acme:none", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, PolicyError::NotFound { kind: EntityKind::VnfRecord, .. }));
    }

    #[tokio::test]
    async fn restore_loads_valid_records() {
        let driver = test_driver();
        let vnfs = VnfManager::new(driver.clone(), ROOT);
        vnfs.create(&test_intent("fw")).await.unwrap();
        vnfs.create(&test_intent("lb")).await.unwrap();
        driver.write("/fabric/state/vnf/acme:junk", b"[1,2").unwrap();

        let restarted = VnfManager::new(driver, ROOT);
        let stats = restarted.restore().await.unwrap();
        assert_eq!(stats, RestoreStats { restored: 2, skipped: 1 });
        assert_eq!(restarted.ids().await, vec!["acme:fw", "acme:lb"]);
    }
}
