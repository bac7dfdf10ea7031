//! Intent file — VNF and VNF policy intents applied at start-up.
//!
//! ```json
//! {
//!   "vnfs": [{ "tenantName": "acme", "vnfName": "fw", "vtepIP": "192.168.1.10" }],
//!   "vnfPolicies": [{
//!     "key": "acme:web-to-app", "tenantName": "acme",
//!     "sourceUnit": "web", "destUnit": "app", "vnf": "fw",
//!     "rules": [{ "key": "r1", "direction": "in", "protocol": "tcp", "port": 80,
//!                 "fromEndpointGroup": "app" }]
//!   }]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use fabric_core::{VnfIntent, VnfPolicyIntent};
use fabric_policy::{Netmaster, PolicyError};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentFile {
    #[serde(default)]
    pub vnfs: Vec<VnfIntent>,
    #[serde(default)]
    pub vnf_policies: Vec<VnfPolicyIntent>,
}

/// Counts of intents by outcome.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    /// Already present, or ignored because policy handling is disabled.
    pub unchanged: usize,
    pub failed: usize,
}

impl IntentFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Apply VNFs first, then policies. Intents that already exist count as
    /// unchanged, so re-applying the same file after a restart is harmless.
    pub async fn apply(&self, master: &Netmaster) -> ApplySummary {
        let mut summary = ApplySummary::default();

        for intent in &self.vnfs {
            match master.create_vnf(intent).await {
                Ok(record) => {
                    debug!(vnf_id = %record.id, "vnf intent applied");
                    summary.applied += 1;
                }
                Err(PolicyError::AlreadyExists { .. }) => summary.unchanged += 1,
                Err(e) => {
                    warn!(vnf = %intent.vnf_name, error = %e, "vnf intent failed");
                    summary.failed += 1;
                }
            }
        }

        for intent in &self.vnf_policies {
            match master.create_vnf_policy(intent).await {
                Ok(Some(record)) => {
                    debug!(policy_key = %record.id, "vnf policy intent applied");
                    summary.applied += 1;
                }
                Ok(None) | Err(PolicyError::AlreadyExists { .. }) => summary.unchanged += 1,
                Err(e) => {
                    warn!(policy = %intent.key, error = %e, "vnf policy intent failed");
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use fabric_core::{EndpointGroup, FabricConfig, Vnf};
    use fabric_policy::{InMemoryFlowEngine, InMemoryObjectModel};
    use fabric_state::RedbStateDriver;

    const INTENTS: &str = r#"{
        "vnfs": [{ "tenantName": "acme", "vnfName": "fw", "vtepIP": "192.168.1.10" }],
        "vnfPolicies": [
            {
                "key": "acme:web-to-app", "tenantName": "acme",
                "sourceUnit": "web", "destUnit": "app", "vnf": "fw",
                "rules": [{ "key": "r1", "direction": "in", "protocol": "tcp", "port": 80,
                            "fromEndpointGroup": "app" }]
            },
            {
                "key": "acme:web-to-db", "tenantName": "acme",
                "sourceUnit": "web", "destUnit": "db", "vnf": "fw"
            }
        ]
    }"#;

    fn test_master(enabled: bool) -> Netmaster {
        let model = InMemoryObjectModel::new();
        for (name, id) in [("web", 1), ("app", 2)] {
            model.upsert_endpoint_group(EndpointGroup {
                tenant_name: "acme".to_string(),
                group_name: name.to_string(),
                network_name: "net".to_string(),
                endpoint_group_id: id,
            });
        }
        model.upsert_vnf(Vnf {
            tenant_name: "acme".to_string(),
            vnf_name: "fw".to_string(),
            vnf_type: "firewall".to_string(),
            traffic_action: String::new(),
            group: String::new(),
            labels: HashMap::new(),
        });

        let mut config = FabricConfig::default();
        config.policy.enabled = enabled;
        Netmaster::new(
            Arc::new(RedbStateDriver::open_in_memory().unwrap()),
            Arc::new(model),
            Arc::new(InMemoryFlowEngine::new()),
            &config,
        )
    }

    #[test]
    fn parse_intent_file() {
        let file = IntentFile::from_json_str(INTENTS).unwrap();
        assert_eq!(file.vnfs[0].vtep_ip, "192.168.1.10");
        assert_eq!(file.vnf_policies.len(), 2);
        assert_eq!(file.vnf_policies[0].rules[0].port, 80);
        assert!(file.vnf_policies[1].rules.is_empty());
    }

    #[test]
    fn unknown_direction_is_rejected() {
        let bad = INTENTS.replace("\"in\"", "\"inward\"");
        assert!(IntentFile::from_json_str(&bad).is_err());
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.json");
        std::fs::write(&path, INTENTS).unwrap();
        assert_eq!(IntentFile::load(&path).unwrap().vnfs.len(), 1);
    }

    #[tokio::test]
    async fn apply_counts_outcomes_and_is_repeatable() {
        let master = test_master(true);
        let file = IntentFile::from_json_str(INTENTS).unwrap();

        let first = file.apply(&master).await;
        assert_eq!(first, ApplySummary { applied: 2, unchanged: 0, failed: 1 });

        let second = file.apply(&master).await;
        assert_eq!(second, ApplySummary { applied: 0, unchanged: 2, failed: 1 });
        assert_eq!(master.policies().policy_keys().await, vec!["acme:1:2:fw"]);
    }

    #[tokio::test]
    async fn disabled_policies_count_as_unchanged() {
        let master = test_master(false);
        let file = IntentFile::from_json_str(INTENTS).unwrap();

        let summary = file.apply(&master).await;
        assert_eq!(summary, ApplySummary { applied: 1, unchanged: 2, failed: 0 });
    }
}
