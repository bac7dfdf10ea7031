//! Flow-rule engine boundary.
//!
//! The engine that actually forwards packets is external; the control plane
//! only adds and deletes compiled directional rules through
//! [`FlowRuleEngine`]. [`InMemoryFlowEngine`] keeps the installed rule table
//! in memory and is what the daemon and tests run against.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use fabric_core::CompiledRule;
use thiserror::Error;
use tracing::debug;

/// Errors reported by a flow-rule engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rule {rule_id} rejected: {reason}")]
    Rejected { rule_id: String, reason: String },

    #[error("flow rule engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Unavailable(_))
    }
}

/// Accepts and retracts directional policy rules.
pub trait FlowRuleEngine: Send + Sync {
    fn add_rule(&self, rule: &CompiledRule) -> Result<(), EngineError>;
    fn delete_rule(&self, rule: &CompiledRule) -> Result<(), EngineError>;
}

/// Installed-rule table keyed by rule id.
#[derive(Clone, Default)]
pub struct InMemoryFlowEngine {
    rules: Arc<RwLock<BTreeMap<String, CompiledRule>>>,
}

impl InMemoryFlowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an installed rule.
    pub fn get(&self, rule_id: &str) -> Option<CompiledRule> {
        let rules = self.rules.read().expect("rules lock");
        rules.get(rule_id).cloned()
    }

    /// Ids of all installed rules, sorted.
    pub fn rule_ids(&self) -> Vec<String> {
        let rules = self.rules.read().expect("rules lock");
        rules.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rules.read().expect("rules lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FlowRuleEngine for InMemoryFlowEngine {
    fn add_rule(&self, rule: &CompiledRule) -> Result<(), EngineError> {
        let mut rules = self.rules.write().expect("rules lock");
        if rules.contains_key(&rule.rule_id) {
            return Err(EngineError::Rejected {
                rule_id: rule.rule_id.clone(),
                reason: "rule already installed".to_string(),
            });
        }
        rules.insert(rule.rule_id.clone(), rule.clone());
        debug!(rule_id = %rule.rule_id, "flow rule installed");
        Ok(())
    }

    fn delete_rule(&self, rule: &CompiledRule) -> Result<(), EngineError> {
        let mut rules = self.rules.write().expect("rules lock");
        if rules.remove(&rule.rule_id).is_none() {
            return Err(EngineError::Rejected {
                rule_id: rule.rule_id.clone(),
                reason: "rule not installed".to_string(),
            });
        }
        debug!(rule_id = %rule.rule_id, "flow rule removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_core::RuleAction;

    fn rule(id: &str) -> CompiledRule {
        CompiledRule {
            rule_id: id.to_string(),
            priority: 1,
            action: RuleAction::Allow,
            ip_protocol: 6,
            src_endpoint_group: 1,
            dst_endpoint_group: 2,
            src_ip_addr: None,
            dst_ip_addr: None,
            src_port: 0,
            dst_port: 80,
            tcp_flags: None,
        }
    }

    #[test]
    fn add_then_delete() {
        let engine = InMemoryFlowEngine::new();
        engine.add_rule(&rule("a")).unwrap();
        assert_eq!(engine.get("a").unwrap().dst_port, 80);

        engine.delete_rule(&rule("a")).unwrap();
        assert!(engine.is_empty());
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let engine = InMemoryFlowEngine::new();
        engine.add_rule(&rule("a")).unwrap();
        let err = engine.add_rule(&rule("a")).unwrap_err();
        assert!(matches!(err, EngineError::Rejected { .. }));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn deleting_unknown_rule_is_rejected() {
        let engine = InMemoryFlowEngine::new();
        assert!(engine.delete_rule(&rule("ghost")).is_err());
    }
}
