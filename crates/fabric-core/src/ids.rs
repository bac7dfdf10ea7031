//! Deterministic identity schemes.
//!
//! Every identity is a pure function of its inputs so that records written
//! before a restart resolve to the same keys afterwards.

use crate::types::Tag;

/// Key used by the object model for tenant-scoped entities: `{tenant}:{name}`.
pub fn object_key(tenant: &str, name: &str) -> String {
    format!("{tenant}:{name}")
}

/// Identity of a VNF record: `{tenant}:{vnf_name}`.
pub fn vnf_id(tenant: &str, vnf_name: &str) -> String {
    object_key(tenant, vnf_name)
}

/// Identity of a VNF policy: `{tenant}:{src_unit_id}:{dest_unit_id}:{vnf_short_name}`.
pub fn vnf_policy_id(
    tenant: &str,
    src_unit_id: u32,
    dest_unit_id: u32,
    vnf_short_name: &str,
) -> String {
    format!("{tenant}:{src_unit_id}:{dest_unit_id}:{vnf_short_name}")
}

/// Identity of one compiled directional rule: `{policy_key}:{rule_key}:{tag}`.
pub fn compiled_rule_id(policy_key: &str, rule_key: &str, tag: Tag) -> String {
    format!("{policy_key}:{rule_key}:{tag}")
}
