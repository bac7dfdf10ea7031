//! Domain types for the Fabric control plane.
//!
//! Persisted records (`VnfRecord`, `VnfPolicyRecord`) are JSON-serialized
//! into the state store with camelCase field names. Maps whose order feeds
//! into compiled output use `BTreeMap` so that re-serialization after a
//! restore is byte-identical; label maps carry no ordering semantics.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids;

// ── Object model ──────────────────────────────────────────────────

/// An endpoint group as resolved from the tenant object model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointGroup {
    pub tenant_name: String,
    pub group_name: String,
    #[serde(default)]
    pub network_name: String,
    /// Numeric id used by the flow-rule engine to match group membership.
    pub endpoint_group_id: u32,
}

/// A VNF definition as resolved from the tenant object model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Vnf {
    pub tenant_name: String,
    pub vnf_name: String,
    #[serde(default)]
    pub vnf_type: String,
    #[serde(default)]
    pub traffic_action: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// A network as resolved from the tenant object model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub tenant_name: String,
    pub network_name: String,
    /// Subnet in CIDR notation, e.g. `10.1.0.0/16`.
    pub subnet: String,
}

impl EndpointGroup {
    pub fn key(&self) -> String {
        ids::object_key(&self.tenant_name, &self.group_name)
    }
}

impl Vnf {
    pub fn key(&self) -> String {
        ids::object_key(&self.tenant_name, &self.vnf_name)
    }

    /// The tenant-less name used in VNF policy identities.
    pub fn short_name(&self) -> &str {
        &self.vnf_name
    }
}

impl Network {
    pub fn key(&self) -> String {
        ids::object_key(&self.tenant_name, &self.network_name)
    }
}

// ── Rule model ────────────────────────────────────────────────────

/// Error returned when a rule field cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown rule direction {0:?}")]
pub struct ParseDirectionError(pub String);

/// Traffic direction of a declarative rule, relative to the owning group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    Both,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
            Direction::Both => "both",
        }
    }
}

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            "both" => Ok(Direction::Both),
            other => Err(ParseDirectionError(other.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP protocol selector of a declarative rule.
///
/// Serialized as the user-facing string (`"tcp"`, `"udp"`, `"47"`, `""`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    /// Match any protocol.
    #[default]
    Any,
    Tcp,
    Udp,
    Icmp,
    Igmp,
    /// A literal protocol number given by the user.
    Number(u8),
}

impl Protocol {
    /// Parse the user-facing protocol string.
    ///
    /// Names map through a fixed table; a numeric string up to 255 is taken
    /// literally; anything else degrades to `Any`.
    pub fn parse(s: &str) -> Self {
        match s {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "icmp" => Protocol::Icmp,
            "igmp" => Protocol::Igmp,
            "" => Protocol::Any,
            other => other.parse::<u8>().map_or(Protocol::Any, Protocol::Number),
        }
    }

    /// IP protocol number installed into the flow-rule engine (0 = any).
    pub fn number(self) -> u8 {
        match self {
            Protocol::Any => 0,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Icmp => 1,
            Protocol::Igmp => 2,
            Protocol::Number(n) => n,
        }
    }

    /// True for the port-carrying protocols named `tcp` or `udp`.
    pub fn has_ports(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

impl From<String> for Protocol {
    fn from(s: String) -> Self {
        Protocol::parse(&s)
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.to_string()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Any => Ok(()),
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
            Protocol::Icmp => f.write_str("icmp"),
            Protocol::Igmp => f.write_str("igmp"),
            Protocol::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Action applied to traffic matching a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    #[default]
    Allow,
    Deny,
}

/// A declarative policy rule as submitted by the administrative layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Rule key, unique within its policy.
    pub key: String,
    pub direction: Direction,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub action: RuleAction,
    #[serde(default)]
    pub protocol: Protocol,
    /// Port number; 0 means any.
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_endpoint_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_endpoint_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_ip_address: Option<String>,
}

impl Rule {
    /// A rule with no remote selector; add one with the `from_*`/`to_*` builders.
    pub fn new(key: &str, direction: Direction, protocol: Protocol, port: u16) -> Self {
        Self {
            key: key.to_string(),
            direction,
            priority: 0,
            action: RuleAction::Allow,
            protocol,
            port,
            from_endpoint_group: None,
            to_endpoint_group: None,
            from_network: None,
            to_network: None,
            from_ip_address: None,
            to_ip_address: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.action = action;
        self
    }

    pub fn from_group(mut self, group: &str) -> Self {
        self.from_endpoint_group = Some(group.to_string());
        self
    }

    pub fn to_group(mut self, group: &str) -> Self {
        self.to_endpoint_group = Some(group.to_string());
        self
    }

    pub fn from_net(mut self, network: &str) -> Self {
        self.from_network = Some(network.to_string());
        self
    }

    pub fn to_net(mut self, network: &str) -> Self {
        self.to_network = Some(network.to_string());
        self
    }

    pub fn from_ip(mut self, addr: &str) -> Self {
        self.from_ip_address = Some(addr.to_string());
        self
    }

    pub fn to_ip(mut self, addr: &str) -> Self {
        self.to_ip_address = Some(addr.to_string());
        self
    }
}

// ── Compiled rules ────────────────────────────────────────────────

/// The role of one directional rule within a bidirectional policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tag {
    /// Ingress request leg.
    InRx,
    /// Ingress response leg.
    InTx,
    /// Egress response leg.
    OutRx,
    /// Egress request leg.
    OutTx,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::InRx => "inRx",
            Tag::InTx => "inTx",
            Tag::OutRx => "outRx",
            Tag::OutTx => "outTx",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TCP flag predicate attached to a compiled rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TcpFlags {
    /// Connection-initiating segments only.
    #[serde(rename = "syn,!ack")]
    SynNotAck,
}

impl TcpFlags {
    pub fn as_str(self) -> &'static str {
        match self {
            TcpFlags::SynNotAck => "syn,!ack",
        }
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete directional rule installed into the flow-rule engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompiledRule {
    /// `{policy_key}:{rule_key}:{tag}`
    pub rule_id: String,
    pub priority: u32,
    pub action: RuleAction,
    /// IP protocol number (0 = any).
    pub ip_protocol: u8,
    /// Source endpoint group id (0 = any).
    pub src_endpoint_group: u32,
    /// Destination endpoint group id (0 = any).
    pub dst_endpoint_group: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ip_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_ip_addr: Option<String>,
    /// Source port (0 = any).
    pub src_port: u16,
    /// Destination port (0 = any).
    pub dst_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_flags: Option<TcpFlags>,
}

/// The expansion of one declarative rule into its directional rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuleMap {
    pub rule: Rule,
    /// Compiled rules keyed by rule id.
    pub compiled: BTreeMap<String, CompiledRule>,
}

impl RuleMap {
    /// Compiled rule ids in key order.
    pub fn rule_ids(&self) -> Vec<String> {
        self.compiled.keys().cloned().collect()
    }
}

// ── VNF ───────────────────────────────────────────────────────────

/// A running instance backing a VNF.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VnfInstance {
    pub name: String,
    #[serde(rename = "tenantName")]
    pub tenant: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Backing container reference.
    pub container_id: String,
    /// Endpoint reference of the instance's network attachment.
    pub endpoint_id: String,
}

/// Persisted configuration of a VNF, keyed by `{tenant}:{vnf_name}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VnfRecord {
    pub id: String,
    pub vnf_name: String,
    #[serde(rename = "tenantName")]
    pub tenant: String,
    pub traffic_action: String,
    pub vnf_type: String,
    /// Attachment group.
    pub group: String,
    #[serde(default)]
    pub vnf_labels: HashMap<String, String>,
    /// Tunnel endpoint address of the VNF's host.
    #[serde(rename = "vtepIP")]
    pub vtep_ip: String,
    #[serde(default)]
    pub vnf_instances: HashMap<String, VnfInstance>,
}

/// Create-VNF intent as delivered by the administrative layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VnfIntent {
    pub tenant_name: String,
    pub vnf_name: String,
    #[serde(default)]
    pub traffic_action: String,
    #[serde(default)]
    pub vnf_type: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub vnf_labels: HashMap<String, String>,
    #[serde(default, rename = "vtepIP")]
    pub vtep_ip: String,
    #[serde(default)]
    pub vnf_instances: Vec<VnfInstance>,
}

impl VnfRecord {
    pub fn from_intent(intent: &VnfIntent) -> Self {
        Self {
            id: ids::vnf_id(&intent.tenant_name, &intent.vnf_name),
            vnf_name: intent.vnf_name.clone(),
            tenant: intent.tenant_name.clone(),
            traffic_action: intent.traffic_action.clone(),
            vnf_type: intent.vnf_type.clone(),
            group: intent.group.clone(),
            vnf_labels: intent.vnf_labels.clone(),
            vtep_ip: intent.vtep_ip.clone(),
            vnf_instances: intent
                .vnf_instances
                .iter()
                .map(|inst| (inst.name.clone(), inst.clone()))
                .collect(),
        }
    }
}

// ── VNF policy ────────────────────────────────────────────────────

/// Persisted VNF policy between a source and destination endpoint group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VnfPolicyRecord {
    /// Derived identity, see [`ids::vnf_policy_id`].
    pub id: String,
    /// Object key the administrative layer used for this policy.
    pub policy_name: String,
    #[serde(rename = "tenantName")]
    pub tenant: String,
    /// Source endpoint group id; rules are compiled relative to this group.
    #[serde(rename = "srcUnitID")]
    pub src_unit_id: u32,
    #[serde(rename = "destUnitID")]
    pub dest_unit_id: u32,
    pub attached_vnf: Vnf,
    #[serde(default)]
    pub rule_maps: BTreeMap<String, RuleMap>,
}

impl VnfPolicyRecord {
    /// Every compiled rule of every rule map.
    pub fn compiled_rules(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rule_maps.values().flat_map(|m| m.compiled.values())
    }

    /// All compiled rule ids, sorted.
    pub fn compiled_rule_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.compiled_rules().map(|r| r.rule_id.clone()).collect();
        ids.sort();
        ids
    }
}

/// Create/delete VNF-policy intent as delivered by the administrative layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VnfPolicyIntent {
    /// Administrative object key of the policy.
    pub key: String,
    pub tenant_name: String,
    /// Source endpoint group name.
    pub source_unit: String,
    /// Destination endpoint group name.
    pub dest_unit: String,
    /// VNF name within the tenant.
    pub vnf: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}
