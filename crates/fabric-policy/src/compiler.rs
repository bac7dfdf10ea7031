//! Rule compiler — expands a declarative rule into directional flow rules.
//!
//! A rule is written from the point of view of the policy's owning group.
//! Enforcing it in both directions takes up to four flow rules, one per
//! [`Tag`]:
//!
//! | direction | tcp/udp with port | tags                         |
//! |-----------|-------------------|------------------------------|
//! | in        | yes               | inRx, inTx                   |
//! | in        | no                | inRx                         |
//! | out       | yes               | outRx, outTx                 |
//! | out       | no                | outTx                        |
//! | both      | yes               | inRx, inTx, outRx, outTx     |
//! | both      | no                | inRx, outTx                  |
//!
//! The `Rx` legs match traffic arriving at the owner, the `Tx` legs traffic
//! leaving it. When no port is given for TCP, the request legs only match
//! `syn,!ack` so that return traffic is left to connection tracking.

use std::collections::BTreeMap;

use fabric_core::{
    CompiledRule, Direction, Protocol, Rule, RuleMap, Tag, TcpFlags, VnfPolicyRecord, ids,
};
use tracing::debug;

use crate::error::{EntityKind, PolicyError, PolicyResult};
use crate::model::ObjectModel;

/// The policy a rule is compiled for.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    pub policy_key: &'a str,
    pub tenant: &'a str,
    /// Endpoint group the rules are written relative to.
    pub owner_group_id: u32,
}

impl<'a> PolicyContext<'a> {
    pub fn for_record(record: &'a VnfPolicyRecord) -> Self {
        Self {
            policy_key: &record.id,
            tenant: &record.tenant,
            owner_group_id: record.src_unit_id,
        }
    }
}

/// Tags needed to enforce a rule with the given direction, protocol and port.
pub fn directional_tags(direction: Direction, protocol: Protocol, port: u16) -> &'static [Tag] {
    let with_ports = protocol.has_ports() && port != 0;
    match (direction, with_ports) {
        (Direction::In, true) => &[Tag::InRx, Tag::InTx],
        (Direction::In, false) => &[Tag::InRx],
        (Direction::Out, true) => &[Tag::OutRx, Tag::OutTx],
        (Direction::Out, false) => &[Tag::OutTx],
        (Direction::Both, true) => &[Tag::InRx, Tag::InTx, Tag::OutRx, Tag::OutTx],
        (Direction::Both, false) => &[Tag::InRx, Tag::OutTx],
    }
}

/// What a rule matches on the far side of the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteMatch {
    /// Remote endpoint group id, 0 when matching by address.
    group_id: u32,
    from_ip: Option<String>,
    to_ip: Option<String>,
}

/// Compiles declarative rules against the object model.
pub struct RuleCompiler<'a> {
    model: &'a dyn ObjectModel,
}

impl<'a> RuleCompiler<'a> {
    pub fn new(model: &'a dyn ObjectModel) -> Self {
        Self { model }
    }

    /// Compile one rule into its rule map.
    ///
    /// Fails without side effects when the rule is malformed or names a
    /// remote group or network the object model does not know.
    pub fn compile(&self, ctx: &PolicyContext<'_>, rule: &Rule) -> PolicyResult<RuleMap> {
        if rule.key.is_empty() {
            return Err(PolicyError::validation(ctx.policy_key, "rule key is empty"));
        }

        let remote = self.resolve_remote(ctx.tenant, rule)?;
        let compiled: BTreeMap<String, CompiledRule> =
            directional_tags(rule.direction, rule.protocol, rule.port)
                .iter()
                .map(|&tag| {
                    let compiled = directional_rule(ctx, rule, &remote, tag);
                    (compiled.rule_id.clone(), compiled)
                })
                .collect();

        debug!(
            policy = ctx.policy_key,
            rule = %rule.key,
            direction = %rule.direction,
            count = compiled.len(),
            "rule compiled"
        );

        Ok(RuleMap {
            rule: rule.clone(),
            compiled,
        })
    }

    /// Resolve the rule's remote side.
    ///
    /// Endpoint groups take precedence over networks; within each, the
    /// `from` side is checked before the `to` side.
    fn resolve_remote(&self, tenant: &str, rule: &Rule) -> PolicyResult<RemoteMatch> {
        let group = rule
            .from_endpoint_group
            .as_deref()
            .or(rule.to_endpoint_group.as_deref());
        if let Some(group) = group {
            let key = ids::object_key(tenant, group);
            let epg = self
                .model
                .find_endpoint_group(&key)
                .ok_or_else(|| PolicyError::not_found(EntityKind::EndpointGroup, key))?;
            return Ok(RemoteMatch {
                group_id: epg.endpoint_group_id,
                from_ip: rule.from_ip_address.clone(),
                to_ip: rule.to_ip_address.clone(),
            });
        }

        if let Some(network) = rule.from_network.as_deref() {
            let subnet = self.network_subnet(tenant, network)?;
            return Ok(RemoteMatch {
                group_id: 0,
                from_ip: Some(subnet),
                to_ip: rule.to_ip_address.clone(),
            });
        }

        if let Some(network) = rule.to_network.as_deref() {
            let subnet = self.network_subnet(tenant, network)?;
            return Ok(RemoteMatch {
                group_id: 0,
                from_ip: rule.from_ip_address.clone(),
                to_ip: Some(subnet),
            });
        }

        Err(PolicyError::validation(
            &rule.key,
            "rule names neither a remote endpoint group nor a remote network",
        ))
    }

    fn network_subnet(&self, tenant: &str, network: &str) -> PolicyResult<String> {
        let key = ids::object_key(tenant, network);
        self.model
            .find_network(&key)
            .map(|net| net.subnet)
            .ok_or_else(|| PolicyError::not_found(EntityKind::Network, key))
    }
}

/// Build the flow rule for one tag.
fn directional_rule(
    ctx: &PolicyContext<'_>,
    rule: &Rule,
    remote: &RemoteMatch,
    tag: Tag,
) -> CompiledRule {
    let syn_only = (rule.protocol == Protocol::Tcp && rule.port == 0).then_some(TcpFlags::SynNotAck);

    let mut compiled = CompiledRule {
        rule_id: ids::compiled_rule_id(ctx.policy_key, &rule.key, tag),
        priority: rule.priority,
        action: rule.action,
        ip_protocol: rule.protocol.number(),
        src_endpoint_group: 0,
        dst_endpoint_group: 0,
        src_ip_addr: None,
        dst_ip_addr: None,
        src_port: 0,
        dst_port: 0,
        tcp_flags: None,
    };

    match tag {
        Tag::InRx => {
            compiled.dst_endpoint_group = ctx.owner_group_id;
            compiled.src_endpoint_group = remote.group_id;
            compiled.src_ip_addr = remote.from_ip.clone();
            compiled.dst_port = rule.port;
            compiled.tcp_flags = syn_only;
        }
        Tag::InTx => {
            compiled.src_endpoint_group = ctx.owner_group_id;
            compiled.dst_endpoint_group = remote.group_id;
            compiled.dst_ip_addr = remote.from_ip.clone();
            compiled.src_port = rule.port;
        }
        Tag::OutRx => {
            compiled.dst_endpoint_group = ctx.owner_group_id;
            compiled.src_endpoint_group = remote.group_id;
            compiled.src_ip_addr = remote.to_ip.clone();
            compiled.src_port = rule.port;
        }
        Tag::OutTx => {
            compiled.src_endpoint_group = ctx.owner_group_id;
            compiled.dst_endpoint_group = remote.group_id;
            compiled.dst_ip_addr = remote.to_ip.clone();
            compiled.dst_port = rule.port;
            compiled.tcp_flags = syn_only;
        }
    }

    compiled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InMemoryObjectModel;
    use fabric_core::{EndpointGroup, Network, RuleAction};

    fn test_model() -> InMemoryObjectModel {
        let model = InMemoryObjectModel::new();
        for (name, id) in [("g1", 1), ("g2", 2)] {
            model.upsert_endpoint_group(EndpointGroup {
                tenant_name: "acme".to_string(),
                group_name: name.to_string(),
                network_name: "net".to_string(),
                endpoint_group_id: id,
            });
        }
        model.upsert_network(Network {
            tenant_name: "acme".to_string(),
            network_name: "ext".to_string(),
            subnet: "172.16.0.0/24".to_string(),
        });
        model
    }

    fn ctx() -> PolicyContext<'static> {
        PolicyContext {
            policy_key: "acme:1:2:fw",
            tenant: "acme",
            owner_group_id: 1,
        }
    }

    fn tags_of(map: &RuleMap) -> Vec<String> {
        map.compiled
            .keys()
            .map(|id| id.rsplit(':').next().unwrap().to_string())
            .collect()
    }

    fn by_tag<'m>(map: &'m RuleMap, tag: Tag) -> &'m CompiledRule {
        &map.compiled[&ids::compiled_rule_id("acme:1:2:fw", &map.rule.key, tag)]
    }

    #[test]
    fn direction_table() {
        use Direction::*;
        let cases: [(Direction, Protocol, u16, &[Tag]); 12] = [
            (In, Protocol::Tcp, 80, &[Tag::InRx, Tag::InTx]),
            (In, Protocol::Udp, 53, &[Tag::InRx, Tag::InTx]),
            (In, Protocol::Tcp, 0, &[Tag::InRx]),
            (In, Protocol::Icmp, 7, &[Tag::InRx]),
            (Out, Protocol::Udp, 53, &[Tag::OutRx, Tag::OutTx]),
            (Out, Protocol::Tcp, 0, &[Tag::OutTx]),
            (Out, Protocol::Any, 0, &[Tag::OutTx]),
            (Out, Protocol::Number(6), 80, &[Tag::OutTx]),
            (Both, Protocol::Tcp, 443, &[Tag::InRx, Tag::InTx, Tag::OutRx, Tag::OutTx]),
            (Both, Protocol::Udp, 0, &[Tag::InRx, Tag::OutTx]),
            (Both, Protocol::Tcp, 0, &[Tag::InRx, Tag::OutTx]),
            (Both, Protocol::Igmp, 9, &[Tag::InRx, Tag::OutTx]),
        ];
        for (direction, protocol, port, expected) in cases {
            assert_eq!(
                directional_tags(direction, protocol, port),
                expected,
                "{direction} {protocol} {port}"
            );
        }
    }

    #[test]
    fn both_tcp_without_port_is_syn_only() {
        let model = test_model();
        let compiler = RuleCompiler::new(&model);
        let rule = Rule::new("r1", Direction::Both, Protocol::Tcp, 0).from_group("g2");

        let map = compiler.compile(&ctx(), &rule).unwrap();
        assert_eq!(tags_of(&map), vec!["inRx", "outTx"]);

        let in_rx = by_tag(&map, Tag::InRx);
        assert_eq!(in_rx.dst_endpoint_group, 1);
        assert_eq!(in_rx.src_endpoint_group, 2);
        assert_eq!(in_rx.tcp_flags, Some(TcpFlags::SynNotAck));
        assert_eq!(in_rx.ip_protocol, 6);

        let out_tx = by_tag(&map, Tag::OutTx);
        assert_eq!(out_tx.src_endpoint_group, 1);
        assert_eq!(out_tx.dst_endpoint_group, 2);
        assert_eq!(out_tx.tcp_flags, Some(TcpFlags::SynNotAck));
        assert!(out_tx.src_ip_addr.is_none() && out_tx.dst_ip_addr.is_none());
    }

    #[test]
    fn in_udp_with_port_sets_ports_per_leg() {
        let model = test_model();
        let compiler = RuleCompiler::new(&model);
        let rule = Rule::new("dns", Direction::In, Protocol::Udp, 53).from_group("g2");

        let map = compiler.compile(&ctx(), &rule).unwrap();
        assert_eq!(tags_of(&map), vec!["inRx", "inTx"]);

        let in_rx = by_tag(&map, Tag::InRx);
        assert_eq!(in_rx.dst_port, 53);
        assert_eq!(in_rx.src_port, 0);
        assert_eq!(in_rx.tcp_flags, None);

        let in_tx = by_tag(&map, Tag::InTx);
        assert_eq!(in_tx.src_port, 53);
        assert_eq!(in_tx.dst_port, 0);
        assert_eq!(in_tx.src_endpoint_group, 1);
        assert_eq!(in_tx.dst_endpoint_group, 2);
        assert_eq!(in_tx.tcp_flags, None);
    }

    #[test]
    fn out_tcp_with_port_addresses_every_leg() {
        let model = test_model();
        let compiler = RuleCompiler::new(&model);
        let rule = Rule::new("web", Direction::Out, Protocol::Tcp, 443)
            .to_net("ext")
            .with_priority(5)
            .with_action(RuleAction::Deny);

        let map = compiler.compile(&ctx(), &rule).unwrap();
        assert_eq!(tags_of(&map), vec!["outRx", "outTx"]);

        let out_rx = by_tag(&map, Tag::OutRx);
        assert_eq!(out_rx.dst_endpoint_group, 1);
        assert_eq!(out_rx.src_endpoint_group, 0);
        assert_eq!(out_rx.src_ip_addr.as_deref(), Some("172.16.0.0/24"));
        assert_eq!(out_rx.src_port, 443);

        let out_tx = by_tag(&map, Tag::OutTx);
        assert_eq!(out_tx.dst_ip_addr.as_deref(), Some("172.16.0.0/24"));
        assert_eq!(out_tx.dst_port, 443);
        assert_eq!(out_tx.tcp_flags, None);
        assert_eq!(out_tx.priority, 5);
        assert_eq!(out_tx.action, RuleAction::Deny);
    }

    #[test]
    fn from_network_fills_from_address() {
        let model = test_model();
        let compiler = RuleCompiler::new(&model);
        let rule = Rule::new("ext-in", Direction::In, Protocol::Tcp, 22).from_net("ext");

        let map = compiler.compile(&ctx(), &rule).unwrap();
        assert_eq!(by_tag(&map, Tag::InRx).src_ip_addr.as_deref(), Some("172.16.0.0/24"));
        assert_eq!(by_tag(&map, Tag::InTx).dst_ip_addr.as_deref(), Some("172.16.0.0/24"));
        assert_eq!(by_tag(&map, Tag::InRx).src_endpoint_group, 0);
    }

    #[test]
    fn group_takes_precedence_over_network() {
        let model = test_model();
        let compiler = RuleCompiler::new(&model);
        let rule = Rule::new("r", Direction::In, Protocol::Any, 0)
            .from_group("g2")
            .from_net("ext");

        let map = compiler.compile(&ctx(), &rule).unwrap();
        let in_rx = by_tag(&map, Tag::InRx);
        assert_eq!(in_rx.src_endpoint_group, 2);
        assert!(in_rx.src_ip_addr.is_none());
    }

    #[test]
    fn explicit_address_passes_through_with_group() {
        let model = test_model();
        let compiler = RuleCompiler::new(&model);
        let rule = Rule::new("r", Direction::In, Protocol::Any, 0)
            .from_group("g2")
            .from_ip("10.0.0.5");

        let map = compiler.compile(&ctx(), &rule).unwrap();
        assert_eq!(by_tag(&map, Tag::InRx).src_ip_addr.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn rule_without_remote_is_invalid() {
        let model = test_model();
        let compiler = RuleCompiler::new(&model);
        let rule = Rule::new("r", Direction::In, Protocol::Tcp, 80);

        let err = compiler.compile(&ctx(), &rule).unwrap_err();
        assert!(matches!(err, PolicyError::Validation { .. }));
    }

    #[test]
    fn unknown_remote_group_is_not_found() {
        let model = test_model();
        let compiler = RuleCompiler::new(&model);
        let rule = Rule::new("r", Direction::In, Protocol::Tcp, 80).to_group("ghost");

        let err = compiler.compile(&ctx(), &rule).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::NotFound { kind: EntityKind::EndpointGroup, ref key } if key == "acme:ghost"
        ));
    }

    #[test]
    fn unknown_network_is_not_found() {
        let model = test_model();
        let compiler = RuleCompiler::new(&model);
        let rule = Rule::new("r", Direction::Out, Protocol::Udp, 5).to_net("nowhere");

        let err = compiler.compile(&ctx(), &rule).unwrap_err();
        assert!(matches!(err, PolicyError::NotFound { kind: EntityKind::Network, .. }));
    }

    #[test]
    fn compilation_is_reproducible() {
        let model = test_model();
        let compiler = RuleCompiler::new(&model);
        let rule = Rule::new("r", Direction::Both, Protocol::Tcp, 8080).from_group("g2");

        let first = compiler.compile(&ctx(), &rule).unwrap();
        let second = compiler.compile(&ctx(), &rule).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }
}
