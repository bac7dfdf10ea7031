//! Object-model lookup boundary.
//!
//! Tenant, endpoint-group, VNF and network definitions are owned by an
//! external object-model service. The policy layer only resolves them by
//! `tenant:name` key through [`ObjectModel`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use fabric_core::config::ObjectSeed;
use fabric_core::{EndpointGroup, Network, Vnf};

/// Resolves named entities by `tenant:name`; `None` on miss.
pub trait ObjectModel: Send + Sync {
    fn find_endpoint_group(&self, key: &str) -> Option<EndpointGroup>;
    fn find_vnf(&self, key: &str) -> Option<Vnf>;
    fn find_network(&self, key: &str) -> Option<Network>;
}

/// An object model held in memory, seeded from configuration or by tests.
#[derive(Clone, Default)]
pub struct InMemoryObjectModel {
    groups: Arc<RwLock<HashMap<String, EndpointGroup>>>,
    vnfs: Arc<RwLock<HashMap<String, Vnf>>>,
    networks: Arc<RwLock<HashMap<String, Network>>>,
}

impl InMemoryObjectModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: &ObjectSeed) -> Self {
        let model = Self::new();
        for group in &seed.endpoint_groups {
            model.upsert_endpoint_group(group.clone());
        }
        for vnf in &seed.vnfs {
            model.upsert_vnf(vnf.clone());
        }
        for network in &seed.networks {
            model.upsert_network(network.clone());
        }
        model
    }

    pub fn upsert_endpoint_group(&self, group: EndpointGroup) {
        let mut groups = self.groups.write().expect("groups lock");
        groups.insert(group.key(), group);
    }

    pub fn remove_endpoint_group(&self, key: &str) -> Option<EndpointGroup> {
        self.groups.write().expect("groups lock").remove(key)
    }

    pub fn upsert_vnf(&self, vnf: Vnf) {
        let mut vnfs = self.vnfs.write().expect("vnfs lock");
        vnfs.insert(vnf.key(), vnf);
    }

    pub fn remove_vnf(&self, key: &str) -> Option<Vnf> {
        self.vnfs.write().expect("vnfs lock").remove(key)
    }

    pub fn upsert_network(&self, network: Network) {
        let mut networks = self.networks.write().expect("networks lock");
        networks.insert(network.key(), network);
    }

    pub fn remove_network(&self, key: &str) -> Option<Network> {
        self.networks.write().expect("networks lock").remove(key)
    }
}

impl ObjectModel for InMemoryObjectModel {
    fn find_endpoint_group(&self, key: &str) -> Option<EndpointGroup> {
        self.groups.read().expect("groups lock").get(key).cloned()
    }

    fn find_vnf(&self, key: &str) -> Option<Vnf> {
        self.vnfs.read().expect("vnfs lock").get(key).cloned()
    }

    fn find_network(&self, key: &str) -> Option<Network> {
        self.networks.read().expect("networks lock").get(key).cloned()
    }
}
