//! fabric-core — shared data model for the Fabric VNF policy control plane.
//!
//! Holds the durable record shapes (VNFs, VNF policies, rule maps), the
//! declarative rule model with its closed direction/protocol enumerations,
//! the object-model entity shapes resolved from the tenant model, the
//! deterministic identity schemes, and the daemon configuration.

pub mod config;
pub mod ids;
pub mod types;

pub use config::FabricConfig;
pub use types::*;
