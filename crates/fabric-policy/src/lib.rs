//! fabric-policy — VNF policy lifecycle and rule compilation.
//!
//! Turns VNF and VNF-policy intents into durable configuration records and
//! directional flow rules. The `Netmaster` facade is the entry point for the
//! administrative layer:
//!
//! - Resolves referenced endpoint groups, VNFs and networks via `ObjectModel`
//! - Expands each declarative rule into directional rules (`RuleCompiler`)
//! - Installs and retracts them through `FlowRuleEngine`
//! - Persists records through `ConfigRepository` over a `StateDriver`
//! - Keeps per-kind caches that mirror the store after `restore()`
//!
//! # Architecture
//!
//! ```text
//! Netmaster
//!   ├── ObjectModel (endpoint groups, VNFs, networks by tenant:name)
//!   ├── VnfManager
//!   │   └── ConfigRepository<VnfRecord>      → <root>/vnf/<tenant>:<name>
//!   └── PolicyManager
//!       ├── RuleCompiler (rule → inRx/inTx/outRx/outTx)
//!       ├── FlowRuleEngine (add/delete compiled rules)
//!       └── ConfigRepository<VnfPolicyRecord> → <root>/vnfpolicy/<policy id>
//! ```

pub mod compiler;
pub mod engine;
pub mod error;
pub mod master;
pub mod model;
pub mod policy;
pub mod repository;
pub mod vnf;

pub use compiler::{directional_tags, PolicyContext, RuleCompiler};
pub use engine::{EngineError, FlowRuleEngine, InMemoryFlowEngine};
pub use error::{EntityKind, PolicyError, PolicyResult};
pub use master::{Netmaster, RestoreReport};
pub use model::{InMemoryObjectModel, ObjectModel};
pub use policy::{PolicyInstall, PolicyManager, RestoreStats};
pub use repository::{ConfigRepository, RecordEvent, RecordWatch, StateRecord};
pub use vnf::VnfManager;
