//! fabric-state — key-value state store adapter for the Fabric control plane.
//!
//! The control plane talks to its durable store only through the
//! [`StateDriver`] trait: per-key write/read/clear plus prefix-scoped listing
//! and watching. Values are opaque byte strings; typed encoding lives in the
//! config repository one layer up.
//!
//! # Architecture
//!
//! ```text
//! StateDriver (trait)
//!   └── RedbStateDriver
//!       ├── redb Database (on-disk or in-memory)
//!       └── broadcast::Sender<WatchEvent> (fan-out to PrefixWatch receivers)
//! ```
//!
//! `RedbStateDriver` is `Clone` + `Send` + `Sync` and can be shared across
//! async tasks.

pub mod driver;
pub mod error;
pub mod store;
pub mod tables;

pub use driver::{PrefixWatch, StateDriver, WatchEvent};
pub use error::{StateError, StateResult};
pub use store::RedbStateDriver;
