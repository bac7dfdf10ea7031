//! Policy layer error types.

use std::fmt;

use fabric_state::StateError;
use thiserror::Error;

use crate::engine::EngineError;

/// The kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    EndpointGroup,
    Vnf,
    Network,
    VnfPolicy,
    VnfRecord,
    VnfInstance,
    Rule,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::EndpointGroup => "endpoint group",
            EntityKind::Vnf => "vnf",
            EntityKind::Network => "network",
            EntityKind::VnfPolicy => "vnf policy",
            EntityKind::VnfRecord => "vnf record",
            EntityKind::VnfInstance => "vnf instance",
            EntityKind::Rule => "rule",
        })
    }
}

/// Errors returned by the policy layer to its callers.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("{kind} {key} not found")]
    NotFound { kind: EntityKind, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: EntityKind, key: String },

    #[error("invalid rule {key}: {reason}")]
    Validation { key: String, reason: String },

    #[error("vnf {key} is referenced by policies: {}", policies.join(", "))]
    InUse { key: String, policies: Vec<String> },

    #[error("state store error for {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: StateError,
    },

    #[error("flow rule engine error: {0}")]
    Engine(#[from] EngineError),
}

impl PolicyError {
    pub fn not_found(kind: EntityKind, key: impl Into<String>) -> Self {
        PolicyError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn already_exists(kind: EntityKind, key: impl Into<String>) -> Self {
        PolicyError::AlreadyExists {
            kind,
            key: key.into(),
        }
    }

    pub fn validation(key: impl Into<String>, reason: impl Into<String>) -> Self {
        PolicyError::Validation {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn store(key: impl Into<String>, source: StateError) -> Self {
        PolicyError::Store {
            key: key.into(),
            source,
        }
    }

    /// Infrastructure failures worth retrying; semantic errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PolicyError::Store { source, .. } => source.is_retryable(),
            PolicyError::Engine(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias for policy layer operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
