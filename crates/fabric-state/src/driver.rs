//! The `StateDriver` contract and its change-event stream.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::error::StateResult;

/// A key-value store with prefix-scoped listing and watching.
///
/// Writes overwrite unconditionally; there is no compare-and-swap, so callers
/// that need check-then-act semantics must serialize them in-process.
pub trait StateDriver: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    fn write(&self, key: &str, value: &[u8]) -> StateResult<()>;

    /// Fetch the value under `key`; `StateError::NotFound` when absent.
    fn read(&self, key: &str) -> StateResult<Vec<u8>>;

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    fn read_all_with_prefix(&self, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>>;

    /// Remove `key`. Clearing an absent key succeeds.
    fn clear(&self, key: &str) -> StateResult<()>;

    /// Subscribe to changes of keys starting with `prefix`.
    fn watch_all_with_prefix(&self, prefix: &str) -> StateResult<PrefixWatch>;
}

/// One change to a stored key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    /// Value before the change, if the key existed.
    pub prev: Option<Vec<u8>>,
    /// Value after the change; `None` when the key was cleared.
    pub curr: Option<Vec<u8>>,
}

impl WatchEvent {
    pub fn is_delete(&self) -> bool {
        self.curr.is_none()
    }
}

/// Receiver side of a prefix-scoped watch.
pub struct PrefixWatch {
    prefix: String,
    rx: broadcast::Receiver<WatchEvent>,
}

impl PrefixWatch {
    pub fn new(prefix: &str, rx: broadcast::Receiver<WatchEvent>) -> Self {
        Self {
            prefix: prefix.to_string(),
            rx,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Wait for the next change under the watched prefix.
    ///
    /// Returns `None` once the store has been dropped. A receiver that falls
    /// behind skips the overwritten events and keeps going.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.key.starts_with(&self.prefix) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(prefix = %self.prefix, skipped, "watch receiver lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
