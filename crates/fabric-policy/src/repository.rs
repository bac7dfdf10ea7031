//! Config repository — typed CRUD over the state store adapter.
//!
//! Each record kind lives under its own key prefix,
//! `{config_root}/{kind}/{id}`, so a prefix listing enumerates exactly one
//! kind. Records are JSON-encoded with their field names, and `write`
//! overwrites whatever is stored (last writer wins).

use std::marker::PhantomData;
use std::sync::Arc;

use fabric_core::{VnfPolicyRecord, VnfRecord};
use fabric_state::{PrefixWatch, StateDriver, StateError, StateResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// A record that can be stored by a [`ConfigRepository`].
pub trait StateRecord: Serialize + DeserializeOwned + Send + Sync {
    /// Path segment naming this record kind.
    const KIND: &'static str;

    /// Identity of the record within its kind.
    fn id(&self) -> &str;
}

impl StateRecord for VnfRecord {
    const KIND: &'static str = "vnf";

    fn id(&self) -> &str {
        &self.id
    }
}

impl StateRecord for VnfPolicyRecord {
    const KIND: &'static str = "vnfpolicy";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Typed repository for one record kind.
pub struct ConfigRepository<T> {
    driver: Arc<dyn StateDriver>,
    prefix: String,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for ConfigRepository<T> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            prefix: self.prefix.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: StateRecord> ConfigRepository<T> {
    pub fn new(driver: Arc<dyn StateDriver>, config_root: &str) -> Self {
        let prefix = format!("{}/{}/", config_root.trim_end_matches('/'), T::KIND);
        Self {
            driver,
            prefix,
            _record: PhantomData,
        }
    }

    /// Key prefix shared by every record of this kind.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full store key for a record id.
    pub fn key(&self, id: &str) -> String {
        format!("{}{id}", self.prefix)
    }

    pub fn write(&self, record: &T) -> StateResult<()> {
        let key = self.key(record.id());
        let value = serde_json::to_vec(record).map_err(|e| StateError::Serialize(e.to_string()))?;
        self.driver.write(&key, &value)?;
        debug!(%key, kind = T::KIND, "record written");
        Ok(())
    }

    pub fn read(&self, id: &str) -> StateResult<T> {
        let value = self.driver.read(&self.key(id))?;
        decode(&value)
    }

    /// Every record of this kind; fails on the first undecodable entry.
    pub fn read_all(&self) -> StateResult<Vec<T>> {
        self.read_all_entries()?
            .into_iter()
            .map(|(_, record)| record)
            .collect()
    }

    /// Every stored entry of this kind with its individual decode result.
    pub fn read_all_entries(&self) -> StateResult<Vec<(String, StateResult<T>)>> {
        let entries = self.driver.read_all_with_prefix(&self.prefix)?;
        Ok(entries
            .into_iter()
            .map(|(key, value)| {
                let record = decode(&value);
                (key, record)
            })
            .collect())
    }

    pub fn clear(&self, id: &str) -> StateResult<()> {
        let key = self.key(id);
        self.driver.clear(&key)?;
        debug!(%key, kind = T::KIND, "record cleared");
        Ok(())
    }

    /// Subscribe to changes of this record kind.
    pub fn watch_all(&self) -> StateResult<RecordWatch<T>> {
        let inner = self.driver.watch_all_with_prefix(&self.prefix)?;
        Ok(RecordWatch {
            inner,
            _record: PhantomData,
        })
    }
}

fn decode<T: DeserializeOwned>(value: &[u8]) -> StateResult<T> {
    serde_json::from_slice(value).map_err(|e| StateError::Deserialize(e.to_string()))
}

/// A typed change to one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEvent<T> {
    /// Full store key of the record.
    pub key: String,
    pub prev: Option<T>,
    /// `None` when the record was cleared.
    pub curr: Option<T>,
}

/// Typed view over a prefix watch.
pub struct RecordWatch<T> {
    inner: PrefixWatch,
    _record: PhantomData<fn() -> T>,
}

impl<T: StateRecord> RecordWatch<T> {
    /// Wait for the next change. Events whose payload cannot be decoded are
    /// logged and skipped; `None` means the store is gone.
    pub async fn next(&mut self) -> Option<RecordEvent<T>> {
        loop {
            let event = self.inner.next().await?;
            let prev = event.prev.as_deref().map(decode::<T>).transpose();
            let curr = event.curr.as_deref().map(decode::<T>).transpose();
            match (prev, curr) {
                (Ok(prev), Ok(curr)) => {
                    return Some(RecordEvent {
                        key: event.key,
                        prev,
                        curr,
                    });
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!(key = %event.key, error = %e, "skipping undecodable change event");
                }
            }
        }
    }
}
