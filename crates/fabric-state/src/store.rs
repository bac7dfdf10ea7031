//! RedbStateDriver — redb-backed implementation of `StateDriver`.
//!
//! Values are stored as raw bytes in a single table. The driver supports
//! both on-disk and in-memory backends (the latter for testing). Every
//! committed write or clear is published to watchers after the commit.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tokio::sync::broadcast;
use tracing::debug;

use crate::driver::{PrefixWatch, StateDriver, WatchEvent};
use crate::error::{StateError, StateResult};
use crate::tables::CONFIG;

/// Buffered change events per watcher before it starts lagging.
const WATCH_CAPACITY: usize = 1024;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state driver backed by redb.
#[derive(Clone)]
pub struct RedbStateDriver {
    db: Arc<Database>,
    events: broadcast::Sender<WatchEvent>,
}

impl RedbStateDriver {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let driver = Self::from_database(db)?;
        debug!(?path, "state store opened");
        Ok(driver)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let driver = Self::from_database(db)?;
        debug!("in-memory state store opened");
        Ok(driver)
    }

    fn from_database(db: Database) -> StateResult<Self> {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        let driver = Self {
            db: Arc::new(db),
            events,
        };
        driver.ensure_tables()?;
        Ok(driver)
    }

    /// Create the table if it doesn't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CONFIG).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn publish(&self, event: WatchEvent) {
        // No receivers is not an error: nobody is watching yet.
        let _ = self.events.send(event);
    }
}

impl StateDriver for RedbStateDriver {
    fn write(&self, key: &str, value: &[u8]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let prev;
        {
            let mut table = txn.open_table(CONFIG).map_err(map_err!(Table))?;
            prev = table
                .insert(key, value)
                .map_err(map_err!(Write))?
                .map(|old| old.value().to_vec());
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, bytes = value.len(), "state written");
        self.publish(WatchEvent {
            key: key.to_string(),
            prev,
            curr: Some(value.to_vec()),
        });
        Ok(())
    }

    fn read(&self, key: &str) -> StateResult<Vec<u8>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CONFIG).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(guard.value().to_vec()),
            None => Err(StateError::NotFound(key.to_string())),
        }
    }

    fn read_all_with_prefix(&self, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CONFIG).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push((key.value().to_string(), value.value().to_vec()));
            }
        }
        Ok(results)
    }

    fn clear(&self, key: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let prev;
        {
            let mut table = txn.open_table(CONFIG).map_err(map_err!(Table))?;
            prev = table
                .remove(key)
                .map_err(map_err!(Write))?
                .map(|old| old.value().to_vec());
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed = prev.is_some(), "state cleared");
        if prev.is_some() {
            self.publish(WatchEvent {
                key: key.to_string(),
                prev,
                curr: None,
            });
        }
        Ok(())
    }

    fn watch_all_with_prefix(&self, prefix: &str) -> StateResult<PrefixWatch> {
        debug!(%prefix, "watch registered");
        Ok(PrefixWatch::new(prefix, self.events.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_driver() -> RedbStateDriver {
        RedbStateDriver::open_in_memory().unwrap()
    }

    #[test]
    fn write_and_read() {
        let driver = test_driver();
        driver.write("/root/vnf/acme:fw", b"{}").unwrap();
        assert_eq!(driver.read("/root/vnf/acme:fw").unwrap(), b"{}".to_vec());
    }

    #[test]
    fn read_missing_is_not_found() {
        let driver = test_driver();
        let err = driver.read("/root/vnf/nope").unwrap_err();
        assert!(matches!(err, StateError::NotFound(key) if key == "/root/vnf/nope"));
    }

    #[test]
    fn write_overwrites() {
        let driver = test_driver();
        driver.write("k", b"one").unwrap();
        driver.write("k", b"two").unwrap();
        assert_eq!(driver.read("k").unwrap(), b"two".to_vec());
    }

    #[test]
    fn prefix_listing_is_scoped() {
        let driver = test_driver();
        driver.write("/root/vnf/a", b"1").unwrap();
        driver.write("/root/vnf/b", b"2").unwrap();
        driver.write("/root/vnfpolicy/a:1:2:fw", b"3").unwrap();

        let vnfs = driver.read_all_with_prefix("/root/vnf/").unwrap();
        assert_eq!(vnfs.len(), 2);
        assert_eq!(vnfs[0].0, "/root/vnf/a");

        let policies = driver.read_all_with_prefix("/root/vnfpolicy/").unwrap();
        assert_eq!(policies.len(), 1);
    }

    #[test]
    fn clear_is_idempotent() {
        let driver = test_driver();
        driver.write("k", b"v").unwrap();
        driver.clear("k").unwrap();
        driver.clear("k").unwrap();
        assert!(driver.read("k").is_err());
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let driver = RedbStateDriver::open(&db_path).unwrap();
            driver.write("/root/vnf/acme:fw", b"persisted").unwrap();
        }

        let driver = RedbStateDriver::open(&db_path).unwrap();
        assert_eq!(
            driver.read("/root/vnf/acme:fw").unwrap(),
            b"persisted".to_vec()
        );
    }

    #[tokio::test]
    async fn watch_reports_put_and_delete_under_prefix() {
        let driver = test_driver();
        let mut watch = driver.watch_all_with_prefix("/root/vnf/").unwrap();

        driver.write("/root/other/x", b"ignored").unwrap();
        driver.write("/root/vnf/a", b"1").unwrap();
        driver.write("/root/vnf/a", b"2").unwrap();
        driver.clear("/root/vnf/a").unwrap();

        let first = watch.next().await.unwrap();
        assert_eq!(first.key, "/root/vnf/a");
        assert_eq!(first.prev, None);
        assert_eq!(first.curr, Some(b"1".to_vec()));

        let second = watch.next().await.unwrap();
        assert_eq!(second.prev, Some(b"1".to_vec()));
        assert_eq!(second.curr, Some(b"2".to_vec()));

        let third = watch.next().await.unwrap();
        assert!(third.is_delete());
        assert_eq!(third.prev, Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn clearing_absent_key_emits_nothing() {
        let driver = test_driver();
        let mut watch = driver.watch_all_with_prefix("/root/").unwrap();

        driver.clear("/root/missing").unwrap();
        driver.write("/root/present", b"v").unwrap();

        let event = watch.next().await.unwrap();
        assert_eq!(event.key, "/root/present");
    }
}
