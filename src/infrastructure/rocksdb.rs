use crate::domain::ports::{Changeset, KvStore, Table, Versioned};
use crate::error::StoreError;
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

const VERSION_LEN: usize = 8;

/// A persistent store implementation using RocksDB.
///
/// Each logical `Table` gets its own Column Family. Values are stored with an
/// 8-byte big-endian row version in front of the payload. Commits are
/// validated and written while holding `commit_latch`, and the writes land
/// through a single `WriteBatch`, so a changeset is applied atomically or not
/// at all.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    commit_latch: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that one column family per table exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = Table::ALL
            .iter()
            .map(|table| ColumnFamilyDescriptor::new(table.name(), Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            commit_latch: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, table: Table) -> Result<&ColumnFamily, StoreError> {
        self.db.cf_handle(table.name()).ok_or_else(|| {
            StoreError::Backend(format!("column family '{}' not found", table.name()))
        })
    }

    fn read(&self, table: Table, key: &[u8]) -> Result<Option<Versioned>, StoreError> {
        let cf = self.cf(table)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }
}

fn encode(version: u64, value: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(VERSION_LEN + value.len());
    bytes.extend_from_slice(&version.to_be_bytes());
    bytes.extend_from_slice(value);
    bytes
}

fn decode(bytes: &[u8]) -> Result<Versioned, StoreError> {
    if bytes.len() < VERSION_LEN {
        return Err(StoreError::Backend("stored row is truncated".to_string()));
    }
    let (version, value) = bytes.split_at(VERSION_LEN);
    let mut raw = [0u8; VERSION_LEN];
    raw.copy_from_slice(version);
    Ok(Versioned {
        version: u64::from_be_bytes(raw),
        value: value.to_vec(),
    })
}

#[async_trait]
impl KvStore for RocksDBStore {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Versioned>, StoreError> {
        self.read(table, key)
    }

    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Versioned)>, StoreError> {
        let cf = self.cf(table)?;
        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, rocksdb::Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), decode(&value)?));
        }

        Ok(rows)
    }

    async fn commit(&self, changes: Changeset) -> Result<(), StoreError> {
        let _latch = self.commit_latch.lock().await;

        for read in &changes.reads {
            let current = self.read(read.table, &read.key)?.map(|row| row.version);
            if current != read.version {
                return Err(StoreError::Conflict(format!(
                    "row in '{}' changed since it was read",
                    read.table.name()
                )));
            }
        }

        let mut batch = WriteBatch::default();
        for write in &changes.writes {
            let version = self
                .read(write.table, &write.key)?
                .map_or(1, |row| row.version + 1);
            let cf = self.cf(write.table)?;
            batch.put_cf(cf, &write.key, encode(version, &write.value));
        }
        self.db.write(batch)?;

        Ok(())
    }
}
