use crate::domain::ports::{Changeset, KvStore, RecipientDirectory, Table, Versioned};
use crate::domain::recipient::Recipient;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type Rows = BTreeMap<Vec<u8>, Versioned>;

/// A thread-safe in-memory versioned store.
///
/// Uses `Arc<RwLock<HashMap<Table, BTreeMap<..>>>>`; commits take the write
/// lock for both validation and application, which serializes them.
/// Ideal for testing or for runs where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<HashMap<Table, Rows>>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, table: Table, key: &[u8]) -> std::result::Result<Option<Versioned>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.get(&table).and_then(|rows| rows.get(key)).cloned())
    }

    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &[u8],
    ) -> std::result::Result<Vec<(Vec<u8>, Versioned)>, StoreError> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(&table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn commit(&self, changes: Changeset) -> std::result::Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        for read in &changes.reads {
            let current = tables
                .get(&read.table)
                .and_then(|rows| rows.get(&read.key))
                .map(|row| row.version);
            if current != read.version {
                return Err(StoreError::Conflict(format!(
                    "row in '{}' changed since it was read",
                    read.table.name()
                )));
            }
        }

        for write in changes.writes {
            let rows = tables.entry(write.table).or_default();
            let version = rows.get(&write.key).map_or(1, |row| row.version + 1);
            rows.insert(
                write.key,
                Versioned {
                    version,
                    value: write.value,
                },
            );
        }

        Ok(())
    }
}

/// A thread-safe in-memory recipient directory.
#[derive(Default, Clone)]
pub struct InMemoryRecipientDirectory {
    recipients: Arc<RwLock<BTreeMap<u64, Recipient>>>,
}

impl InMemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryRecipientDirectory {
    async fn get(&self, id: u64) -> Result<Option<Recipient>> {
        let recipients = self.recipients.read().await;
        Ok(recipients.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Recipient>> {
        let recipients = self.recipients.read().await;
        Ok(recipients.values().cloned().collect())
    }

    async fn insert(&self, recipient: Recipient) -> Result<()> {
        let mut recipients = self.recipients.write().await;
        recipients.insert(recipient.id, recipient);
        Ok(())
    }
}
