//! Optimistic serializable transactions over a `KvStore`.
//!
//! A `Transaction` records the version of every row it reads (absent rows
//! included) and buffers its writes. `commit` hands both to the backend,
//! which refuses the whole changeset if any observed version moved. The
//! caller then sees `StoreError::Conflict` and re-runs the work from scratch.

use crate::domain::audit::{AuditRecord, ResourceType};
use crate::domain::idempotency::IdempotencyKey;
use crate::domain::ports::{Changeset, Entity, KvStoreRef, ReadStamp, Table, Write};
use crate::error::{PaymentError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};

type RowId = (Table, Vec<u8>);

pub struct Transaction {
    kv: KvStoreRef,
    reads: HashMap<RowId, Option<u64>>,
    writes: BTreeMap<RowId, Vec<u8>>,
}

impl Transaction {
    fn new(kv: KvStoreRef) -> Self {
        Self {
            kv,
            reads: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }

    pub async fn get<T: DeserializeOwned>(&mut self, table: Table, key: &[u8]) -> Result<Option<T>> {
        let row = (table, key.to_vec());
        if let Some(bytes) = self.writes.get(&row) {
            return Ok(Some(serde_json::from_slice(bytes)?));
        }

        let stored = self.kv.get(table, key).await?;
        // The first observation is the one validated at commit.
        self.reads
            .entry(row)
            .or_insert(stored.as_ref().map(|v| v.version));

        match stored {
            Some(versioned) => Ok(Some(serde_json::from_slice(&versioned.value)?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize + ?Sized>(&mut self, table: Table, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.writes.insert((table, key.to_vec()), bytes);
        Ok(())
    }

    /// Allocates the next value of a named counter. Two transactions
    /// allocating from the same counter conflict, so ids are never reused.
    pub async fn next_id(&mut self, sequence: &str) -> Result<u64> {
        let current: u64 = self
            .get(Table::Sequences, sequence.as_bytes())
            .await?
            .unwrap_or(0);
        let next = current + 1;
        self.put(Table::Sequences, sequence.as_bytes(), &next)?;
        Ok(next)
    }

    pub async fn idempotency_key(&mut self, owner: u64, key: &str) -> Result<Option<IdempotencyKey>> {
        self.get(Table::IdempotencyKeys, &IdempotencyKey::storage_key(owner, key))
            .await
    }

    pub fn put_idempotency_key(&mut self, record: &IdempotencyKey) -> Result<()> {
        self.put(
            Table::IdempotencyKeys,
            &IdempotencyKey::storage_key(record.owner, &record.key),
            record,
        )
    }

    /// Inserts a new entity, assigning its id and indexing it by the
    /// idempotency key that created it.
    pub async fn insert<E: Entity>(&mut self, mut entity: E) -> Result<E> {
        let id = self.next_id(E::TABLE.name()).await?;
        entity.assign_id(id);
        self.put(E::TABLE, &id.to_be_bytes(), &entity)?;
        self.put(
            Table::KeyIndex,
            &key_index(E::TABLE, entity.idempotency_key_id()),
            &id,
        )?;
        Ok(entity)
    }

    pub async fn load<E: Entity>(&mut self, id: u64) -> Result<Option<E>> {
        self.get(E::TABLE, &id.to_be_bytes()).await
    }

    pub fn update<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.put(E::TABLE, &entity.id().to_be_bytes(), entity)
    }

    /// Reloads the entity a previous phase created for this key.
    pub async fn find_by_key<E: Entity>(&mut self, idempotency_key_id: u64) -> Result<Option<E>> {
        let id: Option<u64> = self
            .get(Table::KeyIndex, &key_index(E::TABLE, idempotency_key_id))
            .await?;
        match id {
            Some(id) => self.load(id).await,
            None => Ok(None),
        }
    }

    pub async fn commit(self) -> Result<()> {
        let changes = Changeset {
            reads: self
                .reads
                .into_iter()
                .map(|((table, key), version)| ReadStamp {
                    table,
                    key,
                    version,
                })
                .collect(),
            writes: self
                .writes
                .into_iter()
                .map(|((table, key), value)| Write { table, key, value })
                .collect(),
        };
        self.kv.commit(changes).await?;
        Ok(())
    }
}

fn key_index(table: Table, idempotency_key_id: u64) -> Vec<u8> {
    let mut key = table.name().as_bytes().to_vec();
    key.push(b'/');
    key.extend_from_slice(&idempotency_key_id.to_be_bytes());
    key
}

/// Opaque, monotonic pagination request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            cursor: None,
        }
    }

    fn after_id(&self) -> Result<u64> {
        match self.cursor.as_deref() {
            None | Some("") => Ok(0),
            Some(cursor) => cursor
                .parse()
                .map_err(|_| PaymentError::BadRequest(format!("invalid cursor '{cursor}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Handle to local storage: opens transactions and serves plain reads.
#[derive(Clone)]
pub struct Database {
    kv: KvStoreRef,
}

impl Database {
    pub fn new(kv: KvStoreRef) -> Self {
        Self { kv }
    }

    /// Every transaction is serializable; see the module docs.
    pub fn begin(&self) -> Transaction {
        Transaction::new(self.kv.clone())
    }

    pub async fn get<E: Entity>(&self, id: u64) -> Result<Option<E>> {
        match self.kv.get(E::TABLE, &id.to_be_bytes()).await? {
            Some(versioned) => Ok(Some(serde_json::from_slice(&versioned.value)?)),
            None => Ok(None),
        }
    }

    pub async fn idempotency_key(&self, owner: u64, key: &str) -> Result<Option<IdempotencyKey>> {
        let storage_key = IdempotencyKey::storage_key(owner, key);
        match self.kv.get(Table::IdempotencyKeys, &storage_key).await? {
            Some(versioned) => Ok(Some(serde_json::from_slice(&versioned.value)?)),
            None => Ok(None),
        }
    }

    /// Lists entities in id order, keeping those accepted by `filter`.
    pub async fn list<E, F>(&self, page: &Page, filter: F) -> Result<Listing<E>>
    where
        E: Entity,
        F: Fn(&E) -> bool,
    {
        let after = page.after_id()?;
        let limit = page.limit.filter(|limit| *limit > 0).unwrap_or(usize::MAX);

        let mut items = Vec::new();
        for (_key, versioned) in self.kv.scan_prefix(E::TABLE, &[]).await? {
            let entity: E = serde_json::from_slice(&versioned.value)?;
            if entity.id() <= after || !filter(&entity) {
                continue;
            }
            items.push(entity);
            if items.len() >= limit {
                break;
            }
        }

        // A short page means the scan ran out of rows.
        let next_cursor = if items.len() >= limit {
            items.last().map(|entity| entity.id().to_string())
        } else {
            None
        };
        Ok(Listing { items, next_cursor })
    }

    pub async fn audit_records(
        &self,
        resource_type: ResourceType,
        resource_id: u64,
    ) -> Result<Vec<AuditRecord>> {
        let prefix = AuditRecord::resource_prefix(resource_type, resource_id);
        self.kv
            .scan_prefix(Table::AuditRecords, &prefix)
            .await?
            .into_iter()
            .map(|(_key, versioned)| {
                serde_json::from_slice(&versioned.value).map_err(PaymentError::from)
            })
            .collect()
    }
}
