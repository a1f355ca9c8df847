use super::recipient::Recipient;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Logical tables. Each backend maps them onto its own namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    IdempotencyKeys,
    Accounts,
    Transfers,
    Payments,
    AuditRecords,
    KeyIndex,
    Sequences,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::IdempotencyKeys,
        Table::Accounts,
        Table::Transfers,
        Table::Payments,
        Table::AuditRecords,
        Table::KeyIndex,
        Table::Sequences,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::IdempotencyKeys => "idempotency_keys",
            Table::Accounts => "accounts",
            Table::Transfers => "transfers",
            Table::Payments => "payments",
            Table::AuditRecords => "audit_records",
            Table::KeyIndex => "key_index",
            Table::Sequences => "sequences",
        }
    }
}

/// A stored value together with its row version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub version: u64,
    pub value: Vec<u8>,
}

/// Version observed by a transaction for one row; `None` means absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadStamp {
    pub table: Table,
    pub key: Vec<u8>,
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub table: Table,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Everything a transaction read and wants to write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    pub reads: Vec<ReadStamp>,
    pub writes: Vec<Write>,
}

/// Versioned key-value storage with validated, all-or-nothing commits.
///
/// `commit` must apply the writes only if every `ReadStamp` still matches
/// the current row version, and fail with `StoreError::Conflict` otherwise.
/// Validation and application must not interleave with another commit.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, table: Table, key: &[u8]) -> std::result::Result<Option<Versioned>, StoreError>;
    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &[u8],
    ) -> std::result::Result<Vec<(Vec<u8>, Versioned)>, StoreError>;
    async fn commit(&self, changes: Changeset) -> std::result::Result<(), StoreError>;
}

pub type KvStoreRef = Arc<dyn KvStore>;

/// A locally persisted row created by a saga and linked to its idempotency key.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: Table;

    fn id(&self) -> u64;
    fn assign_id(&mut self, id: u64);
    fn idempotency_key_id(&self) -> u64;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Directory of verified payees. Kept outside the transactional store.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn get(&self, id: u64) -> Result<Option<Recipient>>;
    async fn list(&self) -> Result<Vec<Recipient>>;
    async fn insert(&self, recipient: Recipient) -> Result<()>;
}
