use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CreateAccount,
    LinkBankAccount,
    LinkAccountNumber,
    CreateTransfer,
    SubmitTransfer,
    CreatePayment,
    SubmitPayment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Account,
    Transfer,
    Payment,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Account => "account",
            ResourceType::Transfer => "transfer",
            ResourceType::Payment => "payment",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write-once ledger entry documenting one local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: u64,
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: u64,
    pub data: serde_json::Value,
    pub origin_ip: String,
    pub owner: u64,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Resource-ordered storage key: `<type>/<resource id>/<audit id>`.
    pub fn storage_key(resource_type: ResourceType, resource_id: u64, id: u64) -> Vec<u8> {
        let mut key = Self::resource_prefix(resource_type, resource_id);
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    pub fn resource_prefix(resource_type: ResourceType, resource_id: u64) -> Vec<u8> {
        let mut key = resource_type.as_str().as_bytes().to_vec();
        key.push(b'/');
        key.extend_from_slice(&resource_id.to_be_bytes());
        key.push(b'/');
        key
    }
}
