use super::account::Amount;
use super::idempotency::IdempotencyKey;
use super::ports::{Entity, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTransferInput {
    pub account_id: u64,
    pub amount: Amount,
    pub description: String,
    pub account_number: String,
    pub routing_number: String,
}

/// An outbound funds transfer to explicit bank coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: u64,
    pub owner: u64,
    pub idempotency_key_id: u64,
    pub account_id: u64,
    pub amount: Amount,
    pub description: String,
    pub account_number: String,
    pub routing_number: String,
    pub bank_transfer_id: Option<String>,
    pub bank_status: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    pub fn new(key: &IdempotencyKey, input: &CreateTransferInput, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            owner: key.owner,
            idempotency_key_id: key.id,
            account_id: input.account_id,
            amount: input.amount,
            description: input.description.clone(),
            account_number: input.account_number.clone(),
            routing_number: input.routing_number.clone(),
            bank_transfer_id: None,
            bank_status: None,
            created_at: now,
        }
    }

    pub fn to_body(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "account_id": self.account_id,
            "amount": self.amount,
            "description": self.description,
            "bank_transfer_id": self.bank_transfer_id,
            "status": self.bank_status,
            "created_at": self.created_at,
        })
    }
}

impl Entity for Transfer {
    const TABLE: Table = Table::Transfers;

    fn id(&self) -> u64 {
        self.id
    }

    fn assign_id(&mut self, id: u64) {
        self.id = id;
    }

    fn idempotency_key_id(&self) -> u64 {
        self.idempotency_key_id
    }
}
