use super::idempotency::IdempotencyKey;
use super::ports::{Entity, Table};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Represents a positive monetary amount for transfers and payments.
///
/// Deserialization goes through `TryFrom<Decimal>`, so a zero or negative
/// amount can never be constructed from input. The value is kept normalized,
/// so `125.5` and `125.50` serialize (and fingerprint) identically.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value.normalize()))
        } else {
            Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Integer cents, the unit the partner works in.
    pub fn minor_units(&self) -> Result<i64> {
        (self.0 * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| PaymentError::ValidationError("Amount is out of range".to_string()))
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountInput {
    pub name: String,
}

/// A ledger account, provisioned locally first and then at the partner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub owner: u64,
    pub idempotency_key_id: u64,
    pub name: String,
    pub bank_account_id: Option<String>,
    pub bank_account_number_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(key: &IdempotencyKey, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            owner: key.owner,
            idempotency_key_id: key.id,
            name: name.to_string(),
            bank_account_id: None,
            bank_account_number_id: None,
            created_at: now,
        }
    }

    /// The partner-side account id, required before money can move.
    pub fn provisioned_id(&self) -> Result<&str> {
        self.bank_account_id.as_deref().ok_or_else(|| {
            PaymentError::BadRequest(format!(
                "account {} is not provisioned with the bank",
                self.id
            ))
        })
    }

    pub fn to_body(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "bank_account_id": self.bank_account_id,
            "bank_account_number_id": self.bank_account_number_id,
            "created_at": self.created_at,
        })
    }
}

impl Entity for Account {
    const TABLE: Table = Table::Accounts;

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
