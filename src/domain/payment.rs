use super::account::Amount;
use super::bank::RoutingCapabilities;
use super::idempotency::IdempotencyKey;
use super::ports::{Entity, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Settlement channel used to deliver a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRail {
    /// Real-time payments, settles immediately.
    Rtp,
    /// Batch settlement.
    Ach,
}

impl fmt::Display for PaymentRail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentRail::Rtp => f.write_str("rtp"),
            PaymentRail::Ach => f.write_str("ach"),
        }
    }
}

/// Prefers real-time settlement, falls back to batch, and has nothing else
/// to offer when the destination supports neither.
pub fn select_rail(capabilities: &RoutingCapabilities) -> Option<PaymentRail> {
    if capabilities.real_time_payments {
        Some(PaymentRail::Rtp)
    } else if capabilities.ach {
        Some(PaymentRail::Ach)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePaymentInput {
    pub account_id: u64,
    pub recipient_id: u64,
    pub amount: Amount,
    pub description: String,
}

/// A payment to a directory recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: u64,
    pub owner: u64,
    pub idempotency_key_id: u64,
    pub account_id: u64,
    pub recipient_id: u64,
    pub amount: Amount,
    pub description: String,
    pub rail: Option<PaymentRail>,
    pub bank_transfer_id: Option<String>,
    pub bank_status: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(key: &IdempotencyKey, input: &CreatePaymentInput, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            owner: key.owner,
            idempotency_key_id: key.id,
            account_id: input.account_id,
            recipient_id: input.recipient_id,
            amount: input.amount,
            description: input.description.clone(),
            rail: None,
            bank_transfer_id: None,
            bank_status: None,
            created_at: now,
        }
    }

    pub fn to_body(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "account_id": self.account_id,
            "recipient_id": self.recipient_id,
            "amount": self.amount,
            "description": self.description,
            "payment_rail": self.rail,
            "bank_transfer_id": self.bank_transfer_id,
            "status": self.bank_status,
            "created_at": self.created_at,
        })
    }
}

impl Entity for Payment {
    const TABLE: Table = Table::Payments;

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
