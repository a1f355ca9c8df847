use serde::{Deserialize, Serialize};

/// Destination coordinates at the recipient's bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAddress {
    pub account_number: String,
    pub routing_number: String,
}

/// A verified organization account that can receive payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: u64,
    pub name: String,
    pub organization: String,
    pub bank_address: Option<BankAddress>,
}

impl Recipient {
    /// Creditor name sent to the partner.
    pub fn creditor(&self) -> String {
        format!("{} {}", self.organization, self.name)
    }
}
