//! Boundary with the external banking partner.
//!
//! Every call that creates a remote resource carries an `idempotency_token`;
//! the partner returns the original resource when it sees a token twice.
//! Statuses reported by the partner are opaque strings passed through as-is.

use super::payment::PaymentRail;
use super::recipient::BankAddress;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartnerError {
    /// The partner answered and refused the request.
    #[error("partner rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    /// The partner could not be reached or did not answer.
    #[error("partner unavailable: {0}")]
    Unavailable(String),
}

pub type PartnerResult<T> = std::result::Result<T, PartnerError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    pub idempotency_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundDebitPolicy {
    Allowed,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountNumberRequest {
    pub account_id: String,
    pub name: String,
    pub inbound_debits: InboundDebitPolicy,
    pub idempotency_token: String,
}

/// Identifier of a resource the partner just created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResource {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub current_balance: i64,
    pub available_balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountNumber {
    pub status: String,
    pub account_number: String,
    pub routing_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDetails {
    pub status: String,
    pub numbers: Vec<AccountNumber>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFundsRequest {
    pub account_id: String,
    pub amount: i64,
    pub description: String,
    pub account_number: String,
    pub routing_number: String,
    pub idempotency_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTransfer {
    pub id: String,
    pub transaction_id: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransfer {
    pub id: String,
    pub account_id: String,
    pub amount: i64,
    pub description: String,
    pub account_number: String,
    pub routing_number: String,
    pub transaction_id: Option<String>,
    pub status: String,
}

/// Settlement channels a routing number accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingCapabilities {
    pub routing_number: String,
    pub real_time_payments: bool,
    pub ach: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub account_id: String,
    pub account_number_id: String,
    pub amount: i64,
    pub description: String,
    pub creditor: String,
    pub rail: PaymentRail,
    pub destination: BankAddress,
    pub idempotency_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedPayment {
    pub id: String,
    pub rail: PaymentRail,
    pub transaction_id: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankPayment {
    pub id: String,
    pub account_id: String,
    pub amount: i64,
    pub description: String,
    pub rail: PaymentRail,
    pub transaction_id: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: String,
    pub account_id: String,
    pub amount: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPage {
    pub transactions: Vec<BankTransaction>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait BankingPartner: Send + Sync {
    async fn create_account(&self, request: CreateAccountRequest) -> PartnerResult<CreatedResource>;

    async fn create_account_number(
        &self,
        request: CreateAccountNumberRequest,
    ) -> PartnerResult<CreatedResource>;

    async fn get_account_balance(&self, account_id: &str) -> PartnerResult<AccountBalance>;

    async fn get_account_details(&self, account_id: &str) -> PartnerResult<AccountDetails>;

    async fn transfer_funds(&self, request: TransferFundsRequest) -> PartnerResult<SubmittedTransfer>;

    async fn get_transfer(&self, transfer_id: &str) -> PartnerResult<BankTransfer>;

    async fn routing_capabilities(&self, routing_number: &str) -> PartnerResult<RoutingCapabilities>;

    async fn create_payment(&self, request: CreatePaymentRequest) -> PartnerResult<SubmittedPayment>;

    async fn get_payment(&self, payment_id: &str, rail: PaymentRail) -> PartnerResult<BankPayment>;

    async fn list_transactions(
        &self,
        account_id: &str,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> PartnerResult<TransactionPage>;
}
