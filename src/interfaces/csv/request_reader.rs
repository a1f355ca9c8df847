use crate::domain::account::{Amount, CreateAccountInput};
use crate::domain::payment::CreatePaymentInput;
use crate::domain::transfer::CreateTransferInput;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

const DEFAULT_ORIGIN_IP: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreateAccount,
    CreateTransfer,
    CreatePayment,
}

/// One row of the batch input. Which columns are required depends on
/// `operation`; the rest may be left empty.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequestRecord {
    pub operation: Operation,
    pub owner: u64,
    pub key: String,
    pub origin_ip: Option<String>,
    pub account_id: Option<u64>,
    pub recipient_id: Option<u64>,
    pub name: Option<String>,
    pub amount: Option<Decimal>,
    pub description: Option<String>,
    pub account_number: Option<String>,
    pub routing_number: Option<String>,
}

/// A row turned into the input of one saga.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchRequest {
    CreateAccount(CreateAccountInput),
    CreateTransfer(CreateTransferInput),
    CreatePayment(CreatePaymentInput),
}

fn required<T>(value: Option<T>, column: &str, operation: Operation) -> Result<T> {
    value.ok_or_else(|| {
        PaymentError::ValidationError(format!("column '{column}' is required for {operation:?}"))
    })
}

impl RequestRecord {
    pub fn origin_ip(&self) -> &str {
        self.origin_ip.as_deref().unwrap_or(DEFAULT_ORIGIN_IP)
    }

    pub fn to_request(&self) -> Result<BatchRequest> {
        let op = self.operation;
        match op {
            Operation::CreateAccount => Ok(BatchRequest::CreateAccount(CreateAccountInput {
                name: required(self.name.clone(), "name", op)?,
            })),
            Operation::CreateTransfer => Ok(BatchRequest::CreateTransfer(CreateTransferInput {
                account_id: required(self.account_id, "account_id", op)?,
                amount: Amount::new(required(self.amount, "amount", op)?)?,
                description: self.description.clone().unwrap_or_default(),
                account_number: required(self.account_number.clone(), "account_number", op)?,
                routing_number: required(self.routing_number.clone(), "routing_number", op)?,
            })),
            Operation::CreatePayment => Ok(BatchRequest::CreatePayment(CreatePaymentInput {
                account_id: required(self.account_id, "account_id", op)?,
                recipient_id: required(self.recipient_id, "recipient_id", op)?,
                amount: Amount::new(required(self.amount, "amount", op)?)?,
                description: self.description.clone().unwrap_or_default(),
            })),
        }
    }
}

/// Reads batch requests from a CSV source.
///
/// Wraps `csv::Reader`, trimming whitespace and tolerating short rows, and
/// yields one `Result<RequestRecord>` per line.
pub struct RequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RequestReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows, so large batches are streamed.
    pub fn requests(self) -> impl Iterator<Item = Result<RequestRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
