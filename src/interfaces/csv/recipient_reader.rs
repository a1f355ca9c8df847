use crate::domain::recipient::{BankAddress, Recipient};
use crate::error::{PaymentError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct RecipientRecord {
    id: u64,
    name: String,
    organization: String,
    account_number: Option<String>,
    routing_number: Option<String>,
}

impl From<RecipientRecord> for Recipient {
    fn from(record: RecipientRecord) -> Self {
        let bank_address = match (record.account_number, record.routing_number) {
            (Some(account_number), Some(routing_number)) => Some(BankAddress {
                account_number,
                routing_number,
            }),
            _ => None,
        };
        Recipient {
            id: record.id,
            name: record.name,
            organization: record.organization,
            bank_address,
        }
    }
}

/// Reads `id,name,organization,account_number,routing_number` rows used to
/// seed the recipient directory. A recipient without both bank columns has
/// no bank address.
pub struct RecipientReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RecipientReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn recipients(self) -> impl Iterator<Item = Result<Recipient>> {
        self.reader
            .into_deserialize::<RecipientRecord>()
            .map(|result| result.map(Recipient::from).map_err(PaymentError::from))
    }
}
