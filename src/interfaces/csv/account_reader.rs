use crate::domain::account::AccountType;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One row of an accounts file: `bank, owner, type, balance`.
#[derive(Debug, Deserialize, PartialEq)]
pub struct AccountRecord {
    pub bank: String,
    pub owner: String,
    #[serde(rename = "type")]
    pub kind: AccountType,
    pub balance: Decimal,
}

/// Reads opening account balances from a CSV source.
pub struct AccountReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> AccountReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: super::reader_builder().from_reader(source),
        }
    }

    pub fn accounts(self) -> impl Iterator<Item = Result<AccountRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}
