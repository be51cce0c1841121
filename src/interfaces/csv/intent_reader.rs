use crate::domain::account::AccountId;
use crate::domain::intent::TransactionIntent;
use crate::domain::transaction::TransactionKind;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use uuid::Uuid;

/// One row of an intents file: `type, source, target, amount, key`.
#[derive(Debug, Deserialize, PartialEq)]
pub struct IntentRecord {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub source: AccountId,
    #[serde(default)]
    pub target: Option<AccountId>,
    pub amount: Decimal,
    /// Reusing a key marks the row as a redelivery of an earlier intent.
    #[serde(default)]
    pub key: Option<Uuid>,
}

impl From<IntentRecord> for TransactionIntent {
    fn from(record: IntentRecord) -> Self {
        TransactionIntent {
            id: record.key.unwrap_or_else(Uuid::new_v4),
            kind: record.kind,
            amount: record.amount,
            source_account_id: record.source,
            target_account_id: record.target,
        }
    }
}

/// Reads transaction intents from a CSV source.
///
/// Whitespace around fields is trimmed and trailing optional columns may be left
/// out entirely.
pub struct IntentReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> IntentReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: super::reader_builder().from_reader(source),
        }
    }

    /// Lazily deserializes intents, one `Result` per row.
    pub fn intents(self) -> impl Iterator<Item = Result<TransactionIntent>> {
        self.reader.into_deserialize().map(|result| {
            result
                .map(|record: IntentRecord| record.into())
                .map_err(LedgerError::from)
        })
    }
}
