use crate::domain::account::{Account, AccountId, AccountType};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AccountRow<'a> {
    id: AccountId,
    owner: &'a str,
    bank: &'a str,
    #[serde(rename = "type")]
    kind: AccountType,
    balance: Decimal,
}

/// Writes the final account snapshot as `id,owner,bank,type,balance` rows.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes one row per account, `bank_name` resolving each account's bank.
    pub fn write_accounts<'a, I, F>(&mut self, accounts: I, bank_name: F) -> Result<()>
    where
        I: IntoIterator<Item = &'a Account>,
        F: Fn(&Account) -> &'a str,
    {
        for account in accounts {
            self.writer.serialize(AccountRow {
                id: account.id,
                owner: &account.owner,
                bank: bank_name(account),
                kind: account.kind,
                balance: account.balance.value().normalize(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
