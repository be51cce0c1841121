#![allow(dead_code)]

use async_trait::async_trait;
use ledgerq::domain::account::{Account, AccountId, NewAccount};
use ledgerq::domain::bank::{Bank, BankId};
use ledgerq::domain::ports::LedgerStore;
use ledgerq::domain::transaction::{NewTransaction, Transaction};
use ledgerq::error::{LedgerError, Result};
use ledgerq::infrastructure::in_memory::InMemoryLedgerStore;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::NamedTempFile;
use uuid::Uuid;

pub const ACCOUNTS_HEADER: [&str; 4] = ["bank", "owner", "type", "balance"];
pub const INTENTS_HEADER: [&str; 5] = ["type", "source", "target", "amount", "key"];

/// Writes `header` and `rows` to a fresh temporary CSV file.
pub fn csv_file<const N: usize>(header: [&str; N], rows: &[[&str; N]]) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    let mut wtr = csv::Writer::from_path(file.path()).unwrap();
    wtr.write_record(header).unwrap();
    for row in rows {
        wtr.write_record(row).unwrap();
    }
    wtr.flush().unwrap();
    file
}

/// `rows` one-unit deposits spread round-robin over accounts `1..=accounts`, each
/// with its own key.
pub fn generate_deposits(path: &Path, accounts: AccountId, rows: u64) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(INTENTS_HEADER)?;
    for i in 0..rows {
        let account = (i % accounts + 1).to_string();
        let key = Uuid::new_v4().to_string();
        wtr.write_record(["Deposit", account.as_str(), "", "1.0", key.as_str()])?;
    }

    wtr.flush()?;
    Ok(())
}

/// In-memory store whose first `failures` commits fail with a transient error.
pub struct FlakyStore {
    inner: InMemoryLedgerStore,
    failures: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: InMemoryLedgerStore, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
        }
    }

    pub fn remaining_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn create_bank(&self, name: &str) -> Result<Bank> {
        self.inner.create_bank(name).await
    }

    async fn get_bank(&self, id: BankId) -> Result<Option<Bank>> {
        self.inner.get_bank(id).await
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        self.inner.create_account(account).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.inner.get_account(id).await
    }

    async fn find_account_by_owner(&self, owner: &str) -> Result<Option<Account>> {
        self.inner.find_account_by_owner(owner).await
    }

    async fn list_accounts_by_bank(&self, bank_id: BankId) -> Result<Vec<Account>> {
        self.inner.list_accounts_by_bank(bank_id).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.inner.list_accounts().await
    }

    async fn save_account(&self, account: &Account) -> Result<Account> {
        self.inner.save_account(account).await
    }

    async fn record_transaction(&self, tx: NewTransaction) -> Result<Transaction> {
        self.inner.record_transaction(tx).await
    }

    async fn find_transaction_by_key(&self, key: Uuid) -> Result<Option<Transaction>> {
        self.inner.find_transaction_by_key(key).await
    }

    async fn list_transactions(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        self.inner.list_transactions(account_id).await
    }

    async fn commit(&self, accounts: &[Account], tx: NewTransaction) -> Result<Transaction> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "store unavailable",
            )));
        }
        self.inner.commit(accounts, tx).await
    }
}

/// In-memory store whose account reads never complete.
pub struct HungStore {
    inner: InMemoryLedgerStore,
}

impl HungStore {
    pub fn new(inner: InMemoryLedgerStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LedgerStore for HungStore {
    async fn create_bank(&self, name: &str) -> Result<Bank> {
        self.inner.create_bank(name).await
    }

    async fn get_bank(&self, id: BankId) -> Result<Option<Bank>> {
        self.inner.get_bank(id).await
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        self.inner.create_account(account).await
    }

    async fn get_account(&self, _id: AccountId) -> Result<Option<Account>> {
        std::future::pending().await
    }

    async fn find_account_by_owner(&self, owner: &str) -> Result<Option<Account>> {
        self.inner.find_account_by_owner(owner).await
    }

    async fn list_accounts_by_bank(&self, bank_id: BankId) -> Result<Vec<Account>> {
        self.inner.list_accounts_by_bank(bank_id).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.inner.list_accounts().await
    }

    async fn save_account(&self, account: &Account) -> Result<Account> {
        self.inner.save_account(account).await
    }

    async fn record_transaction(&self, tx: NewTransaction) -> Result<Transaction> {
        self.inner.record_transaction(tx).await
    }

    async fn find_transaction_by_key(&self, key: Uuid) -> Result<Option<Transaction>> {
        self.inner.find_transaction_by_key(key).await
    }

    async fn list_transactions(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        self.inner.list_transactions(account_id).await
    }

    async fn commit(&self, accounts: &[Account], tx: NewTransaction) -> Result<Transaction> {
        self.inner.commit(accounts, tx).await
    }
}
