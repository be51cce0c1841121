use crate::domain::account::{Account, AccountId, NewAccount};
use crate::domain::bank::{Bank, BankId};
use crate::domain::ports::LedgerStore;
use crate::domain::transaction::{NewTransaction, Transaction, TransactionId};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for bank records.
pub const CF_BANKS: &str = "banks";
/// Column Family for account states.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for the append-only transaction log.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family mapping idempotency keys to transaction ids.
pub const CF_IDEMPOTENCY: &str = "idempotency";
/// Column Family for id sequences.
pub const CF_META: &str = "meta";

const SEQ_BANK: &[u8] = b"seq:bank";
const SEQ_ACCOUNT: &[u8] = b"seq:account";
const SEQ_TRANSACTION: &[u8] = b"seq:transaction";

/// A persistent ledger store backed by RocksDB.
///
/// Each entity lives in its own Column Family with big-endian id keys, so
/// iteration yields ids in ascending order. Every write goes through a single
/// `WriteBatch`, and writers are serialized by an async mutex so that version
/// checks and the batch they guard can not interleave.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBLedgerStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBLedgerStore {
    /// Opens or creates a RocksDB instance at the specified path, creating any
    /// missing Column Family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_BANKS, CF_ACCOUNTS, CF_TRANSACTIONS, CF_IDEMPOTENCY, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            LedgerError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &'static str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &'static str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    fn put_json<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &'static str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    /// Reserves the next id of a sequence; the bump is only durable once `batch` is written.
    fn next_id(&self, batch: &mut WriteBatch, seq: &[u8]) -> Result<u64> {
        let current = match self.db.get_cf(self.cf(CF_META)?, seq)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    LedgerError::InternalError(Box::new(std::io::Error::other(
                        "corrupt id sequence",
                    )))
                })?;
                u64::from_be_bytes(bytes)
            }
            None => 0,
        };
        let next = current + 1;
        batch.put_cf(self.cf(CF_META)?, seq, next.to_be_bytes());
        Ok(next)
    }

    fn load_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.get_json(CF_ACCOUNTS, &id.to_be_bytes())
    }

    fn check_version(&self, account: &Account) -> Result<()> {
        let stored = self
            .load_account(account.id)?
            .ok_or_else(|| LedgerError::account_not_found(account.id))?;
        if stored.version != account.version {
            return Err(LedgerError::Conflict {
                account_id: account.id,
            });
        }
        account.check_committable()
    }

    fn check_entry(&self, tx: &NewTransaction) -> Result<()> {
        if let Some(key) = tx.idempotency_key
            && self
                .db
                .get_pinned_cf(self.cf(CF_IDEMPOTENCY)?, key.as_bytes())?
                .is_some()
        {
            return Err(LedgerError::DuplicateIntent(key));
        }
        for id in std::iter::once(tx.source_account_id).chain(tx.target_account_id) {
            if self.load_account(id)?.is_none() {
                return Err(LedgerError::account_not_found(id));
            }
        }
        Ok(())
    }

    fn stage_account(&self, batch: &mut WriteBatch, account: &Account) -> Result<Account> {
        let mut stored = account.clone();
        stored.version += 1;
        self.put_json(batch, CF_ACCOUNTS, &stored.id.to_be_bytes(), &stored)?;
        Ok(stored)
    }

    fn stage_transaction(&self, batch: &mut WriteBatch, tx: NewTransaction) -> Result<Transaction> {
        let id: TransactionId = self.next_id(batch, SEQ_TRANSACTION)?;
        let tx = tx.into_transaction(id);
        self.put_json(batch, CF_TRANSACTIONS, &id.to_be_bytes(), &tx)?;
        if let Some(key) = tx.idempotency_key {
            batch.put_cf(self.cf(CF_IDEMPOTENCY)?, key.as_bytes(), id.to_be_bytes());
        }
        Ok(tx)
    }
}

#[async_trait]
impl LedgerStore for RocksDBLedgerStore {
    async fn create_bank(&self, name: &str) -> Result<Bank> {
        if name.trim().is_empty() {
            return Err(LedgerError::validation("Bank name must not be empty"));
        }
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let bank = Bank {
            id: self.next_id(&mut batch, SEQ_BANK)?,
            name: name.to_string(),
        };
        self.put_json(&mut batch, CF_BANKS, &bank.id.to_be_bytes(), &bank)?;
        self.db.write(batch)?;
        Ok(bank)
    }

    async fn get_bank(&self, id: BankId) -> Result<Option<Bank>> {
        self.get_json(CF_BANKS, &id.to_be_bytes())
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        account.validate()?;
        let _guard = self.write_lock.lock().await;
        if self.get_bank(account.bank_id).await?.is_none() {
            return Err(LedgerError::NotFound {
                entity: "Bank",
                id: account.bank_id,
            });
        }
        let taken = self.scan::<Account>(CF_ACCOUNTS)?.iter().any(|existing| {
            existing.owner == account.owner
                && existing.bank_id == account.bank_id
                && existing.kind == account.kind
        });
        if taken {
            return Err(LedgerError::validation(format!(
                "{} already holds a {:?} account at bank {}",
                account.owner, account.kind, account.bank_id
            )));
        }
        let mut batch = WriteBatch::default();
        let account = account.into_account(self.next_id(&mut batch, SEQ_ACCOUNT)?);
        self.put_json(&mut batch, CF_ACCOUNTS, &account.id.to_be_bytes(), &account)?;
        self.db.write(batch)?;
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.load_account(id)
    }

    async fn find_account_by_owner(&self, owner: &str) -> Result<Option<Account>> {
        Ok(self
            .scan::<Account>(CF_ACCOUNTS)?
            .into_iter()
            .filter(|account| account.owner == owner)
            .max_by_key(|account| account.id))
    }

    async fn list_accounts_by_bank(&self, bank_id: BankId) -> Result<Vec<Account>> {
        Ok(self
            .scan::<Account>(CF_ACCOUNTS)?
            .into_iter()
            .filter(|account| account.bank_id == bank_id)
            .collect())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.scan(CF_ACCOUNTS)
    }

    async fn save_account(&self, account: &Account) -> Result<Account> {
        let _guard = self.write_lock.lock().await;
        self.check_version(account)?;
        let mut batch = WriteBatch::default();
        let stored = self.stage_account(&mut batch, account)?;
        self.db.write(batch)?;
        Ok(stored)
    }

    async fn record_transaction(&self, tx: NewTransaction) -> Result<Transaction> {
        let _guard = self.write_lock.lock().await;
        self.check_entry(&tx)?;
        let mut batch = WriteBatch::default();
        let tx = self.stage_transaction(&mut batch, tx)?;
        self.db.write(batch)?;
        Ok(tx)
    }

    async fn find_transaction_by_key(&self, key: Uuid) -> Result<Option<Transaction>> {
        match self.db.get_cf(self.cf(CF_IDEMPOTENCY)?, key.as_bytes())? {
            Some(id) => self.get_json(CF_TRANSACTIONS, &id),
            None => Ok(None),
        }
    }

    async fn list_transactions(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        Ok(self
            .scan::<Transaction>(CF_TRANSACTIONS)?
            .into_iter()
            .filter(|tx| tx.involves(account_id))
            .collect())
    }

    async fn commit(&self, accounts: &[Account], tx: NewTransaction) -> Result<Transaction> {
        let _guard = self.write_lock.lock().await;
        self.check_entry(&tx)?;
        for account in accounts {
            self.check_version(account)?;
        }
        let mut batch = WriteBatch::default();
        for account in accounts {
            self.stage_account(&mut batch, account)?;
        }
        let tx = self.stage_transaction(&mut batch, tx)?;
        self.db.write(batch)?;
        Ok(tx)
    }
}
