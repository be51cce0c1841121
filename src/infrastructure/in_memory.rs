use crate::domain::account::{Account, AccountId, NewAccount};
use crate::domain::bank::{Bank, BankId};
use crate::domain::ports::LedgerStore;
use crate::domain::transaction::{NewTransaction, Transaction, TransactionId};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    banks: BTreeMap<BankId, Bank>,
    accounts: BTreeMap<AccountId, Account>,
    transactions: BTreeMap<TransactionId, Transaction>,
    idempotency: HashMap<Uuid, TransactionId>,
    last_bank_id: BankId,
    last_account_id: AccountId,
    last_transaction_id: TransactionId,
}

impl LedgerState {
    fn require_account(&self, id: AccountId) -> Result<&Account> {
        self.accounts
            .get(&id)
            .ok_or_else(|| LedgerError::account_not_found(id))
    }

    fn check_version(&self, account: &Account) -> Result<()> {
        let stored = self.require_account(account.id)?;
        if stored.version != account.version {
            return Err(LedgerError::Conflict {
                account_id: account.id,
            });
        }
        account.check_committable()
    }

    fn check_entry(&self, tx: &NewTransaction) -> Result<()> {
        if let Some(key) = tx.idempotency_key
            && self.idempotency.contains_key(&key)
        {
            return Err(LedgerError::DuplicateIntent(key));
        }
        self.require_account(tx.source_account_id)?;
        if let Some(target) = tx.target_account_id {
            self.require_account(target)?;
        }
        Ok(())
    }

    fn put_account(&mut self, account: &Account) -> Account {
        let mut stored = account.clone();
        stored.version += 1;
        self.accounts.insert(stored.id, stored.clone());
        stored
    }

    fn append(&mut self, tx: NewTransaction) -> Transaction {
        self.last_transaction_id += 1;
        let tx = tx.into_transaction(self.last_transaction_id);
        if let Some(key) = tx.idempotency_key {
            self.idempotency.insert(key, tx.id);
        }
        self.transactions.insert(tx.id, tx.clone());
        tx
    }
}

/// A thread-safe in-memory ledger store.
///
/// All state lives behind a single `Arc<RwLock<..>>`, so a commit holding the write
/// lock is trivially atomic. Cloning shares the same ledger.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_bank(&self, name: &str) -> Result<Bank> {
        if name.trim().is_empty() {
            return Err(LedgerError::validation("Bank name must not be empty"));
        }
        let mut state = self.state.write().await;
        state.last_bank_id += 1;
        let bank = Bank {
            id: state.last_bank_id,
            name: name.to_string(),
        };
        state.banks.insert(bank.id, bank.clone());
        Ok(bank)
    }

    async fn get_bank(&self, id: BankId) -> Result<Option<Bank>> {
        let state = self.state.read().await;
        Ok(state.banks.get(&id).cloned())
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        account.validate()?;
        let mut state = self.state.write().await;
        if !state.banks.contains_key(&account.bank_id) {
            return Err(LedgerError::NotFound {
                entity: "Bank",
                id: account.bank_id,
            });
        }
        let taken = state.accounts.values().any(|existing| {
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
        state.last_account_id += 1;
        let account = account.into_account(state.last_account_id);
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&id).cloned())
    }

    async fn find_account_by_owner(&self, owner: &str) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .rev()
            .find(|account| account.owner == owner)
            .cloned())
    }

    async fn list_accounts_by_bank(&self, bank_id: BankId) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .filter(|account| account.bank_id == bank_id)
            .cloned()
            .collect())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.values().cloned().collect())
    }

    async fn save_account(&self, account: &Account) -> Result<Account> {
        let mut state = self.state.write().await;
        state.check_version(account)?;
        Ok(state.put_account(account))
    }

    async fn record_transaction(&self, tx: NewTransaction) -> Result<Transaction> {
        let mut state = self.state.write().await;
        state.check_entry(&tx)?;
        Ok(state.append(tx))
    }

    async fn find_transaction_by_key(&self, key: Uuid) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .idempotency
            .get(&key)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn list_transactions(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|tx| tx.involves(account_id))
            .cloned()
            .collect())
    }

    async fn commit(&self, accounts: &[Account], tx: NewTransaction) -> Result<Transaction> {
        let mut state = self.state.write().await;
        state.check_entry(&tx)?;
        for account in accounts {
            state.check_version(account)?;
        }
        for account in accounts {
            state.put_account(account);
        }
        Ok(state.append(tx))
    }
}
