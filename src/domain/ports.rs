use super::account::{Account, AccountId, NewAccount};
use super::bank::{Bank, BankId};
use super::transaction::{NewTransaction, Transaction};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Durable home of banks, accounts and the transaction log.
///
/// Reads always return the latest committed state. Writes that replace an account
/// are optimistic: the caller hands back the account it loaded, and the write fails
/// with [`LedgerError::Conflict`](crate::error::LedgerError::Conflict) when another
/// writer committed in between.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_bank(&self, name: &str) -> Result<Bank>;
    async fn get_bank(&self, id: BankId) -> Result<Option<Bank>>;

    /// Opens an account. `(owner, bank_id, type)` must be unique.
    async fn create_account(&self, account: NewAccount) -> Result<Account>;
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>>;

    /// Returns the most recently opened account belonging to `owner`.
    async fn find_account_by_owner(&self, owner: &str) -> Result<Option<Account>>;
    async fn list_accounts_by_bank(&self, bank_id: BankId) -> Result<Vec<Account>>;
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Persists a single account if its version still matches, returning the
    /// stored copy with the bumped version.
    async fn save_account(&self, account: &Account) -> Result<Account>;

    /// Appends a ledger entry. Fails with `DuplicateIntent` when the idempotency
    /// key was already recorded.
    async fn record_transaction(&self, tx: NewTransaction) -> Result<Transaction>;
    async fn find_transaction_by_key(&self, key: Uuid) -> Result<Option<Transaction>>;
    async fn list_transactions(&self, account_id: AccountId) -> Result<Vec<Transaction>>;

    /// Atomically persists every account in `accounts` and appends `tx`.
    ///
    /// Either all rows are written or none: a stale version, a duplicate key or a
    /// broken account invariant aborts the whole commit.
    async fn commit(&self, accounts: &[Account], tx: NewTransaction) -> Result<Transaction>;
}

pub type LedgerStoreHandle = Arc<dyn LedgerStore>;

pub type DeliveryTag = u64;

/// A message claimed by one consumer until it is acked, nacked or its
/// visibility timeout expires.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDelivery {
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Message(RawDelivery),
    /// Nothing became deliverable within the wait.
    Empty,
    Closed,
}

/// A message the queue will not redeliver on its own. The payload is kept
/// byte-for-byte for operator inspection and replay.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub payload: Vec<u8>,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub in_flight: usize,
    pub dead_lettered: usize,
}

impl QueueStats {
    pub fn is_drained(&self) -> bool {
        self.ready == 0 && self.in_flight == 0
    }
}

/// Durable, at-least-once message transport with a dead-letter queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, payload: Vec<u8>) -> Result<()>;

    /// Claims the next deliverable message, waiting at most `wait`.
    async fn receive(&self, wait: Duration) -> Result<Received>;
    async fn ack(&self, tag: DeliveryTag) -> Result<()>;

    /// Releases a claim. With `requeue` the message becomes deliverable again,
    /// otherwise it moves to the dead-letter queue with `reason`.
    async fn nack(&self, tag: DeliveryTag, requeue: bool, reason: &str) -> Result<()>;

    /// Drops every ready message, returning how many were removed.
    async fn purge(&self) -> Result<usize>;

    /// Stops delivery. Outstanding claims can still be settled.
    async fn close(&self) -> Result<()>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>>;

    /// Moves every dead letter back onto the queue with a fresh attempt count.
    async fn replay_dead_letters(&self) -> Result<usize>;
    async fn stats(&self) -> Result<QueueStats>;
}

pub type QueueHandle = Arc<dyn MessageQueue>;
