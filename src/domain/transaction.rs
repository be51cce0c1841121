use super::account::{AccountId, Amount};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TransactionId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Transfer,
}

/// Append-only ledger entry written once per applied mutation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub source_account_id: AccountId,
    pub target_account_id: Option<AccountId>,
    /// Identifier of the intent that produced this entry, when it came from the queue.
    pub idempotency_key: Option<Uuid>,
}

impl Transaction {
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.source_account_id == account_id || self.target_account_id == Some(account_id)
    }
}

/// A ledger entry that has not been assigned an id yet.
#[derive(Debug, PartialEq, Clone)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub amount: Amount,
    pub source_account_id: AccountId,
    pub target_account_id: Option<AccountId>,
    pub idempotency_key: Option<Uuid>,
}

impl NewTransaction {
    pub fn deposit(account_id: AccountId, amount: Amount) -> Self {
        Self {
            kind: TransactionKind::Deposit,
            amount,
            source_account_id: account_id,
            target_account_id: None,
            idempotency_key: None,
        }
    }

    pub fn withdraw(account_id: AccountId, amount: Amount) -> Self {
        Self {
            kind: TransactionKind::Withdraw,
            ..Self::deposit(account_id, amount)
        }
    }

    pub fn transfer(source: AccountId, target: AccountId, amount: Amount) -> Self {
        Self {
            kind: TransactionKind::Transfer,
            target_account_id: Some(target),
            ..Self::deposit(source, amount)
        }
    }

    pub fn with_key(mut self, key: Uuid) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn into_transaction(self, id: TransactionId) -> Transaction {
        Transaction {
            id,
            kind: self.kind,
            amount: self.amount.value(),
            source_account_id: self.source_account_id,
            target_account_id: self.target_account_id,
            idempotency_key: self.idempotency_key,
        }
    }
}
