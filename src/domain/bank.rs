use serde::{Deserialize, Serialize};

pub type BankId = u64;

/// A bank owning a set of accounts. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    pub id: BankId,
    pub name: String,
}
