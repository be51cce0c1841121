use super::account::{AccountId, Amount};
use super::transaction::{NewTransaction, TransactionKind};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use uuid::Uuid;

/// A queued, not yet applied request to mutate the ledger.
///
/// The wire form is JSON with camelCase field names. `id` doubles as the idempotency
/// key: every delivery of the same intent carries the same id, so the processor can
/// recognise redeliveries. A queued payload must carry it; producers that omit it
/// get one assigned by [`TransactionIntent::from_value`] before the intent is enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransactionIntent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    #[serde(
        serialize_with = "serialize_number",
        deserialize_with = "deserialize_number"
    )]
    pub amount: Decimal,
    pub source_account_id: AccountId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_account_id: Option<AccountId>,
}

/// Producer-side form of an intent, where the id is still optional.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UnkeyedIntent {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(rename = "type")]
    kind: TransactionKind,
    #[serde(deserialize_with = "deserialize_number")]
    amount: Decimal,
    source_account_id: AccountId,
    #[serde(default)]
    target_account_id: Option<AccountId>,
}

impl From<UnkeyedIntent> for TransactionIntent {
    fn from(wire: UnkeyedIntent) -> Self {
        TransactionIntent {
            id: wire.id.unwrap_or_else(Uuid::new_v4),
            kind: wire.kind,
            amount: wire.amount,
            source_account_id: wire.source_account_id,
            target_account_id: wire.target_account_id,
        }
    }
}

fn serialize_number<S>(amount: &Decimal, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match amount.to_f64() {
        Some(value) => serializer.serialize_f64(value),
        None => Err(serde::ser::Error::custom(format!(
            "amount {amount} is not representable as a JSON number"
        ))),
    }
}

/// Accepts JSON numbers only. The decimal is parsed from the number's shortest
/// textual form so `0.1` stays exact.
fn deserialize_number<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| serde::de::Error::custom(format!("amount {text} is out of range")))
}

impl TransactionIntent {
    pub fn deposit(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: TransactionKind::Deposit,
            amount,
            source_account_id: account_id,
            target_account_id: None,
        }
    }

    pub fn withdraw(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            kind: TransactionKind::Withdraw,
            ..Self::deposit(account_id, amount)
        }
    }

    pub fn transfer(source: AccountId, target: AccountId, amount: Decimal) -> Self {
        Self {
            kind: TransactionKind::Transfer,
            target_account_id: Some(target),
            ..Self::deposit(source, amount)
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Checks the intent's shape and returns the validated amount.
    pub fn validate(&self) -> Result<Amount> {
        let amount = Amount::new(self.amount)?;
        match (self.kind, self.target_account_id) {
            (TransactionKind::Transfer, None) => Err(LedgerError::validation(
                "Transfer requires a target account",
            )),
            (TransactionKind::Transfer, Some(target)) if target == self.source_account_id => Err(
                LedgerError::validation("Transfer source and target must differ"),
            ),
            (TransactionKind::Deposit | TransactionKind::Withdraw, Some(_)) => {
                Err(LedgerError::validation(format!(
                    "{:?} must not carry a target account",
                    self.kind
                )))
            }
            _ => Ok(amount),
        }
    }

    /// The ledger entry this intent produces once applied.
    pub fn to_entry(&self, amount: Amount) -> NewTransaction {
        NewTransaction {
            kind: self.kind,
            amount,
            source_account_id: self.source_account_id,
            target_account_id: self.target_account_id,
            idempotency_key: Some(self.id),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a queue payload. Unknown types, unexpected fields and a missing id are
    /// validation failures, never retried.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(malformed)
    }

    /// Decodes a producer's intent, assigning a fresh id when it carries none.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value::<UnkeyedIntent>(value)
            .map(Self::from)
            .map_err(malformed)
    }
}

fn malformed(e: serde_json::Error) -> LedgerError {
    LedgerError::validation(format!("Malformed transaction intent: {e}"))
}
