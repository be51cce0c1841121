use super::bank::BankId;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub, SubAssign};

pub type AccountId = u64;

/// Ledger columns are `numeric(12, 2)`: two fractional digits, ten integer digits.
pub const MAX_SCALE: u32 = 2;
pub const MAX_MONEY: Decimal = dec!(9999999999.99);

/// Largest single withdrawal an `IndividualInvestment` account accepts.
pub const INDIVIDUAL_INVESTMENT_WITHDRAWAL_LIMIT: Decimal = dec!(500);

fn check_precision(value: Decimal) -> Result<()> {
    if value.normalize().scale() > MAX_SCALE {
        return Err(LedgerError::validation(format!(
            "{value} has more than {MAX_SCALE} decimal places"
        )));
    }
    if value.abs() > MAX_MONEY {
        return Err(LedgerError::validation(format!(
            "{value} exceeds the ledger maximum of {MAX_MONEY}"
        )));
    }
    Ok(())
}

/// Represents a monetary value held by an account.
///
/// This is a wrapper around `rust_decimal::Decimal` to enforce domain-specific rules
/// and provide type safety for financial calculations.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub Decimal);

/// Represents a positive monetary amount for transactions.
///
/// Ensures that transaction amounts are always positive and fit the ledger precision.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value <= Decimal::ZERO {
            return Err(LedgerError::validation("Amount must be positive"));
        }
        check_precision(value)?;
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Balance {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Balance::ZERO, Add::add)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum AccountType {
    Checking,
    IndividualInvestment,
    CorporateInvestment,
}

/// Data required to open an account.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub owner: String,
    pub balance: Balance,
    pub kind: AccountType,
    pub bank_id: BankId,
}

impl NewAccount {
    pub fn new(
        owner: impl Into<String>,
        balance: Decimal,
        kind: AccountType,
        bank_id: BankId,
    ) -> Self {
        Self {
            owner: owner.into(),
            balance: Balance::new(balance),
            kind,
            bank_id,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            return Err(LedgerError::validation("Account owner must not be empty"));
        }
        if self.balance < Balance::ZERO {
            return Err(LedgerError::validation(
                "Initial balance must not be negative",
            ));
        }
        check_precision(self.balance.0)
    }

    /// Materializes the account once the store has assigned an id.
    pub fn into_account(self, id: AccountId) -> Account {
        Account {
            id,
            owner: self.owner,
            balance: self.balance,
            kind: self.kind,
            bank_id: self.bank_id,
            version: 0,
        }
    }
}

/// A bank account as persisted by the ledger store.
///
/// `version` is bumped by the store on every committed mutation and is compared at
/// commit time, so an account loaded before a concurrent update can not overwrite it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub balance: Balance,
    #[serde(rename = "type")]
    pub kind: AccountType,
    pub bank_id: BankId,
    pub version: u64,
}

impl Account {
    /// Credits the balance.
    pub fn deposit(&mut self, amount: Amount) -> Result<()> {
        let next = self.balance + amount.into();
        check_precision(next.0)?;
        self.balance = next;
        Ok(())
    }

    /// Debits the balance, enforcing the account type's withdrawal ceiling
    /// and the no-overdraft rule.
    pub fn withdraw(&mut self, amount: Amount) -> Result<()> {
        if self.kind == AccountType::IndividualInvestment
            && amount.value() > INDIVIDUAL_INVESTMENT_WITHDRAWAL_LIMIT
        {
            return Err(LedgerError::WithdrawalLimitExceeded {
                account_id: self.id,
            });
        }
        self.debit(amount)
    }

    /// Moves funds to `target`. Only the no-overdraft rule applies; the withdrawal
    /// ceiling is specific to cash withdrawals.
    pub fn transfer_to(&mut self, target: &mut Account, amount: Amount) -> Result<()> {
        if self.id == target.id {
            return Err(LedgerError::validation(
                "Transfer source and target must differ",
            ));
        }
        self.debit(amount)?;
        if let Err(err) = target.deposit(amount) {
            self.balance += amount.into();
            return Err(err);
        }
        Ok(())
    }

    /// Invariants a store must check before persisting the account.
    pub fn check_committable(&self) -> Result<()> {
        if self.balance < Balance::ZERO {
            return Err(LedgerError::InsufficientFunds {
                account_id: self.id,
            });
        }
        check_precision(self.balance.0)
    }

    fn debit(&mut self, amount: Amount) -> Result<()> {
        let amount = Balance::from(amount);
        if self.balance >= amount {
            self.balance -= amount;
            Ok(())
        } else {
            Err(LedgerError::InsufficientFunds {
                account_id: self.id,
            })
        }
    }
}
