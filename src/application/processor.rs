use super::broker::{IntentDelivery, IntentHandler};
use super::with_timeout;
use crate::config::ProcessorConfig;
use crate::domain::account::{Account, AccountId, Amount};
use crate::domain::intent::TransactionIntent;
use crate::domain::ports::LedgerStoreHandle;
use crate::domain::transaction::{Transaction, TransactionKind};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

/// Outcome of applying an intent to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Committed(Transaction),
    /// The intent's key was already in the ledger; nothing changed.
    AlreadyApplied(Transaction),
}

impl Applied {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Applied::Committed(tx) | Applied::AlreadyApplied(tx) => tx,
        }
    }
}

/// What happened to a delivery once processing finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Requeued,
    DeadLettered,
    /// Settling failed; the queue redelivers once the claim expires.
    Unsettled,
}

/// Applies transaction intents against a [`LedgerStore`](crate::domain::ports::LedgerStore).
///
/// No account state is kept between messages. Every intent is applied by loading the
/// accounts it touches, running the domain rules on the copies and committing the
/// result together with the ledger entry. A concurrent writer makes the commit fail
/// with a version conflict, in which case the whole step is repeated on fresh data.
#[derive(Clone)]
pub struct TransactionProcessor {
    store: LedgerStoreHandle,
    config: ProcessorConfig,
}

impl TransactionProcessor {
    pub fn new(store: LedgerStoreHandle, config: ProcessorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &LedgerStoreHandle {
        &self.store
    }

    /// Validates and applies a single intent.
    ///
    /// Re-applying an intent whose id is already recorded returns
    /// [`Applied::AlreadyApplied`] without touching any balance.
    pub async fn apply(&self, intent: &TransactionIntent) -> Result<Applied> {
        let amount = intent.validate()?;
        let limit = self.config.store_timeout();
        let rounds = self.config.max_conflict_retries.saturating_add(1);

        for round in 1..=rounds {
            if let Some(tx) = with_timeout(
                limit,
                "find_transaction_by_key",
                self.store.find_transaction_by_key(intent.id),
            )
            .await?
            {
                return Ok(Applied::AlreadyApplied(tx));
            }

            let touched = self.stage(intent, amount).await?;
            let commit = self.store.commit(&touched, intent.to_entry(amount));
            match with_timeout(limit, "commit", commit).await {
                Ok(tx) => return Ok(Applied::Committed(tx)),
                Err(LedgerError::Conflict { account_id }) => {
                    debug!(
                        intent_id = %intent.id,
                        account_id,
                        round,
                        "version conflict, reloading"
                    );
                    tokio::task::yield_now().await;
                }
                Err(err @ LedgerError::DuplicateIntent(_)) => {
                    // Another consumer committed the same intent after our lookup.
                    let existing = with_timeout(
                        limit,
                        "find_transaction_by_key",
                        self.store.find_transaction_by_key(intent.id),
                    )
                    .await?;
                    return existing.map(Applied::AlreadyApplied).ok_or(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(LedgerError::Contention { attempts: rounds })
    }

    /// Loads the accounts an intent touches and applies the domain rules to them.
    async fn stage(&self, intent: &TransactionIntent, amount: Amount) -> Result<Vec<Account>> {
        let mut source = self.load(intent.source_account_id).await?;
        match intent.kind {
            TransactionKind::Deposit => {
                source.deposit(amount)?;
                Ok(vec![source])
            }
            TransactionKind::Withdraw => {
                source.withdraw(amount)?;
                Ok(vec![source])
            }
            TransactionKind::Transfer => {
                let target_id = intent
                    .target_account_id
                    .ok_or_else(|| LedgerError::validation("Transfer requires a target account"))?;
                let mut target = self.load(target_id).await?;
                source.transfer_to(&mut target, amount)?;
                Ok(vec![source, target])
            }
        }
    }

    async fn load(&self, id: AccountId) -> Result<Account> {
        with_timeout(
            self.config.store_timeout(),
            "get_account",
            self.store.get_account(id),
        )
        .await?
        .ok_or_else(|| LedgerError::account_not_found(id))
    }

    /// Applies a delivered intent and settles the delivery.
    ///
    /// Successes and duplicates are acked. Transient failures are requeued until the
    /// delivery reaches `max_attempts`; everything else is dead-lettered with the
    /// payload untouched.
    pub async fn process(&self, delivery: IntentDelivery) -> Disposition {
        let intent_id = delivery.intent.id;
        let kind = delivery.intent.kind;
        let attempt = delivery.attempt;

        match self.apply(&delivery.intent).await {
            Ok(Applied::Committed(tx)) => {
                debug!(%intent_id, ?kind, attempt, tx_id = tx.id, "intent applied");
                settle(delivery.ack().await, Disposition::Acked)
            }
            Ok(Applied::AlreadyApplied(tx)) => {
                info!(
                    %intent_id,
                    ?kind,
                    attempt,
                    tx_id = tx.id,
                    "duplicate delivery, already applied"
                );
                settle(delivery.ack().await, Disposition::Acked)
            }
            Err(err) => {
                let error_kind = err.kind();
                let payload = String::from_utf8_lossy(delivery.payload()).into_owned();
                let reason = format!("{error_kind}: {err}");

                if err.is_retryable() && attempt < self.config.max_attempts {
                    warn!(
                        %intent_id, ?kind, attempt, %error_kind, %payload, error = %err,
                        "transient failure, requeueing"
                    );
                    return settle(delivery.nack(&reason, true).await, Disposition::Requeued);
                }

                if err.is_retryable() {
                    error!(
                        %intent_id, ?kind, attempt, %error_kind, %payload, error = %err,
                        "attempts exhausted, dead-lettering"
                    );
                } else {
                    warn!(
                        %intent_id, ?kind, attempt, %error_kind, %payload, error = %err,
                        "rejected, dead-lettering"
                    );
                }
                settle(delivery.nack(&reason, false).await, Disposition::DeadLettered)
            }
        }
    }
}

fn settle(result: Result<()>, disposition: Disposition) -> Disposition {
    match result {
        Ok(()) => disposition,
        Err(err) => {
            error!(error = %err, "failed to settle delivery");
            Disposition::Unsettled
        }
    }
}

#[async_trait]
impl IntentHandler for TransactionProcessor {
    async fn handle(&self, delivery: IntentDelivery) {
        self.process(delivery).await;
    }
}
