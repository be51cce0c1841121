use async_trait::async_trait;
use ledgerq::application::broker::{BrokerClient, IntentDelivery, IntentHandler};
use ledgerq::application::processor::TransactionProcessor;
use ledgerq::application::worker::WorkerPool;
use ledgerq::config::{ProcessorConfig, QueueConfig};
use ledgerq::domain::account::{AccountId, AccountType, NewAccount};
use ledgerq::domain::intent::TransactionIntent;
use ledgerq::domain::ports::{LedgerStore, LedgerStoreHandle, MessageQueue};
use ledgerq::error::LedgerError;
use ledgerq::infrastructure::in_memory::InMemoryLedgerStore;
use ledgerq::infrastructure::memory_queue::InMemoryQueue;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

mod common;

use common::{FlakyStore, HungStore};

fn queue_config() -> QueueConfig {
    QueueConfig {
        visibility_timeout_ms: 30_000,
        poll_interval_ms: 5,
        receive_timeout_ms: 50,
    }
}

fn processor_config(workers: usize) -> ProcessorConfig {
    ProcessorConfig {
        workers,
        max_conflict_retries: 1_000,
        ..ProcessorConfig::default()
    }
}

async fn open_accounts(
    store: &InMemoryLedgerStore,
    balances: &[(AccountType, Decimal)],
) -> Vec<AccountId> {
    let bank = store.create_bank("First Bank").await.unwrap();
    let mut ids = Vec::new();
    for (i, (kind, balance)) in balances.iter().enumerate() {
        let account = store
            .create_account(NewAccount::new(
                format!("owner{i}@test.com"),
                *balance,
                *kind,
                bank.id,
            ))
            .await
            .unwrap();
        ids.push(account.id);
    }
    ids
}

/// Publishes `intents`, runs `handler` on a pool until the queue drains and returns
/// the (closed) broker for inspection.
async fn run_with<H>(
    queue: QueueConfig,
    workers: usize,
    handler: Arc<H>,
    intents: &[TransactionIntent],
) -> BrokerClient
where
    H: IntentHandler + 'static,
{
    let broker = BrokerClient::new(Arc::new(InMemoryQueue::new(&queue)), &queue);
    for intent in intents {
        broker.publish(intent).await.unwrap();
    }
    let pool = WorkerPool::spawn(workers, broker.clone(), handler);
    pool.drain(Duration::from_millis(5)).await.unwrap();
    pool.shutdown().await.unwrap();
    broker
}

async fn run(
    store: LedgerStoreHandle,
    config: ProcessorConfig,
    intents: &[TransactionIntent],
) -> BrokerClient {
    let workers = config.workers;
    let processor = Arc::new(TransactionProcessor::new(store, config));
    run_with(queue_config(), workers, processor, intents).await
}

async fn balance(store: &dyn LedgerStore, id: AccountId) -> Decimal {
    store.get_account(id).await.unwrap().unwrap().balance.value()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_values() {
    let store = InMemoryLedgerStore::new();
    let ids = open_accounts(
        &store,
        &[
            (AccountType::Checking, dec!(0)),
            (AccountType::Checking, dec!(1000)),
            (AccountType::Checking, dec!(1000)),
        ],
    )
    .await;

    let intents = [
        TransactionIntent::deposit(ids[0], dec!(1000)),
        TransactionIntent::withdraw(ids[0], dec!(500)),
        TransactionIntent::transfer(ids[1], ids[2], dec!(200)),
    ];
    let broker = run(Arc::new(store.clone()), processor_config(1), &intents).await;

    assert!(broker.dead_letters().await.unwrap().is_empty());
    assert_eq!(balance(&store, ids[0]).await, dec!(500));
    assert_eq!(balance(&store, ids[1]).await, dec!(800));
    assert_eq!(balance(&store, ids[2]).await, dec!(1200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redelivered_intent_applied_once() {
    let store = InMemoryLedgerStore::new();
    let ids = open_accounts(&store, &[(AccountType::Checking, dec!(0))]).await;

    let intent = TransactionIntent::deposit(ids[0], dec!(75));
    let intents = vec![intent.clone(), intent.clone(), intent];
    let broker = run(Arc::new(store.clone()), processor_config(4), &intents).await;

    assert!(broker.dead_letters().await.unwrap().is_empty());
    assert_eq!(balance(&store, ids[0]).await, dec!(75));
    assert_eq!(store.list_transactions(ids[0]).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_transient_failure_is_requeued_and_applied() {
    let inner = InMemoryLedgerStore::new();
    let ids = open_accounts(&inner, &[(AccountType::Checking, dec!(10))]).await;
    let store = Arc::new(FlakyStore::new(inner.clone(), 2));

    let broker = run(
        store.clone(),
        processor_config(1),
        &[TransactionIntent::deposit(ids[0], dec!(5))],
    )
    .await;

    assert_eq!(store.remaining_failures(), 0);
    assert!(broker.dead_letters().await.unwrap().is_empty());
    assert_eq!(balance(&inner, ids[0]).await, dec!(15));
}

#[tokio::test]
async fn test_transient_failure_past_max_attempts_is_dead_lettered() {
    let inner = InMemoryLedgerStore::new();
    let ids = open_accounts(&inner, &[(AccountType::Checking, dec!(10))]).await;
    let store = Arc::new(FlakyStore::new(inner.clone(), 100));
    let config = ProcessorConfig {
        max_attempts: 3,
        ..processor_config(1)
    };

    let intent = TransactionIntent::deposit(ids[0], dec!(5));
    let broker = run(store, config, std::slice::from_ref(&intent)).await;

    let dead = broker.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 3);
    assert!(dead[0].reason.starts_with("infrastructure"));
    assert_eq!(dead[0].payload, intent.to_json().unwrap());
    assert_eq!(balance(&inner, ids[0]).await, dec!(10));
}

#[tokio::test]
async fn test_hung_store_call_times_out() {
    let inner = InMemoryLedgerStore::new();
    let ids = open_accounts(&inner, &[(AccountType::Checking, dec!(10))]).await;
    let config = ProcessorConfig {
        store_timeout_ms: 20,
        ..processor_config(1)
    };
    let processor = TransactionProcessor::new(Arc::new(HungStore::new(inner)), config);

    let err = processor
        .apply(&TransactionIntent::deposit(ids[0], dec!(5)))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Timeout("get_account")));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_timed_out_store_is_requeued_then_dead_lettered() {
    let inner = InMemoryLedgerStore::new();
    let ids = open_accounts(&inner, &[(AccountType::Checking, dec!(10))]).await;
    let config = ProcessorConfig {
        max_attempts: 2,
        store_timeout_ms: 20,
        ..processor_config(1)
    };

    let intent = TransactionIntent::deposit(ids[0], dec!(5));
    let store = Arc::new(HungStore::new(inner.clone()));
    let broker = run(store, config, std::slice::from_ref(&intent)).await;

    let dead = broker.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 2);
    assert!(dead[0].reason.starts_with("infrastructure"));
    assert!(dead[0].reason.contains("get_account"));
    assert_eq!(balance(&inner, ids[0]).await, dec!(10));
}

#[tokio::test]
async fn test_business_failure_is_dead_lettered_without_retry() {
    let store = InMemoryLedgerStore::new();
    let ids = open_accounts(&store, &[(AccountType::IndividualInvestment, dec!(2000))]).await;

    let intents = [
        TransactionIntent::withdraw(ids[0], dec!(500)),
        TransactionIntent::withdraw(ids[0], dec!(600)),
    ];
    let broker = run(Arc::new(store.clone()), processor_config(1), &intents).await;

    let dead = broker.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 1);
    assert!(dead[0].reason.starts_with("business_rule"));
    assert_eq!(dead[0].payload, intents[1].to_json().unwrap());
    assert_eq!(balance(&store, ids[0]).await, dec!(1500));
}

#[tokio::test]
async fn test_missing_account_is_dead_lettered() {
    let store = InMemoryLedgerStore::new();
    let ids = open_accounts(&store, &[(AccountType::Checking, dec!(100))]).await;

    let broker = run(
        Arc::new(store.clone()),
        processor_config(1),
        &[TransactionIntent::transfer(ids[0], 42, dec!(10))],
    )
    .await;

    let dead = broker.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].reason.starts_with("not_found"));
    assert_eq!(balance(&store, ids[0]).await, dec!(100));
}

#[tokio::test]
async fn test_unknown_type_never_reaches_processor() {
    let config = queue_config();
    let broker = BrokerClient::new(Arc::new(InMemoryQueue::new(&config)), &config);

    let err = broker
        .publish_json(json!({"type": "Chargeback", "amount": 5, "sourceAccountId": 1}))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::ValidationError(_)));
    let stats = broker.stats().await.unwrap();
    assert_eq!((stats.ready, stats.in_flight, stats.dead_lettered), (0, 0, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_through_workers() {
    let store = InMemoryLedgerStore::new();
    let ids = open_accounts(
        &store,
        &[
            (AccountType::Checking, dec!(1000)),
            (AccountType::Checking, dec!(0)),
        ],
    )
    .await;

    let intents: Vec<_> = (0..30)
        .map(|_| TransactionIntent::transfer(ids[0], ids[1], dec!(70)))
        .collect();
    let broker = run(Arc::new(store.clone()), processor_config(8), &intents).await;

    let dead = broker.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 16);
    assert!(dead.iter().all(|letter| letter.reason.starts_with("business_rule")));
    assert_eq!(balance(&store, ids[0]).await, dec!(20));
    assert_eq!(balance(&store, ids[1]).await, dec!(980));
    assert_eq!(store.list_transactions(ids[0]).await.unwrap().len(), 14);
}

/// Drops the first delivery of every message without settling it, as a consumer
/// that crashed mid-message would.
struct CrashOnFirstDelivery {
    processor: TransactionProcessor,
}

#[async_trait]
impl IntentHandler for CrashOnFirstDelivery {
    async fn handle(&self, delivery: IntentDelivery) {
        if delivery.attempt > 1 {
            self.processor.process(delivery).await;
        }
    }
}

#[tokio::test]
async fn test_unacked_claim_is_redelivered_after_visibility_timeout() {
    let store = InMemoryLedgerStore::new();
    let ids = open_accounts(&store, &[(AccountType::Checking, dec!(0))]).await;
    let handler = Arc::new(CrashOnFirstDelivery {
        processor: TransactionProcessor::new(Arc::new(store.clone()), processor_config(1)),
    });
    let queue = QueueConfig {
        visibility_timeout_ms: 50,
        ..queue_config()
    };

    let intent = TransactionIntent::deposit(ids[0], dec!(30));
    let broker = run_with(queue, 1, handler, &[intent]).await;

    assert!(broker.dead_letters().await.unwrap().is_empty());
    assert_eq!(balance(&store, ids[0]).await, dec!(30));
}

#[tokio::test]
async fn test_replayed_dead_letters_are_applied() {
    let store = InMemoryLedgerStore::new();
    let ids = open_accounts(&store, &[(AccountType::Checking, dec!(0))]).await;
    let config = queue_config();
    let broker = BrokerClient::new(Arc::new(InMemoryQueue::new(&config)), &config);
    let processor = Arc::new(TransactionProcessor::new(
        Arc::new(store.clone()),
        processor_config(1),
    ));

    // The withdrawal fails until the deposit has landed.
    broker
        .publish(&TransactionIntent::withdraw(ids[0], dec!(40)))
        .await
        .unwrap();
    let pool = WorkerPool::spawn(1, broker.clone(), Arc::clone(&processor));
    pool.drain(Duration::from_millis(5)).await.unwrap();
    assert_eq!(broker.dead_letters().await.unwrap().len(), 1);

    broker
        .publish(&TransactionIntent::deposit(ids[0], dec!(100)))
        .await
        .unwrap();
    pool.drain(Duration::from_millis(5)).await.unwrap();
    assert_eq!(broker.replay_dead_letters().await.unwrap(), 1);
    pool.drain(Duration::from_millis(5)).await.unwrap();
    pool.shutdown().await.unwrap();

    assert!(broker.dead_letters().await.unwrap().is_empty());
    assert_eq!(balance(&store, ids[0]).await, dec!(60));
}

/// Applies the first delivery of every message but never settles it, as a consumer
/// that crashed between commit and ack would.
struct CrashAfterApply {
    processor: TransactionProcessor,
}

#[async_trait]
impl IntentHandler for CrashAfterApply {
    async fn handle(&self, delivery: IntentDelivery) {
        if delivery.attempt == 1 {
            self.processor.apply(&delivery.intent).await.unwrap();
        } else {
            self.processor.process(delivery).await;
        }
    }
}

fn short_visibility() -> QueueConfig {
    QueueConfig {
        visibility_timeout_ms: 30,
        ..queue_config()
    }
}

#[tokio::test]
async fn test_unkeyed_intent_redelivered_after_crash_is_applied_once() {
    let store = InMemoryLedgerStore::new();
    let ids = open_accounts(&store, &[(AccountType::Checking, dec!(0))]).await;
    let handler = Arc::new(CrashAfterApply {
        processor: TransactionProcessor::new(Arc::new(store.clone()), processor_config(1)),
    });
    let config = short_visibility();
    let broker = BrokerClient::new(Arc::new(InMemoryQueue::new(&config)), &config);

    broker
        .publish_json(json!({"type": "Deposit", "amount": 100, "sourceAccountId": ids[0]}))
        .await
        .unwrap();
    let pool = WorkerPool::spawn(1, broker.clone(), handler);
    pool.drain(Duration::from_millis(5)).await.unwrap();
    pool.shutdown().await.unwrap();

    assert!(broker.dead_letters().await.unwrap().is_empty());
    assert_eq!(balance(&store, ids[0]).await, dec!(100));
    assert_eq!(store.list_transactions(ids[0]).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_raw_payload_without_id_is_dead_lettered_not_applied() {
    let store = InMemoryLedgerStore::new();
    let ids = open_accounts(&store, &[(AccountType::Checking, dec!(0))]).await;
    let handler = Arc::new(CrashAfterApply {
        processor: TransactionProcessor::new(Arc::new(store.clone()), processor_config(1)),
    });
    let config = short_visibility();
    let queue = Arc::new(InMemoryQueue::new(&config));
    let payload = json!({"type": "Deposit", "amount": 100, "sourceAccountId": ids[0]});
    queue.publish(payload.to_string().into_bytes()).await.unwrap();

    let broker = BrokerClient::new(queue, &config);
    let pool = WorkerPool::spawn(1, broker.clone(), handler);
    pool.drain(Duration::from_millis(5)).await.unwrap();
    pool.shutdown().await.unwrap();

    let dead = broker.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].reason.contains("missing field `id`"));
    assert_eq!(balance(&store, ids[0]).await, dec!(0));
    assert!(store.list_transactions(ids[0]).await.unwrap().is_empty());
}
