use clap::Parser;
use ledgerq::application::broker::BrokerClient;
use ledgerq::application::processor::TransactionProcessor;
use ledgerq::application::worker::WorkerPool;
use ledgerq::config::Config;
use ledgerq::domain::account::NewAccount;
use ledgerq::domain::bank::BankId;
use ledgerq::domain::ports::LedgerStoreHandle;
use ledgerq::infrastructure::in_memory::InMemoryLedgerStore;
use ledgerq::infrastructure::memory_queue::InMemoryQueue;
use ledgerq::interfaces::csv::account_reader::AccountReader;
use ledgerq::interfaces::csv::account_writer::AccountWriter;
use ledgerq::interfaces::csv::intent_reader::IntentReader;
use miette::{IntoDiagnostic, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input transaction intents CSV file
    intents: PathBuf,

    /// Opening accounts CSV file (bank, owner, type, balance)
    #[arg(long)]
    accounts: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of concurrent consumers
    #[arg(long)]
    workers: Option<usize>,

    /// Deliveries allowed for a transiently failing intent
    #[arg(long)]
    max_attempts: Option<u32>,
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path).into_diagnostic()?,
            None => Config::default(),
        };
        if let Some(workers) = self.workers {
            config.processor.workers = workers;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.processor.max_attempts = max_attempts;
        }
        config.validate().into_diagnostic()?;
        Ok(config)
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<LedgerStoreHandle> {
    use ledgerq::infrastructure::rocksdb::RocksDBLedgerStore;

    Ok(match db_path {
        Some(path) => {
            info!(path = %path.display(), "opening RocksDB ledger");
            Arc::new(RocksDBLedgerStore::open(path).into_diagnostic()?)
        }
        None => Arc::new(InMemoryLedgerStore::new()),
    })
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<LedgerStoreHandle> {
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is \
             not enabled. Falling back to in-memory storage."
        );
    }
    Ok(Arc::new(InMemoryLedgerStore::new()))
}

/// Opens every account in the file, creating banks by name the first time they
/// appear. Rows that fail are logged and skipped.
async fn open_accounts(store: &LedgerStoreHandle, path: PathBuf) -> Result<()> {
    let file = File::open(path).into_diagnostic()?;
    let mut banks: HashMap<String, BankId> = HashMap::new();

    for (row, record) in AccountReader::new(file).accounts().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(row = row + 1, error = %e, "skipping unreadable account");
                continue;
            }
        };
        let bank_id = match banks.get(&record.bank) {
            Some(id) => *id,
            None => {
                let bank = store.create_bank(&record.bank).await.into_diagnostic()?;
                banks.insert(bank.name.clone(), bank.id);
                bank.id
            }
        };
        let new = NewAccount::new(record.owner, record.balance, record.kind, bank_id);
        match store.create_account(new).await {
            Ok(account) => info!(account_id = account.id, owner = %account.owner, "account opened"),
            Err(e) => warn!(row = row + 1, error = %e, "skipping account"),
        }
    }
    Ok(())
}

async fn write_snapshot(store: &LedgerStoreHandle) -> Result<()> {
    let accounts = store.list_accounts().await.into_diagnostic()?;
    let mut bank_names: HashMap<BankId, String> = HashMap::new();
    for account in &accounts {
        if bank_names.contains_key(&account.bank_id) {
            continue;
        }
        if let Some(bank) = store.get_bank(account.bank_id).await.into_diagnostic()? {
            bank_names.insert(bank.id, bank.name);
        }
    }

    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer
        .write_accounts(&accounts, |account| {
            bank_names
                .get(&account.bank_id)
                .map(String::as_str)
                .unwrap_or_default()
        })
        .into_diagnostic()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;
    let store = open_store(cli.db_path.clone())?;

    if let Some(path) = cli.accounts.clone() {
        open_accounts(&store, path).await?;
    }

    let queue = Arc::new(InMemoryQueue::new(&config.queue));
    let broker = BrokerClient::new(queue, &config.queue);
    let processor = Arc::new(TransactionProcessor::new(
        Arc::clone(&store),
        config.processor.clone(),
    ));
    let pool = WorkerPool::spawn(config.processor.workers, broker.clone(), processor);

    // Publish intents
    let file = File::open(&cli.intents).into_diagnostic()?;
    let mut published = 0usize;
    for (row, intent) in IntentReader::new(file).intents().enumerate() {
        match intent {
            Ok(intent) => {
                broker.publish(&intent).await.into_diagnostic()?;
                published += 1;
            }
            Err(e) => warn!(row = row + 1, error = %e, "skipping unreadable intent"),
        }
    }
    info!(published, "all intents published");

    pool.drain(config.queue.poll_interval()).await.into_diagnostic()?;
    for letter in broker.dead_letters().await.into_diagnostic()? {
        warn!(
            payload = %String::from_utf8_lossy(&letter.payload),
            reason = %letter.reason,
            attempts = letter.attempts,
            "dead letter"
        );
    }
    pool.shutdown().await.into_diagnostic()?;

    write_snapshot(&store).await
}
