use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use overdraft_guard::application::engine::LedgerEngine;
use overdraft_guard::application::replay::replay;
use overdraft_guard::application::simulation::{SimulationPlan, simulate};
use overdraft_guard::config::{Backoff, GuardConfig, ReleaseStrategy};
use overdraft_guard::domain::ledger::ClientId;
use overdraft_guard::domain::money::Balance;
use overdraft_guard::domain::ports::{SharedLedgerStore, SharedLockService};
use overdraft_guard::error::GuardError;
use overdraft_guard::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryLockService};
use overdraft_guard::interfaces::csv::balance_writer::BalanceWriter;
use overdraft_guard::interfaces::csv::request_reader::RequestReader;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    stores: StoreArgs,

    #[command(flatten)]
    tuning: TuningArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct StoreArgs {
    /// Path to persistent ledger (optional). If provided, uses RocksDB.
    #[arg(long, global = true, env = "OVERDRAFT_GUARD_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Redis URL of the shared lock service (optional). Without it, locks only
    /// exclude requests inside this process.
    #[arg(long, global = true, env = "OVERDRAFT_GUARD_REDIS_URL")]
    redis_url: Option<String>,
}

#[derive(Args)]
struct TuningArgs {
    /// JSON configuration file. Flags below override its values.
    #[arg(long, global = true, env = "OVERDRAFT_GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Lease of every withdrawal lock, in milliseconds.
    #[arg(long, global = true, env = "OVERDRAFT_GUARD_LEASE_MS")]
    lease_ms: Option<u64>,

    /// Lock acquisition attempts before a withdrawal gives up.
    #[arg(long, global = true, env = "OVERDRAFT_GUARD_LOCK_ATTEMPTS")]
    lock_attempts: Option<u32>,

    /// Wait between acquisition attempts, in milliseconds.
    #[arg(long, global = true, env = "OVERDRAFT_GUARD_RETRY_DELAY_MS")]
    retry_delay_ms: Option<u64>,

    /// Switch to exponential backoff, multiplying the wait by this factor.
    #[arg(long, global = true, env = "OVERDRAFT_GUARD_BACKOFF_FACTOR")]
    backoff_factor: Option<u32>,

    /// Cap of the exponential wait, in milliseconds. Defaults to the lease when
    /// `--backoff-factor` switches a fixed backoff to exponential.
    #[arg(long, global = true, env = "OVERDRAFT_GUARD_MAX_RETRY_DELAY_MS")]
    max_retry_delay_ms: Option<u64>,

    /// How a withdrawal gives its lock back.
    #[arg(long, global = true, value_enum, env = "OVERDRAFT_GUARD_RELEASE")]
    release: Option<ReleaseStrategy>,

    /// Deadline on each withdrawal's balance check and debit, in milliseconds.
    #[arg(long, global = true, env = "OVERDRAFT_GUARD_LEDGER_TIMEOUT_MS")]
    ledger_timeout_ms: Option<u64>,
}

impl TuningArgs {
    fn resolve(&self) -> overdraft_guard::error::Result<GuardConfig> {
        let mut config = match &self.config {
            Some(path) => GuardConfig::from_json_file(path)?,
            None => GuardConfig::default(),
        };

        let lock = &mut config.lock;
        if let Some(ms) = self.lease_ms {
            lock.lease = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.lock_attempts {
            lock.retry.max_attempts = attempts;
        }
        if let Some(ms) = self.retry_delay_ms {
            lock.retry.delay = Duration::from_millis(ms);
        }
        if let Some(factor) = self.backoff_factor {
            let max_delay = match lock.retry.backoff {
                Backoff::Exponential { max_delay, .. } => max_delay,
                Backoff::Fixed => lock.lease,
            };
            lock.retry.backoff = Backoff::Exponential { factor, max_delay };
        }
        if let Some(ms) = self.max_retry_delay_ms {
            match &mut lock.retry.backoff {
                Backoff::Exponential { max_delay, .. } => *max_delay = Duration::from_millis(ms),
                Backoff::Fixed => {
                    return Err(GuardError::Validation(
                        "--max-retry-delay-ms needs an exponential backoff".to_string(),
                    ));
                }
            }
        }
        if let Some(release) = self.release {
            lock.release = release;
        }
        if let Some(ms) = self.ledger_timeout_ms {
            config.ledger_timeout = Some(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Submit deposits and withdrawals from a `type,client,amount` CSV file,
    /// then print every balance.
    Replay {
        /// Input requests CSV file
        input: PathBuf,

        /// Requests in flight at once. One keeps the file order.
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Clear the ledger, fire random deposits and withdrawals all at once,
    /// then print every balance.
    Simulate {
        #[arg(long, default_value_t = 3)]
        clients: u64,

        #[arg(long, default_value_t = 30)]
        deposits: usize,

        #[arg(long, default_value_t = 30)]
        withdrawals: usize,

        /// Seed for reproducible amounts and clients.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print one client's balance.
    Balance { client: u64 },
    /// Delete a client's withdrawal lock whoever holds it.
    Unlock { client: u64 },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}

fn open_ledger(db_path: Option<PathBuf>) -> Result<SharedLedgerStore> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            use overdraft_guard::infrastructure::rocksdb::RocksDbLedgerStore;
            Ok(Arc::new(RocksDbLedgerStore::open(path).into_diagnostic()?))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            warn!(
                "persistent storage requested via --db-path, but the 'storage-rocksdb' feature is not enabled; falling back to the in-memory ledger"
            );
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        None => Ok(Arc::new(InMemoryLedgerStore::new())),
    }
}

async fn connect_locks(redis_url: Option<String>) -> Result<SharedLockService> {
    match redis_url {
        #[cfg(feature = "lock-redis")]
        Some(url) => {
            use overdraft_guard::infrastructure::redis::RedisLockService;
            Ok(Arc::new(
                RedisLockService::connect(&url).await.into_diagnostic()?,
            ))
        }
        #[cfg(not(feature = "lock-redis"))]
        Some(_) => {
            warn!(
                "lock service requested via --redis-url, but the 'lock-redis' feature is not enabled; falling back to in-process locks"
            );
            Ok(Arc::new(InMemoryLockService::new()))
        }
        None => Ok(Arc::new(InMemoryLockService::new())),
    }
}

fn print_balances(balances: Vec<(ClientId, Balance)>) -> Result<()> {
    let stdout = io::stdout();
    let mut writer = BalanceWriter::new(stdout.lock());
    writer.write_balances(balances).into_diagnostic()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = cli.tuning.resolve().into_diagnostic()?;
    let ledger = open_ledger(cli.stores.db_path)?;
    let locks = connect_locks(cli.stores.redis_url).await?;
    let engine = LedgerEngine::new(ledger, locks, &config);

    match cli.command {
        Command::Replay { input, concurrency } => {
            let file = File::open(input).into_diagnostic()?;
            let reader = RequestReader::new(file);
            replay(&engine, reader.requests(), concurrency)
                .await
                .into_diagnostic()?;
            print_balances(engine.balances().await.into_diagnostic()?)?;
        }
        Command::Simulate {
            clients,
            deposits,
            withdrawals,
            seed,
        } => {
            let plan = SimulationPlan {
                clients,
                deposits,
                withdrawals,
                seed,
                ..SimulationPlan::default()
            };
            let report = simulate(&engine, &plan).await.into_diagnostic()?;
            print_balances(report.balances)?;
        }
        Command::Balance { client } => {
            let client = ClientId(client);
            let balance = engine.balance(client).await.into_diagnostic()?;
            print_balances(vec![(client, balance)])?;
        }
        Command::Unlock { client } => {
            engine
                .withdrawals()
                .force_unlock(ClientId(client))
                .await
                .into_diagnostic()?;
        }
    }

    Ok(())
}
