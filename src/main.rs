use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payrail::application::engine::{PaymentEngine, RequestContext};
use payrail::config::Config;
use payrail::domain::idempotency::CachedResponse;
use payrail::domain::ports::{Clock, KvStoreRef, RecipientDirectory};
use payrail::infrastructure::clock::SystemClock;
use payrail::infrastructure::in_memory::{InMemoryRecipientDirectory, InMemoryStore};
use payrail::infrastructure::sandbox_bank::SandboxBank;
use payrail::interfaces::csv::recipient_reader::RecipientReader;
use payrail::interfaces::csv::request_reader::{BatchRequest, RequestReader};
use payrail::interfaces::csv::response_writer::ResponseWriter;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input requests CSV file
    input: PathBuf,

    /// Recipients CSV used to seed the payee directory
    #[arg(long)]
    recipients: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn setup_logging(config: &Config) {
    let fallback = config.logging.filter.as_deref().unwrap_or("info");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(true)
        .init();
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<&Path>) -> Result<KvStoreRef> {
    use payrail::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using RocksDB storage");
            Ok(Arc::new(RocksDBStore::open(path).into_diagnostic()?))
        }
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<&Path>) -> Result<KvStoreRef> {
    if db_path.is_some() {
        tracing::warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryStore::new()))
}

async fn seed_recipients(directory: &dyn RecipientDirectory, path: &Path) -> Result<()> {
    let file = File::open(path).into_diagnostic()?;
    for recipient in RecipientReader::new(file).recipients() {
        match recipient {
            Ok(recipient) => directory.insert(recipient).await.into_diagnostic()?,
            Err(e) => tracing::error!(error = %e, "skipping unreadable recipient row"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => Config::load(path).into_diagnostic()?,
        None => Config::default(),
    };
    setup_logging(&config);

    let db_path = cli.db_path.as_deref().or(config.storage.path.as_deref());
    let store = open_store(db_path)?;

    let directory = Arc::new(InMemoryRecipientDirectory::new());
    if let Some(path) = cli.recipients.as_deref() {
        seed_recipients(directory.as_ref(), path).await?;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = PaymentEngine::new(
        store,
        Arc::new(SandboxBank::new()),
        directory,
        clock.clone(),
        &config.engine,
    );

    let file = File::open(&cli.input).into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = ResponseWriter::new(stdout.lock());

    for record in RequestReader::new(file).requests() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, "skipping unreadable request row");
                continue;
            }
        };

        let ctx = RequestContext::new(record.owner, record.origin_ip());
        let outcome = match record.to_request() {
            Ok(BatchRequest::CreateAccount(input)) => {
                engine.accounts().create(&ctx, &record.key, input).await
            }
            Ok(BatchRequest::CreateTransfer(input)) => {
                engine.transfers().create(&ctx, &record.key, input).await
            }
            Ok(BatchRequest::CreatePayment(input)) => {
                engine.payments().create(&ctx, &record.key, input).await
            }
            Err(e) => Err(e),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(owner = record.owner, key = %record.key, error = %e, "request failed");
                let body = serde_json::to_value(e.to_body(clock.now())).into_diagnostic()?;
                CachedResponse::new(e.status_code(), body)
            }
        };
        writer
            .write(record.owner, &record.key, response.status, &response.body)
            .into_diagnostic()?;
    }

    writer.flush().into_diagnostic()?;
    Ok(())
}
