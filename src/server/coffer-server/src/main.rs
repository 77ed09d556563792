//! Coffer Server - Main entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coffer_auth::StaticTokenBackend;
use coffer_crypto::random::generate_token;
use coffer_keyring::KeyEncryptionKey;
use coffer_service::{CacheConfig, Service, ServiceConfig};
use coffer_storage::{MemoryStore, ObjectStore};
use coffer_storage_sqlite::SqliteStore;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "coffer-server")]
#[command(about = "Coffer - multi-tenant envelope encryption service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the service and run until interrupted
    Serve {
        #[command(flatten)]
        runtime: RuntimeArgs,

        /// Re-wrap every stored DEK under the current master key before serving
        #[arg(long, env = "COFFER_ROLL_ON_START")]
        roll_on_start: bool,
    },
    /// Re-wrap every stored DEK under the current master key, then exit
    Roll {
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// Print a new master-key token
    GenerateMasterKey,
    /// Print a new random bearer token
    GenerateToken {
        /// Random bytes before encoding
        #[arg(long, default_value = "32")]
        bytes: usize,
    },
}

#[derive(Args)]
struct RuntimeArgs {
    /// Master-key tokens, oldest first; the last one is current
    #[arg(long, env = "COFFER_MASTER_KEYS", value_delimiter = ',', required = true)]
    master_keys: Vec<String>,

    /// Bearer token every caller must present
    #[arg(long, env = "COFFER_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: String,

    /// Directory for the SQLite object store
    #[arg(long, env = "COFFER_DATA_DIR", default_value = "data", conflicts_with = "in_memory")]
    data_dir: PathBuf,

    /// Keep DEKs in memory only (development)
    #[arg(long, env = "COFFER_IN_MEMORY")]
    in_memory: bool,

    /// Maximum cached DEKs
    #[arg(long, env = "COFFER_CACHE_MAX_ENTRIES", default_value = "1024")]
    cache_max_entries: usize,

    /// Seconds a cached DEK is served without revalidation
    #[arg(long, env = "COFFER_CACHE_FRESH_SECS", default_value = "60")]
    cache_fresh_secs: u64,

    /// Seconds after which a cached DEK is evicted
    #[arg(long, env = "COFFER_CACHE_TTL_SECS", default_value = "300")]
    cache_ttl_secs: u64,

    /// Deadline for each storage call, in milliseconds
    #[arg(long, env = "COFFER_STORAGE_TIMEOUT_MS")]
    storage_timeout_ms: Option<u64>,
}

impl RuntimeArgs {
    fn service_config(&self) -> ServiceConfig {
        let master_keys = self
            .master_keys
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let config = ServiceConfig::new(master_keys).with_cache(CacheConfig {
            max_entries: self.cache_max_entries,
            fresh_for: Duration::from_secs(self.cache_fresh_secs),
            ttl: Duration::from_secs(self.cache_ttl_secs),
        });

        match self.storage_timeout_ms {
            Some(ms) => config.with_storage_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }

    async fn open_store(&self) -> Result<Arc<dyn ObjectStore>> {
        if self.in_memory {
            tracing::warn!("In-memory storage enabled - DEKs are lost on exit");
            return Ok(Arc::new(MemoryStore::new()));
        }

        let store = SqliteStore::open(&self.data_dir, "coffer")
            .await
            .with_context(|| format!("opening object store in {}", self.data_dir.display()))?;
        Ok(Arc::new(store))
    }

    async fn build(&self) -> Result<Service> {
        let store = self.open_store().await?;
        let auth = Arc::new(
            StaticTokenBackend::new(&self.bearer_token).context("invalid bearer token")?,
        );

        Service::new(store, auth, self.service_config()).context("invalid configuration")
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn serve(runtime: &RuntimeArgs, roll_on_start: bool) -> Result<()> {
    let service = runtime.build().await?;

    if roll_on_start {
        roll(&service, &runtime.bearer_token).await?;
    }

    tracing::info!("Coffer server started successfully");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    Ok(())
}

async fn roll(service: &Service, bearer_token: &str) -> Result<()> {
    let summary = service
        .authenticate(bearer_token)
        .await?
        .roll_deks()
        .await
        .context("DEK rotation failed")?;

    println!(
        "Scanned {} DEK objects, re-wrapped {}.",
        summary.scanned, summary.rewrapped
    );

    Ok(())
}

fn generate_master_key() -> Result<()> {
    let kek = KeyEncryptionKey::generate();
    let token = kek.to_token()?;

    eprintln!("Master key id: {}", kek.id());
    eprintln!("Append this token to COFFER_MASTER_KEYS and keep it secret.");
    println!("{token}");

    Ok(())
}

fn generate_bearer_token(bytes: usize) -> Result<()> {
    if bytes < 16 {
        bail!("bearer tokens need at least 16 random bytes");
    }
    println!("{}", generate_token(bytes));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            runtime,
            roll_on_start,
        } => {
            tracing::info!("Starting Coffer server...");
            serve(&runtime, roll_on_start).await
        },
        Commands::Roll { runtime } => {
            let service = runtime.build().await?;
            roll(&service, &runtime.bearer_token).await
        },
        Commands::GenerateMasterKey => generate_master_key(),
        Commands::GenerateToken { bytes } => generate_bearer_token(bytes),
    }
}
