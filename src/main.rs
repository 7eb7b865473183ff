//! stakesign - remote signing authority for validator BLS keys
//!
//! A self-hosted signer for Ethereum consensus validators that:
//! - Keeps BLS keys in passphrase-encrypted wallets on disk
//! - Unlocks keys into memory on demand
//! - Exposes a gRPC interface gated by client certificates
//! - Runs scriptable policy rules (slashing protection) before every signature
//!
//! # Usage
//!
//! ```bash
//! # Start the server
//! stakesign --config /etc/stakesign/config.toml
//!
//! # Print who may do what
//! stakesign --config config.toml --show-permissions
//!
//! # Provision an account
//! stakesign --config config.toml create-account --account Validators/1 --passphrase secret
//! ```

use clap::{Parser, Subcommand};
use stakesign::api::proto::account_manager_server::AccountManagerServer;
use stakesign::api::proto::lister_server::ListerServer;
use stakesign::api::proto::signer_server::SignerServer;
use stakesign::api::{AccountManagerService, AppState, ListerService, SignerService};
use stakesign::checker::StaticChecker;
use stakesign::config::{Config, LoggingConfig};
use stakesign::errors::{Result, StakeSignError};
use stakesign::fetcher::AccountFetcher;
use stakesign::keystore::{self, split_path, KdfParams, Wallet};
use stakesign::locker::KeyLocker;
use stakesign::policy::RuleEngine;
use stakesign::security::setup_memory_protection;
use stakesign::signer::SigningService;
use stakesign::storage;
use stakesign::unlocker::KeysUnlocker;
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tracing::{error, info, warn};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "stakesign", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Print the configured client permissions and exit
    #[arg(long)]
    show_permissions: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account, and its wallet if needed, in the first wallet store
    CreateAccount {
        /// Account path, `wallet/account`
        #[arg(long)]
        account: String,

        #[arg(long)]
        passphrase: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.logging);
    config.validate()?;

    info!("Starting stakesign v{}", VERSION);

    if cli.show_permissions {
        let checker = StaticChecker::new(&config.permissions)?;
        print!("{}", checker.describe());
        return Ok(());
    }

    if let Some(Command::CreateAccount {
        account,
        passphrase,
    }) = cli.command
    {
        return create_account(&config, &account, &passphrase);
    }

    if let Err(e) = setup_memory_protection(config.security.disable_core_dumps) {
        warn!("Could not set up memory protection: {}", e);
    }

    let state_store = storage::open(&config.storage)?;
    let locker = Arc::new(KeyLocker::new());
    let ruler = Arc::new(RuleEngine::from_config(&config, state_store, locker)?);
    info!("Loaded {} rules", ruler.rules().len());

    let fetcher = Arc::new(AccountFetcher::new(keystore::open_stores(&config.wallets)?)?);
    let checker = Arc::new(StaticChecker::new(&config.permissions)?);
    let unlocker = Arc::new(KeysUnlocker::new(&config.unlocker.passphrases));
    let service = Arc::new(SigningService::new(fetcher, checker, unlocker, ruler));
    let state = Arc::new(AppState::new(service));

    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .map_err(|e| StakeSignError::ConfigError(format!("Invalid address: {}", e)))?;

    let mut builder = Server::builder();
    if config.server.tls_enabled {
        builder = builder
            .tls_config(tls_config(&config)?)
            .map_err(|e| StakeSignError::ConfigError(format!("Invalid TLS setup: {}", e)))?;
    } else {
        warn!("TLS disabled; no client can be identified and every request will be denied");
    }

    info!("Starting gRPC server on {}", addr);
    builder
        .add_service(SignerServer::new(SignerService::new(state.clone())))
        .add_service(ListerServer::new(ListerService::new(state.clone())))
        .add_service(AccountManagerServer::new(AccountManagerService::new(state)))
        .serve_with_shutdown(addr, shutdown_signal())
        .await
        .map_err(|e| StakeSignError::InternalError(e.to_string()))?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Initialize logging
fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Server identity plus the CA that client certificates must chain to
fn tls_config(config: &Config) -> Result<ServerTlsConfig> {
    let (Some(cert), Some(key)) = (&config.server.tls_cert, &config.server.tls_key) else {
        return Err(StakeSignError::ConfigError(
            "TLS enabled but cert/key not specified".to_string(),
        ));
    };
    let identity = Identity::from_pem(fs::read(cert)?, fs::read(key)?);
    let mut tls = ServerTlsConfig::new().identity(identity);

    match &config.server.tls_client_ca {
        Some(ca) => {
            tls = tls.client_ca_root(Certificate::from_pem(fs::read(ca)?));
        }
        None => warn!("No client CA configured; client certificates will not be requested"),
    }
    Ok(tls)
}

fn create_account(config: &Config, path: &str, passphrase: &str) -> Result<()> {
    let (wallet_name, account_name) = split_path(path)?;
    if wallet_name.is_empty() || account_name.is_empty() {
        return Err(StakeSignError::InvalidRequest(format!(
            "account path {} must be wallet/account",
            path
        )));
    }

    let store = keystore::open_stores(&config.wallets)?
        .into_iter()
        .next()
        .ok_or_else(|| StakeSignError::ConfigError("no wallet stores configured".to_string()))?;

    let wallet = match Wallet::open(wallet_name, store.clone()) {
        Ok(wallet) => wallet,
        Err(StakeSignError::NotFound(_)) => {
            info!("Creating wallet {}", wallet_name);
            Wallet::create(wallet_name, store)?
        }
        Err(e) => return Err(e),
    };
    let account = wallet.create_account(account_name, passphrase, KdfParams::default())?;

    info!("Created account {}/{}", wallet.name(), account.name());
    println!("{}", hex::encode(account.public_key()));
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
