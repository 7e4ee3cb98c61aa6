/// `audit-anchor`: anchors portal audit logs on an EVM chain.
///
/// ```text
/// audit-anchor check                     # count logs not yet anchored
/// audit-anchor anchor                    # anchor them if there are any
/// audit-anchor anchor --force --dry-run  # always submit, store nothing
/// audit-anchor list -l 5                 # newest stored anchors
/// audit-anchor verify 0xabc...           # cross-check a stored anchor
/// audit-anchor serve -c anchor.toml      # run the HTTP API
/// ```
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, warn};

use audit_anchor::anchor::AnchorContract;
use audit_anchor::audit::HashService;
use audit_anchor::chain::ChainConnection;
use audit_anchor::config::AppConfig;
use audit_anchor::error::{AnchorError, Result};
use audit_anchor::policy::{AnchoringOptions, SmartAnchoringPolicy};
use audit_anchor::server::{self, AppState};
use audit_anchor::state::Database;

#[derive(Parser)]
#[command(name = "audit-anchor")]
#[command(about = "Tamper-evident anchoring of audit logs on an EVM blockchain")]
#[command(version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// PostgreSQL connection string.
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Hex private key of the anchoring account. Without it, the node's own
    /// account signs.
    #[arg(long, global = true, env = "ANCHOR_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Override the network's RPC endpoint.
    #[arg(long, global = true, env = "ANCHOR_RPC_URL")]
    rpc_url: Option<String>,

    /// Override the anchor contract address.
    #[arg(long, global = true, env = "ANCHOR_CONTRACT_ADDRESS")]
    contract: Option<String>,

    /// Use the main network preset instead of the test network.
    #[arg(long, global = true)]
    mainnet: bool,

    /// Log level filter, used when RUST_LOG is unset.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report how many audit logs are waiting to be anchored
    Check,
    /// Anchor new audit logs
    Anchor {
        /// Submit even when no new logs exist
        #[arg(long)]
        force: bool,
        /// Submit without storing an anchor record
        #[arg(long)]
        dry_run: bool,
    },
    /// Show anchoring totals
    Status,
    /// List stored anchor records, newest first
    List {
        #[arg(short, long, default_value = "20")]
        limit: u64,
    },
    /// Verify an anchor transaction against the stored record
    Verify { tx_hash: String },
    /// Show blockchain connection status
    Connection,
    /// Hash the oldest audit logs without anchoring
    Hash {
        #[arg(short, long, default_value = "100")]
        limit: u64,
    },
    /// Apply database migrations
    Migrate,
    /// Run the HTTP API
    Serve {
        /// Override the listen address (e.g. "0.0.0.0:8080")
        #[arg(short, long)]
        listen_addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    // CLI args override config file values.
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if cli.mainnet {
        config.network.mainnet = true;
    }
    if let Some(url) = &cli.rpc_url {
        config.network.rpc_url = Some(url.clone());
    }
    if let Some(addr) = &cli.contract {
        config.network.contract_address = Some(addr.clone());
    }
    if let Some(url) = &cli.database_url {
        config.database.url = Some(url.clone());
    }

    setup_tracing(&config.log.level);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Respects `RUST_LOG` if set, otherwise uses the configured level.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let private_key = cli.private_key.as_deref();

    match cli.command {
        Commands::Check => {
            let policy = build_policy(&config, private_key).await?;
            print_json(&policy.check_for_new_logs().await?)
        }
        Commands::Anchor { force, dry_run } => {
            let policy = build_policy(&config, private_key).await?;
            let report = policy
                .perform_smart_anchoring(AnchoringOptions {
                    force,
                    persist: !dry_run,
                    timestamp: None,
                })
                .await?;
            print_json(&report)
        }
        Commands::Status => {
            let policy = build_policy(&config, private_key).await?;
            print_json(&policy.get_anchoring_status().await?)
        }
        Commands::List { limit } => {
            let policy = build_policy(&config, private_key).await?;
            print_json(&policy.recent_anchors(limit).await?)
        }
        Commands::Verify { tx_hash } => {
            let policy = build_policy(&config, private_key).await?;
            print_json(&policy.verify_anchor_record(&tx_hash).await?)
        }
        Commands::Connection => {
            let connection = connect_chain(&config, private_key).await?;
            print_json(&connection.get_connection_status().await)
        }
        Commands::Hash { limit } => {
            let db = connect_db(&config).await?;
            let hasher = HashService::new(Arc::new(db), config.store_timeout());
            let result = hasher.build_result(limit).await?;
            print_json(&HashSummary {
                hash: result.hash,
                log_count: result.log_count,
                first_id: result.source_logs.first().map(|e| e.id.clone()),
                last_id: result.source_logs.last().map(|e| e.id.clone()),
            })
        }
        Commands::Migrate => {
            let db = connect_db(&config).await?;
            db.migrate().await?;
            println!("migrations applied");
            Ok(())
        }
        Commands::Serve { listen_addr } => {
            let addr = listen_addr.unwrap_or_else(|| config.server.listen_addr.clone());
            let policy = build_policy(&config, private_key).await?;
            server::serve(
                AppState {
                    policy: Arc::new(policy),
                },
                &addr,
            )
            .await
        }
    }
}

#[derive(Serialize)]
struct HashSummary {
    hash: String,
    log_count: u64,
    first_id: Option<String>,
    last_id: Option<String>,
}

async fn connect_db(config: &AppConfig) -> Result<Database> {
    let url = config.database.url.as_deref().ok_or_else(|| {
        AnchorError::Config("database url not set (use --database-url or DATABASE_URL)".into())
    })?;
    Database::connect(url, config.database.max_connections).await
}

async fn connect_chain(config: &AppConfig, private_key: Option<&str>) -> Result<ChainConnection> {
    let network = config.network_config()?;
    let mut connection = ChainConnection::over_http(network, config.rpc_timeout());
    if !connection.initialize(private_key).await {
        warn!("no signing account available, anchoring will fail");
    }
    Ok(connection)
}

async fn build_policy(config: &AppConfig, private_key: Option<&str>) -> Result<SmartAnchoringPolicy> {
    let db = Arc::new(connect_db(config).await?);
    let connection = connect_chain(config, private_key).await?;

    Ok(SmartAnchoringPolicy::new(
        HashService::new(db.clone(), config.store_timeout()),
        AnchorContract::new(connection, config.anchor_settings()?),
        db,
        config.store_timeout(),
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AnchorError::Serialization(e.to_string()))?;
    println!("{json}");
    Ok(())
}
