//! FERRY: cross-chain DEX arbitrage automation loop
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the database, syncs configured strategies and wallets into it,
//! and either runs the cron loop or a single operator command.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use ferry::chain::client::HttpChainClient;
use ferry::chain::keys::EnvKeyStore;
use ferry::chain::{ChainClient, ChainClients};
use ferry::config::{self, QuoteApi};
use ferry::dashboard::{self, routes::ControlState};
use ferry::engine::executor::ExecutionEngine;
use ferry::engine::orchestrator::CycleOrchestrator;
use ferry::engine::scanner::OpportunityScanner;
use ferry::quotes::jupiter::JupiterClient;
use ferry::quotes::zeroex::ZeroExClient;
use ferry::quotes::QuoteProvider;
use ferry::storage::Store;
use ferry::types::TriggerType;

const BANNER: &str = r#"
 _____ _____ ____  ____  __   __
|  ___| ____|  _ \|  _ \ \ \ / /
| |_  |  _| | |_) | |_) | \ V /
|  _| | |___|  _ <|  _ <   | |
|_|   |_____|_| \_\_| \_\  |_|

  Cross-chain DEX arbitrage loop
  v0.1.0
"#;

/// FERRY - scan, decide, execute and keep the fee payers topped up.
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cron loop and the control API (default)
    Run,
    /// Run one manual cycle
    Cycle,
    /// Scan every chain into a fresh batch
    Scan,
    /// Decide over the latest scan batch
    Decide,
    /// Execute the approved runs of the latest scan batch
    Execute,
    /// Check wallet balances and file refill requests
    Wallets,
    /// Print global settings, today's counters and the last cycle
    Status,
    /// Operator safe-mode controls
    #[command(subcommand)]
    SafeMode(SafeModeCommand),
    /// Turn the auto-arbitrage master switch on or off
    #[command(subcommand)]
    AutoArbitrage(SwitchCommand),
    /// Replace the global daily loss and trade limits
    Limits {
        /// Maximum combined realised loss per UTC day
        #[arg(long)]
        max_daily_loss: Decimal,
        /// Maximum executed trades per UTC day across all strategies
        #[arg(long)]
        max_trades: u32,
    },
}

#[derive(Subcommand, Debug)]
enum SwitchCommand {
    On,
    Off,
}

#[derive(Subcommand, Debug)]
enum SafeModeCommand {
    /// Clear safe mode so cycles may execute again
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let cfg = config::AppConfig::load(&cli.config)?;

    init_logging();

    let store = Store::connect(&cfg.agent.database_url).await?;
    sync_config(&cfg, &store).await?;
    let orchestrator = Arc::new(build_orchestrator(&cfg, store)?);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_loop(&cfg, orchestrator).await?,
        Command::Cycle => print_json(&orchestrator.run_cycle(TriggerType::Manual).await?)?,
        Command::Scan => print_json(&orchestrator.scan_only().await?)?,
        Command::Decide => print_json(&orchestrator.decide_only().await?)?,
        Command::Execute => print_json(&orchestrator.execute_only().await?)?,
        Command::Wallets => print_json(&orchestrator.check_wallets().await?)?,
        Command::Status => print_json(&orchestrator.status().await?)?,
        Command::SafeMode(SafeModeCommand::Clear) => {
            if orchestrator.clear_safe_mode().await? {
                println!("Safe mode cleared.");
            } else {
                println!("Safe mode was not active.");
            }
        }
        Command::AutoArbitrage(switch) => {
            let enabled = matches!(switch, SwitchCommand::On);
            print_json(&orchestrator.set_auto_arbitrage(enabled).await?)?
        }
        Command::Limits { max_daily_loss, max_trades } => {
            print_json(&orchestrator.set_global_limits(max_daily_loss, max_trades).await?)?
        }
    }

    Ok(())
}

/// Cron loop: one cycle per tick until Ctrl+C.
async fn run_loop(cfg: &config::AppConfig, orchestrator: Arc<CycleOrchestrator>) -> Result<()> {
    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        network = %cfg.agent.network,
        chains = cfg.chains.len(),
        strategies = cfg.strategies.len(),
        dry_run = cfg.agent.dry_run,
        "FERRY starting up"
    );

    if cfg.dashboard.enabled {
        let state = Arc::new(ControlState::new(orchestrator.clone()));
        dashboard::spawn_dashboard(state, cfg.dashboard.port).await?;
    }

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.cron_interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.agent.cron_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match orchestrator.run_cycle(TriggerType::Cron).await {
                    Ok(log) => info!(cycle_id = %log.id, status = log.overall_status.as_str(), "{log}"),
                    Err(e) => error!(error = %e, "Cycle failed, continuing to next"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("FERRY shut down cleanly.");
    Ok(())
}

/// Push configured strategies and wallets into the database and seed the
/// global settings row on first start.
async fn sync_config(cfg: &config::AppConfig, store: &Store) -> Result<()> {
    if store.seed_settings(&cfg.initial_settings()).await? {
        info!("Seeded global settings from config");
    }
    for strategy in cfg.strategies() {
        store.upsert_strategy(&strategy).await?;
    }
    for wallet in cfg.wallets() {
        store.upsert_wallet(&wallet).await?;
    }
    info!(
        strategies = cfg.strategies.len(),
        wallets = cfg.wallets.len(),
        "Synced config into database"
    );
    Ok(())
}

/// Wire quote providers, chain clients and the key store per configured chain.
fn build_orchestrator(cfg: &config::AppConfig, store: Store) -> Result<CycleOrchestrator> {
    let mut scanners = Vec::new();
    let mut chains = ChainClients::new();
    let mut signer_labels = HashMap::new();

    for c in &cfg.chains {
        let provider: Arc<dyn QuoteProvider> = match c.quote_api {
            QuoteApi::Jupiter => Arc::new(JupiterClient::new(c.provider_settings())?),
            QuoteApi::ZeroEx => Arc::new(ZeroExClient::new(c.chain, c.provider_settings())?),
        };
        scanners.push(OpportunityScanner::new(
            provider,
            cfg.scan_settings(),
            cfg.retry_policy(),
            cfg.agent.network,
            c.venues.clone(),
            c.gas_reference_price,
        ));

        let client = HttpChainClient::new(
            c.chain,
            cfg.agent.network,
            c.rpc_url.clone(),
            c.relay_url.clone(),
            cfg.agent.dry_run,
            c.http_timeout_secs,
        )?;
        chains.insert(Arc::new(client) as Arc<dyn ChainClient>);
        signer_labels.insert(c.chain, c.signer_label.clone());

        info!(chain = %c.chain, quote_api = ?c.quote_api, venues = c.venues.len(), "Chain configured");
    }

    let mut keys = EnvKeyStore::new();
    for w in &cfg.wallets {
        keys.register(&w.label, &w.address, &w.key_env);
    }

    let executor = ExecutionEngine::new(chains, Arc::new(keys), signer_labels);
    Ok(CycleOrchestrator::new(
        store,
        scanners,
        executor,
        Duration::from_secs(cfg.agent.cycle_timeout_secs),
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ferry=info"));

    let json_logging = std::env::var("FERRY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
