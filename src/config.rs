//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, signing keys) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::retry::RetryPolicy;
use crate::engine::scanner::ScanSettings;
use crate::quotes::ProviderSettings;
use crate::types::{
    Chain, FeePayerWallet, FerryError, GlobalSettings, Network, ScanMode, Strategy, StrategyPurpose,
    WalletType,
};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    pub risk: RiskConfig,
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub wallets: Vec<WalletConfig>,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub network: Network,
    pub database_url: String,
    #[serde(default = "default_cron_interval")]
    pub cron_interval_secs: u64,
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,
    /// Settle executions at the estimate without touching the relay.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_cron_interval() -> u64 {
    300
}

fn default_cycle_timeout() -> u64 {
    240
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    pub max_combinations: usize,
    pub inter_quote_delay_ms: u64,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub slippage_bps: u32,
    pub top_opportunities: usize,
    pub retry: RetryConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_combinations: 12,
            inter_quote_delay_ms: 1_500,
            batch_size: 2,
            batch_pause_ms: 5_000,
            slippage_bps: 30,
            top_opportunities: 5,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Wait after the n-th failure; the last entry repeats.
    pub backoff_ms: Vec<u64>,
    pub relax_on_final_attempt: bool,
    /// Cumulative 429s per scan before the scan aborts.
    pub rate_limit_budget: u32,
    pub rate_limit_cooldown_ms: u64,
    pub call_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: vec![2_000, 4_000],
            relax_on_final_attempt: true,
            rate_limit_budget: 2,
            rate_limit_cooldown_ms: 10_000,
            call_timeout_secs: 15,
        }
    }
}

/// Initial global settings. Seeded once; the database wins afterwards.
#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    pub auto_arbitrage_enabled: bool,
    pub max_global_daily_loss: Decimal,
    pub max_global_trades_per_day: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuoteApi {
    Jupiter,
    ZeroEx,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub chain: Chain,
    pub quote_api: QuoteApi,
    pub quote_base_url: String,
    #[serde(default)]
    pub quote_api_key_env: Option<String>,
    pub rpc_url: String,
    #[serde(default)]
    pub relay_url: Option<String>,
    /// Wallet label whose key signs executions on this chain.
    pub signer_label: String,
    #[serde(default)]
    pub venues: Vec<String>,
    /// Price of one native token in strategy `token_in` units.
    pub gas_reference_price: Decimal,
    /// Smallest sell amount (base units) worth a quote.
    #[serde(default)]
    pub min_sell_amount: u64,
    pub fallback_gas_native: Decimal,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct WalletConfig {
    pub label: String,
    #[serde(default = "default_wallet_type")]
    pub wallet_type: WalletType,
    pub chain: Chain,
    pub address: String,
    pub low_threshold: Decimal,
    pub critical_threshold: Decimal,
    /// Env var holding the signing key.
    pub key_env: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_wallet_type() -> WalletType {
    WalletType::FeePayer
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    pub id: String,
    pub name: String,
    pub chain: Chain,
    pub network: Network,
    pub venue_a: String,
    pub venue_b: String,
    pub token_in: String,
    pub token_out: String,
    #[serde(default)]
    pub token_via: Option<String>,
    pub token_in_decimals: u32,
    pub notional: Decimal,
    pub scan_mode: ScanMode,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_auto_enabled: bool,
    #[serde(default)]
    pub purpose: StrategyPurpose,
    pub min_expected_profit: Decimal,
    pub min_profit_to_gas_ratio: Decimal,
    pub max_daily_loss: Decimal,
    pub max_trades_per_day: u32,
    #[serde(default)]
    pub max_trade_value: Option<Decimal>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    pub fn validate(&self) -> Result<(), FerryError> {
        if self.chains.is_empty() {
            return Err(FerryError::Config("at least one [[chains]] entry is required".into()));
        }
        if self.scanner.batch_size == 0 {
            return Err(FerryError::Config("scanner.batch_size must be at least 1".into()));
        }
        if self.scanner.retry.max_attempts == 0 {
            return Err(FerryError::Config("scanner.retry.max_attempts must be at least 1".into()));
        }
        if self.scanner.retry.rate_limit_budget == 0 {
            return Err(FerryError::Config("scanner.retry.rate_limit_budget must be at least 1".into()));
        }
        if self.scanner.max_combinations == 0 {
            return Err(FerryError::Config("scanner.max_combinations must be at least 1".into()));
        }
        if self.agent.cycle_timeout_secs == 0
            || self.agent.cycle_timeout_secs >= self.agent.cron_interval_secs
        {
            return Err(FerryError::Config(format!(
                "agent.cycle_timeout_secs ({}) must be positive and below cron_interval_secs ({})",
                self.agent.cycle_timeout_secs, self.agent.cron_interval_secs
            )));
        }

        for (i, c) in self.chains.iter().enumerate() {
            if self.chains[..i].iter().any(|other| other.chain == c.chain) {
                return Err(FerryError::Config(format!("chain {} configured twice", c.chain)));
            }
            if c.quote_api == QuoteApi::ZeroEx && !c.chain.is_evm() {
                return Err(FerryError::Config(format!("0x cannot quote on {}", c.chain)));
            }
            if c.quote_api == QuoteApi::Jupiter && c.chain != Chain::Solana {
                return Err(FerryError::Config(format!("jupiter cannot quote on {}", c.chain)));
            }
        }

        for s in &self.strategies {
            if self.chain(s.chain).is_none() {
                return Err(FerryError::Config(format!(
                    "strategy {} targets unconfigured chain {}",
                    s.id, s.chain
                )));
            }
            if s.scan_mode == ScanMode::Triangular && s.token_via.is_none() {
                return Err(FerryError::Config(format!(
                    "triangular strategy {} needs token_via",
                    s.id
                )));
            }
        }

        for w in &self.wallets {
            if w.critical_threshold > w.low_threshold {
                return Err(FerryError::Config(format!(
                    "wallet {}: critical_threshold exceeds low_threshold",
                    w.label
                )));
            }
        }
        Ok(())
    }

    pub fn chain(&self, chain: Chain) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain == chain)
    }

    // ----- Builders -----

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            max_combinations: self.scanner.max_combinations,
            inter_quote_delay: Duration::from_millis(self.scanner.inter_quote_delay_ms),
            batch_size: self.scanner.batch_size,
            batch_pause: Duration::from_millis(self.scanner.batch_pause_ms),
            slippage_bps: self.scanner.slippage_bps,
            top_opportunities: self.scanner.top_opportunities,
            shuffle_seed: None,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let r = &self.scanner.retry;
        RetryPolicy {
            max_attempts: r.max_attempts,
            delays: r.backoff_ms.iter().copied().map(Duration::from_millis).collect(),
            relax_on_final_attempt: r.relax_on_final_attempt,
            rate_limit_budget: r.rate_limit_budget,
            rate_limit_cooldown: Duration::from_millis(r.rate_limit_cooldown_ms),
            call_timeout: Duration::from_secs(r.call_timeout_secs),
        }
    }

    pub fn initial_settings(&self) -> GlobalSettings {
        GlobalSettings {
            auto_arbitrage_enabled: self.risk.auto_arbitrage_enabled,
            safe_mode_enabled: false,
            safe_mode_triggered_at: None,
            safe_mode_reason: None,
            max_global_daily_loss: self.risk.max_global_daily_loss,
            max_global_trades_per_day: self.risk.max_global_trades_per_day,
        }
    }

    pub fn strategies(&self) -> Vec<Strategy> {
        self.strategies.iter().map(StrategyConfig::to_strategy).collect()
    }

    pub fn wallets(&self) -> Vec<FeePayerWallet> {
        self.wallets.iter().map(WalletConfig::to_wallet).collect()
    }
}

impl ChainConfig {
    /// Provider settings with the API key resolved from the environment.
    /// A missing key is tolerated; public endpoints work without one.
    pub fn provider_settings(&self) -> ProviderSettings {
        let api_key = self
            .quote_api_key_env
            .as_deref()
            .and_then(|env| AppConfig::resolve_env(env).ok())
            .map(SecretString::new);
        ProviderSettings {
            base_url: self.quote_base_url.clone(),
            api_key,
            min_sell_amount: u128::from(self.min_sell_amount),
            fallback_gas_native: self.fallback_gas_native,
            timeout_secs: self.http_timeout_secs,
        }
    }
}

impl StrategyConfig {
    fn to_strategy(&self) -> Strategy {
        Strategy {
            id: self.id.clone(),
            name: self.name.clone(),
            chain: self.chain,
            network: self.network,
            venue_a: self.venue_a.clone(),
            venue_b: self.venue_b.clone(),
            token_in: self.token_in.clone(),
            token_out: self.token_out.clone(),
            token_via: self.token_via.clone(),
            token_in_decimals: self.token_in_decimals,
            notional: self.notional,
            scan_mode: self.scan_mode,
            is_enabled: self.is_enabled,
            is_auto_enabled: self.is_auto_enabled,
            purpose: self.purpose,
            min_expected_profit: self.min_expected_profit,
            min_profit_to_gas_ratio: self.min_profit_to_gas_ratio,
            max_daily_loss: self.max_daily_loss,
            max_trades_per_day: self.max_trades_per_day,
            max_trade_value: self.max_trade_value,
        }
    }
}

impl WalletConfig {
    fn to_wallet(&self) -> FeePayerWallet {
        FeePayerWallet {
            label: self.label.clone(),
            wallet_type: self.wallet_type,
            chain: self.chain,
            address: self.address.clone(),
            low_threshold: self.low_threshold,
            critical_threshold: self.critical_threshold,
            is_active: self.is_active,
            last_balance: None,
            last_health: None,
            last_checked_at: None,
        }
    }
}
