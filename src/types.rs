//! Shared types for the FERRY arbitrage loop.
//!
//! These types form the data model used across all modules: strategies,
//! runs, risk counters, wallet refill requests, global settings and the
//! per-cycle log with its typed phase results. They are designed to be
//! stable so that quote, chain, engine and storage modules can depend on
//! them without circular references.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Chain & network
// ---------------------------------------------------------------------------

/// Blockchains the loop knows how to quote, execute and monitor on.
///
/// Solana is the account-model chain; the rest are EVM chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Solana,
    Ethereum,
    Base,
    Arbitrum,
    Polygon,
}

impl Chain {
    pub const ALL: &'static [Chain] = &[
        Chain::Solana,
        Chain::Ethereum,
        Chain::Base,
        Chain::Arbitrum,
        Chain::Polygon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Solana => "solana",
            Chain::Ethereum => "ethereum",
            Chain::Base => "base",
            Chain::Arbitrum => "arbitrum",
            Chain::Polygon => "polygon",
        }
    }

    pub fn is_evm(&self) -> bool {
        !matches!(self, Chain::Solana)
    }

    /// EIP-155 chain id for EVM chains. `None` for Solana.
    pub fn evm_chain_id(&self, network: Network) -> Option<u64> {
        match (self, network) {
            (Chain::Solana, _) => None,
            (Chain::Ethereum, Network::Mainnet) => Some(1),
            (Chain::Ethereum, Network::Testnet) => Some(11_155_111),
            (Chain::Base, Network::Mainnet) => Some(8453),
            (Chain::Base, Network::Testnet) => Some(84_532),
            (Chain::Arbitrum, Network::Mainnet) => Some(42_161),
            (Chain::Arbitrum, Network::Testnet) => Some(421_614),
            (Chain::Polygon, Network::Mainnet) => Some(137),
            (Chain::Polygon, Network::Testnet) => Some(80_002),
        }
    }

    /// Decimals of the native fee token (lamports vs wei).
    pub fn native_decimals(&self) -> u32 {
        match self {
            Chain::Solana => 9,
            _ => 18,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Chain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "solana" | "sol" => Ok(Chain::Solana),
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            "base" => Ok(Chain::Base),
            "arbitrum" | "arb" => Ok(Chain::Arbitrum),
            "polygon" | "matic" => Ok(Chain::Polygon),
            _ => Err(anyhow::anyhow!("Unknown chain: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" | "devnet" => Ok(Network::Testnet),
            _ => Err(anyhow::anyhow!("Unknown network: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// How a strategy's opportunities are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Leg A on venue X, leg B on venue Y, for all X != Y.
    SourceMatrix,
    /// Three legs through three tokens, returning to the origin token.
    Triangular,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::SourceMatrix => "source_matrix",
            ScanMode::Triangular => "triangular",
        }
    }

    /// Number of swap legs in one round trip.
    pub fn legs(&self) -> usize {
        match self {
            ScanMode::SourceMatrix => 2,
            ScanMode::Triangular => 3,
        }
    }
}

impl std::str::FromStr for ScanMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "source_matrix" | "pairwise" => Ok(ScanMode::SourceMatrix),
            "triangular" => Ok(ScanMode::Triangular),
            _ => Err(anyhow::anyhow!("Unknown scan mode: {s}")),
        }
    }
}

/// Why a run was produced. Derived from the owning strategy's purpose flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPurpose {
    GeneralProfit,
    FeePayerRefill,
    OpsRefill,
}

impl RunPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPurpose::GeneralProfit => "general_profit",
            RunPurpose::FeePayerRefill => "fee_payer_refill",
            RunPurpose::OpsRefill => "ops_refill",
        }
    }
}

impl std::str::FromStr for RunPurpose {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general_profit" => Ok(RunPurpose::GeneralProfit),
            "fee_payer_refill" => Ok(RunPurpose::FeePayerRefill),
            "ops_refill" => Ok(RunPurpose::OpsRefill),
            _ => Err(anyhow::anyhow!("Unknown run purpose: {s}")),
        }
    }
}

/// Purpose flags carried by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyPurpose {
    #[serde(default = "default_true")]
    pub general_profit: bool,
    #[serde(default)]
    pub fee_payer_refill: bool,
    #[serde(default)]
    pub ops_wallet_refill: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StrategyPurpose {
    fn default() -> Self {
        Self {
            general_profit: true,
            fee_payer_refill: false,
            ops_wallet_refill: false,
        }
    }
}

impl StrategyPurpose {
    /// Refill purposes take precedence over general profit.
    pub fn primary(&self) -> RunPurpose {
        if self.fee_payer_refill {
            RunPurpose::FeePayerRefill
        } else if self.ops_wallet_refill {
            RunPurpose::OpsRefill
        } else {
            RunPurpose::GeneralProfit
        }
    }
}

/// A configured, risk-bounded arbitrage template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    pub chain: Chain,
    pub network: Network,
    pub venue_a: String,
    pub venue_b: String,
    pub token_in: String,
    pub token_out: String,
    /// Intermediate token for triangular scans.
    pub token_via: Option<String>,
    /// Decimals of `token_in`; notional and profits are in whole `token_in` units.
    pub token_in_decimals: u32,
    /// Trade size per round trip, in `token_in` units.
    pub notional: Decimal,
    pub scan_mode: ScanMode,
    pub is_enabled: bool,
    pub is_auto_enabled: bool,
    pub purpose: StrategyPurpose,
    pub min_expected_profit: Decimal,
    pub min_profit_to_gas_ratio: Decimal,
    pub max_daily_loss: Decimal,
    pub max_trades_per_day: u32,
    /// `None` means unlimited.
    pub max_trade_value: Option<Decimal>,
}

impl Strategy {
    /// Token path of one round trip, starting and ending at `token_in`.
    pub fn token_path(&self) -> Vec<String> {
        match (self.scan_mode, &self.token_via) {
            (ScanMode::Triangular, Some(via)) => vec![
                self.token_in.clone(),
                self.token_out.clone(),
                via.clone(),
                self.token_in.clone(),
            ],
            _ => vec![
                self.token_in.clone(),
                self.token_out.clone(),
                self.token_in.clone(),
            ],
        }
    }

    pub fn venues(&self) -> Vec<String> {
        vec![self.venue_a.clone(), self.venue_b.clone()]
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {} {}→{} ({} vs {}, {}, notional {})",
            self.chain,
            self.network,
            self.name,
            self.token_in,
            self.token_out,
            self.venue_a,
            self.venue_b,
            self.scan_mode.as_str(),
            self.notional,
        )
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Lifecycle status of a run. `Executed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Simulated,
    Executed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Simulated => "SIMULATED",
            RunStatus::Executed => "EXECUTED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Simulated)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SIMULATED" => Ok(RunStatus::Simulated),
            "EXECUTED" => Ok(RunStatus::Executed),
            "FAILED" => Ok(RunStatus::Failed),
            _ => Err(anyhow::anyhow!("Unknown run status: {s}")),
        }
    }
}

/// What the scanner concluded about a simulated round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanVerdict {
    Profitable,
    NotProfitable,
    Failed,
}

impl ScanVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanVerdict::Profitable => "PROFITABLE",
            ScanVerdict::NotProfitable => "NOT_PROFITABLE",
            ScanVerdict::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for ScanVerdict {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROFITABLE" => Ok(ScanVerdict::Profitable),
            "NOT_PROFITABLE" => Ok(ScanVerdict::NotProfitable),
            "FAILED" => Ok(ScanVerdict::Failed),
            _ => Err(anyhow::anyhow!("Unknown scan verdict: {s}")),
        }
    }
}

/// One simulated or executed arbitrage attempt tied to a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub strategy_id: String,
    /// Cycle id, or a diagnostic batch id for scan-only invocations.
    pub batch_id: String,
    pub chain: Chain,
    pub scan_mode: ScanMode,
    pub status: RunStatus,
    pub verdict: ScanVerdict,
    pub token_path: Vec<String>,
    pub source_path: Vec<String>,
    pub notional: Decimal,
    /// Round-trip output in `token_in` units, when every leg quoted.
    pub final_output: Option<Decimal>,
    /// Net profit after slippage buffer and gas, in `token_in` units.
    pub estimated_profit: Decimal,
    /// Gas for all legs, converted to `token_in` units.
    pub estimated_gas_cost: Decimal,
    pub actual_profit: Option<Decimal>,
    pub approved_for_auto_execution: bool,
    pub auto_executed: bool,
    pub purpose: RunPurpose,
    pub error_message: Option<String>,
    pub tx_reference: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// A fresh SIMULATED run for `strategy`, before any leg has been quoted.
    pub fn simulated(strategy: &Strategy, batch_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            strategy_id: strategy.id.clone(),
            batch_id: batch_id.to_string(),
            chain: strategy.chain,
            scan_mode: strategy.scan_mode,
            status: RunStatus::Simulated,
            verdict: ScanVerdict::NotProfitable,
            token_path: strategy.token_path(),
            source_path: Vec::new(),
            notional: strategy.notional,
            final_output: None,
            estimated_profit: Decimal::ZERO,
            estimated_gas_cost: Decimal::ZERO,
            actual_profit: None,
            approved_for_auto_execution: false,
            auto_executed: false,
            purpose: strategy.purpose.primary(),
            error_message: None,
            tx_reference: None,
            started_at,
            finished_at: None,
        }
    }

    /// Whether the Decision Engine should look at this run at all.
    pub fn is_decidable(&self) -> bool {
        self.status == RunStatus::Simulated
            && self.error_message.is_none()
            && self.estimated_profit > Decimal::ZERO
    }

    pub fn settle_executed(
        &mut self,
        actual_profit: Decimal,
        tx_reference: String,
        at: DateTime<Utc>,
    ) -> Result<(), FerryError> {
        self.ensure_open()?;
        self.status = RunStatus::Executed;
        self.actual_profit = Some(actual_profit);
        self.tx_reference = Some(tx_reference);
        self.auto_executed = true;
        self.finished_at = Some(at);
        Ok(())
    }

    pub fn settle_failed(&mut self, error: String, at: DateTime<Utc>) -> Result<(), FerryError> {
        self.ensure_open()?;
        self.status = RunStatus::Failed;
        self.error_message = Some(error);
        self.auto_executed = true;
        self.finished_at = Some(at);
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), FerryError> {
        if self.status.is_terminal() {
            return Err(FerryError::TerminalRun {
                run_id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} via {} net={} gas={} ({})",
            self.chain,
            self.status.as_str(),
            self.token_path.join("→"),
            self.source_path.join("→"),
            self.estimated_profit,
            self.estimated_gas_cost,
            self.verdict.as_str(),
        )
    }
}

// ---------------------------------------------------------------------------
// Daily risk counter
// ---------------------------------------------------------------------------

/// Running totals per strategy, per calendar date (UTC), per chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRiskCounter {
    pub strategy_id: String,
    pub date: NaiveDate,
    pub chain: Chain,
    pub total_trades: u32,
    pub total_pnl: Decimal,
    /// Sum of magnitudes of negative settled PnL. Never negative.
    pub total_loss: Decimal,
}

impl DailyRiskCounter {
    pub fn empty(strategy_id: &str, date: NaiveDate, chain: Chain) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            date,
            chain,
            total_trades: 0,
            total_pnl: Decimal::ZERO,
            total_loss: Decimal::ZERO,
        }
    }

    /// The amounts one execution attempt adds to its counter. `None` means
    /// the attempt failed on-chain: it still consumes the daily trade budget.
    pub fn attempt(
        strategy_id: &str,
        date: NaiveDate,
        chain: Chain,
        actual_profit: Option<Decimal>,
    ) -> Self {
        let pnl = actual_profit.unwrap_or(Decimal::ZERO);
        Self {
            total_trades: 1,
            total_pnl: pnl,
            total_loss: if pnl < Decimal::ZERO { pnl.abs() } else { Decimal::ZERO },
            ..Self::empty(strategy_id, date, chain)
        }
    }
}

// ---------------------------------------------------------------------------
// Wallets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    FeePayer,
    Operations,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::FeePayer => "fee_payer",
            WalletType::Operations => "operations",
        }
    }
}

impl std::str::FromStr for WalletType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fee_payer" => Ok(WalletType::FeePayer),
            "operations" => Ok(WalletType::Operations),
            _ => Err(anyhow::anyhow!("Unknown wallet type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletHealth {
    Healthy,
    Low,
    Critical,
}

impl WalletHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletHealth::Healthy => "HEALTHY",
            WalletHealth::Low => "LOW",
            WalletHealth::Critical => "CRITICAL",
        }
    }
}

impl std::str::FromStr for WalletHealth {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HEALTHY" => Ok(WalletHealth::Healthy),
            "LOW" => Ok(WalletHealth::Low),
            "CRITICAL" => Ok(WalletHealth::Critical),
            _ => Err(anyhow::anyhow!("Unknown wallet health: {s}")),
        }
    }
}

/// A wallet whose balance the health monitor keeps above threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeePayerWallet {
    pub label: String,
    pub wallet_type: WalletType,
    pub chain: Chain,
    pub address: String,
    /// Native-token balance under which a refill is requested.
    pub low_threshold: Decimal,
    /// Native-token balance under which the wallet is critical.
    pub critical_threshold: Decimal,
    pub is_active: bool,
    pub last_balance: Option<Decimal>,
    pub last_health: Option<WalletHealth>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl FeePayerWallet {
    pub fn classify(&self, balance: Decimal) -> WalletHealth {
        if balance < self.critical_threshold {
            WalletHealth::Critical
        } else if balance < self.low_threshold {
            WalletHealth::Low
        } else {
            WalletHealth::Healthy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillReason {
    LowBalance,
    CriticalBalance,
}

impl RefillReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefillReason::LowBalance => "low_balance",
            RefillReason::CriticalBalance => "critical_balance",
        }
    }
}

impl std::str::FromStr for RefillReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low_balance" => Ok(RefillReason::LowBalance),
            "critical_balance" => Ok(RefillReason::CriticalBalance),
            _ => Err(anyhow::anyhow!("Unknown refill reason: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefillStatus {
    Pending,
    Completed,
    Dismissed,
}

impl RefillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefillStatus::Pending => "PENDING",
            RefillStatus::Completed => "COMPLETED",
            RefillStatus::Dismissed => "DISMISSED",
        }
    }
}

impl std::str::FromStr for RefillStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RefillStatus::Pending),
            "COMPLETED" => Ok(RefillStatus::Completed),
            "DISMISSED" => Ok(RefillStatus::Dismissed),
            _ => Err(anyhow::anyhow!("Unknown refill status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRefillRequest {
    pub id: String,
    pub wallet_type: WalletType,
    pub wallet_address: String,
    pub chain: Chain,
    pub reason: RefillReason,
    pub status: RefillStatus,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Global settings
// ---------------------------------------------------------------------------

/// Process-wide switches and limits, loaded once at the start of each
/// cycle and threaded through the phases by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    pub auto_arbitrage_enabled: bool,
    pub safe_mode_enabled: bool,
    pub safe_mode_triggered_at: Option<DateTime<Utc>>,
    pub safe_mode_reason: Option<String>,
    pub max_global_daily_loss: Decimal,
    pub max_global_trades_per_day: u32,
}

impl GlobalSettings {
    /// Whether anything may be approved or executed at all.
    pub fn allows_auto_execution(&self) -> bool {
        self.auto_arbitrage_enabled && !self.safe_mode_enabled
    }

    pub fn apply_trip(&mut self, trip: &SafeModeTrip) {
        self.safe_mode_enabled = true;
        self.safe_mode_triggered_at = Some(trip.triggered_at);
        self.safe_mode_reason = Some(trip.reason.clone());
    }
}

/// Write-back produced by the Execution Engine when the global loss
/// limit is breached. Persisted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeModeTrip {
    pub triggered_at: DateTime<Utc>,
    pub reason: String,
    pub global_loss: Decimal,
    pub limit: Decimal,
}

// ---------------------------------------------------------------------------
// Phase results
// ---------------------------------------------------------------------------

/// Result slot for a phase in the cycle log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome<T> {
    Completed(T),
    Skipped { reason: String },
    Failed { error: String },
}

impl<T> PhaseOutcome<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, PhaseOutcome::Failed { .. })
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            PhaseOutcome::Completed(v) => Some(v),
            _ => None,
        }
    }
}

/// One top-ranked opportunity, kept in the scan summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunitySummary {
    pub run_id: String,
    pub strategy_id: String,
    pub source_path: Vec<String>,
    pub net_profit: Decimal,
}

/// Summary of one chain's scan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    pub strategies_scanned: usize,
    pub combinations_attempted: usize,
    pub profitable: usize,
    pub not_profitable: usize,
    pub failed: usize,
    pub quote_calls: usize,
    pub rate_limited_responses: u32,
    pub aborted_due_to_rate_limit: bool,
    pub top_opportunities: Vec<OpportunitySummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainScanOutcome {
    pub chain: Chain,
    pub outcome: PhaseOutcome<ScanSummary>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionResult {
    pub evaluated: usize,
    pub approved: usize,
    /// Rejection counts keyed by reason code.
    pub rejected: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub attempted: usize,
    pub executed: usize,
    pub failed: usize,
    pub realized_pnl: Decimal,
    /// Safe mode was already on when the phase started.
    pub skipped_safe_mode: bool,
    /// Set when this phase tripped safe mode; execution halted there.
    pub safe_mode_trip: Option<SafeModeTrip>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WalletCheckResult {
    pub checked: usize,
    pub healthy: usize,
    pub low: usize,
    pub critical: usize,
    pub read_errors: usize,
    pub requests_created: usize,
}

// ---------------------------------------------------------------------------
// Cycle log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Cron,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Cron => "cron",
            TriggerType::Manual => "manual",
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cron" => Ok(TriggerType::Cron),
            "manual" => Ok(TriggerType::Manual),
            _ => Err(anyhow::anyhow!("Unknown trigger type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    Running,
    Success,
    Partial,
    Failed,
    Skipped,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Running => "RUNNING",
            CycleStatus::Success => "SUCCESS",
            CycleStatus::Partial => "PARTIAL",
            CycleStatus::Failed => "FAILED",
            CycleStatus::Skipped => "SKIPPED",
        }
    }
}

impl std::str::FromStr for CycleStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(CycleStatus::Running),
            "SUCCESS" => Ok(CycleStatus::Success),
            "PARTIAL" => Ok(CycleStatus::Partial),
            "FAILED" => Ok(CycleStatus::Failed),
            "SKIPPED" => Ok(CycleStatus::Skipped),
            _ => Err(anyhow::anyhow!("Unknown cycle status: {s}")),
        }
    }
}

/// One record per orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationCycleLog {
    pub id: String,
    pub cycle_started_at: DateTime<Utc>,
    pub cycle_finished_at: Option<DateTime<Utc>>,
    pub trigger_type: TriggerType,
    pub overall_status: CycleStatus,
    pub scan: Vec<ChainScanOutcome>,
    pub decision: Option<PhaseOutcome<DecisionResult>>,
    pub execution: Option<PhaseOutcome<ExecutionResult>>,
    pub wallet_check: Option<PhaseOutcome<WalletCheckResult>>,
    pub error_message: Option<String>,
}

impl AutomationCycleLog {
    pub fn start(trigger_type: TriggerType, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cycle_started_at: now,
            cycle_finished_at: None,
            trigger_type,
            overall_status: CycleStatus::Running,
            scan: Vec::new(),
            decision: None,
            execution: None,
            wallet_check: None,
            error_message: None,
        }
    }

    /// A cycle that never touched any phase.
    pub fn skipped(trigger_type: TriggerType, now: DateTime<Utc>, reason: &str) -> Self {
        let mut log = Self::start(trigger_type, now);
        log.overall_status = CycleStatus::Skipped;
        log.cycle_finished_at = Some(now);
        log.error_message = Some(reason.to_string());
        log
    }

    /// Number of phase slots (per-chain scans count individually) that failed.
    pub fn phase_errors(&self) -> usize {
        let scans = self.scan.iter().filter(|s| s.outcome.is_failed()).count();
        let decision = self.decision.as_ref().map_or(false, |p| p.is_failed()) as usize;
        let execution = self.execution.as_ref().map_or(false, |p| p.is_failed()) as usize;
        let wallets = self.wallet_check.as_ref().map_or(false, |p| p.is_failed()) as usize;
        scans + decision + execution + wallets
    }

    /// SUCCESS when every phase completed cleanly, PARTIAL otherwise.
    pub fn finalize(&mut self, now: DateTime<Utc>) {
        self.overall_status = if self.phase_errors() == 0 {
            CycleStatus::Success
        } else {
            CycleStatus::Partial
        };
        self.cycle_finished_at = Some(now);
    }

    /// The cycle stopped before wallet health ran.
    pub fn fail(&mut self, now: DateTime<Utc>, error: String) {
        self.overall_status = CycleStatus::Failed;
        self.cycle_finished_at = Some(now);
        self.error_message = Some(error);
    }
}

impl fmt::Display for AutomationCycleLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let approved = self
            .decision
            .as_ref()
            .and_then(|d| d.completed())
            .map_or(0, |d| d.approved);
        let executed = self
            .execution
            .as_ref()
            .and_then(|e| e.completed())
            .map_or(0, |e| e.executed);
        write!(
            f,
            "Cycle {} [{}] {}: chains={} approved={} executed={}",
            self.id,
            self.trigger_type.as_str(),
            self.overall_status.as_str(),
            self.scan.len(),
            approved,
            executed,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for FERRY.
#[derive(Debug, thiserror::Error)]
pub enum FerryError {
    #[error("Run {run_id} is already terminal ({status:?})")]
    TerminalRun { run_id: String, status: RunStatus },

    #[error("No {what} configured for chain {chain}")]
    ChainNotConfigured { chain: Chain, what: &'static str },

    #[error("Cycle lease is held by {holder}")]
    LeaseHeld { holder: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn sample_strategy(id: &str) -> Strategy {
        Strategy {
            id: id.to_string(),
            name: format!("strategy {id}"),
            chain: Chain::Solana,
            network: Network::Mainnet,
            venue_a: "Raydium".to_string(),
            venue_b: "Orca".to_string(),
            token_in: "USDC".to_string(),
            token_out: "SOL".to_string(),
            token_via: None,
            token_in_decimals: 6,
            notional: dec!(1000),
            scan_mode: ScanMode::SourceMatrix,
            is_enabled: true,
            is_auto_enabled: true,
            purpose: StrategyPurpose::default(),
            min_expected_profit: dec!(1),
            min_profit_to_gas_ratio: dec!(2),
            max_daily_loss: dec!(50),
            max_trades_per_day: 10,
            max_trade_value: None,
        }
    }

    // -- Chain tests --

    #[test]
    fn test_chain_from_str() {
        assert_eq!("solana".parse::<Chain>().unwrap(), Chain::Solana);
        assert_eq!("BASE".parse::<Chain>().unwrap(), Chain::Base);
        assert_eq!("eth".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert!("dogecoin".parse::<Chain>().is_err());
    }

    #[test]
    fn test_chain_ecosystems() {
        assert!(!Chain::Solana.is_evm());
        assert!(Chain::Base.is_evm());
        assert_eq!(Chain::Solana.evm_chain_id(Network::Mainnet), None);
        assert_eq!(Chain::Base.evm_chain_id(Network::Mainnet), Some(8453));
        assert_eq!(Chain::Solana.native_decimals(), 9);
        assert_eq!(Chain::Polygon.native_decimals(), 18);
    }

    // -- Strategy tests --

    #[test]
    fn test_token_path_source_matrix() {
        let s = sample_strategy("s1");
        assert_eq!(s.token_path(), vec!["USDC", "SOL", "USDC"]);
    }

    #[test]
    fn test_token_path_triangular() {
        let mut s = sample_strategy("s1");
        s.scan_mode = ScanMode::Triangular;
        s.token_via = Some("JUP".to_string());
        assert_eq!(s.token_path(), vec!["USDC", "SOL", "JUP", "USDC"]);
    }

    #[test]
    fn test_purpose_precedence() {
        let mut p = StrategyPurpose::default();
        assert_eq!(p.primary(), RunPurpose::GeneralProfit);
        p.ops_wallet_refill = true;
        assert_eq!(p.primary(), RunPurpose::OpsRefill);
        p.fee_payer_refill = true;
        assert_eq!(p.primary(), RunPurpose::FeePayerRefill);
    }

    // -- Run tests --

    #[test]
    fn test_run_terminal_is_sticky() {
        let s = sample_strategy("s1");
        let mut run = Run::simulated(&s, "batch", Utc::now());
        run.settle_executed(dec!(3), "tx1".into(), Utc::now()).unwrap();
        assert_eq!(run.status, RunStatus::Executed);
        assert!(run.auto_executed);

        let err = run.settle_failed("late failure".into(), Utc::now()).unwrap_err();
        assert!(matches!(err, FerryError::TerminalRun { .. }));
        assert_eq!(run.status, RunStatus::Executed);
        assert_eq!(run.actual_profit, Some(dec!(3)));
    }

    #[test]
    fn test_run_decidable() {
        let s = sample_strategy("s1");
        let mut run = Run::simulated(&s, "batch", Utc::now());
        assert!(!run.is_decidable(), "zero profit is not decidable");
        run.estimated_profit = dec!(5);
        assert!(run.is_decidable());
        run.error_message = Some("leg 2 failed".into());
        assert!(!run.is_decidable());
    }

    // -- Counter tests --

    #[test]
    fn test_counter_attempt_records_losses_as_magnitudes() {
        let today = Utc::now().date_naive();
        let loss = DailyRiskCounter::attempt("s1", today, Chain::Solana, Some(dec!(-1.5)));
        assert_eq!(loss.total_trades, 1);
        assert_eq!(loss.total_pnl, dec!(-1.5));
        assert_eq!(loss.total_loss, dec!(1.5));

        let gain = DailyRiskCounter::attempt("s1", today, Chain::Solana, Some(dec!(10)));
        assert_eq!(gain.total_loss, Decimal::ZERO);

        let failed = DailyRiskCounter::attempt("s1", today, Chain::Solana, None);
        assert_eq!(failed.total_trades, 1);
        assert_eq!(failed.total_pnl, Decimal::ZERO);
        assert_eq!(failed.total_loss, Decimal::ZERO);
    }

    // -- Wallet tests --

    #[test]
    fn test_wallet_classification() {
        let w = FeePayerWallet {
            label: "fp".into(),
            wallet_type: WalletType::FeePayer,
            chain: Chain::Solana,
            address: "addr".into(),
            low_threshold: dec!(1),
            critical_threshold: dec!(0.2),
            is_active: true,
            last_balance: None,
            last_health: None,
            last_checked_at: None,
        };
        assert_eq!(w.classify(dec!(5)), WalletHealth::Healthy);
        assert_eq!(w.classify(dec!(1)), WalletHealth::Healthy);
        assert_eq!(w.classify(dec!(0.5)), WalletHealth::Low);
        assert_eq!(w.classify(dec!(0.1)), WalletHealth::Critical);
    }

    // -- Settings tests --

    #[test]
    fn test_apply_trip_sets_safe_mode() {
        let mut s = GlobalSettings {
            auto_arbitrage_enabled: true,
            safe_mode_enabled: false,
            safe_mode_triggered_at: None,
            safe_mode_reason: None,
            max_global_daily_loss: dec!(1000),
            max_global_trades_per_day: 100,
        };
        assert!(s.allows_auto_execution());
        let trip = SafeModeTrip {
            triggered_at: Utc::now(),
            reason: "loss".into(),
            global_loss: dec!(1200),
            limit: dec!(1000),
        };
        s.apply_trip(&trip);
        assert!(s.safe_mode_enabled);
        assert_eq!(s.safe_mode_reason.as_deref(), Some("loss"));
        assert!(!s.allows_auto_execution());
    }

    // -- Cycle log tests --

    #[test]
    fn test_cycle_log_finalize_success_and_partial() {
        let mut log = AutomationCycleLog::start(TriggerType::Cron, Utc::now());
        log.scan.push(ChainScanOutcome {
            chain: Chain::Solana,
            outcome: PhaseOutcome::Completed(ScanSummary::default()),
        });
        log.decision = Some(PhaseOutcome::Completed(DecisionResult::default()));
        log.finalize(Utc::now());
        assert_eq!(log.overall_status, CycleStatus::Success);

        log.scan.push(ChainScanOutcome {
            chain: Chain::Base,
            outcome: PhaseOutcome::Failed { error: "rpc down".into() },
        });
        log.finalize(Utc::now());
        assert_eq!(log.overall_status, CycleStatus::Partial);
        assert!(log.cycle_finished_at.is_some());
    }

    #[test]
    fn test_cycle_log_skipped() {
        let log = AutomationCycleLog::skipped(TriggerType::Manual, Utc::now(), "disabled");
        assert_eq!(log.overall_status, CycleStatus::Skipped);
        assert_eq!(log.error_message.as_deref(), Some("disabled"));
        assert!(log.scan.is_empty());
    }

    #[test]
    fn test_phase_outcome_serialization() {
        let p: PhaseOutcome<DecisionResult> = PhaseOutcome::Skipped {
            reason: "no approved runs".into(),
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("skipped"));
        let back: PhaseOutcome<DecisionResult> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
