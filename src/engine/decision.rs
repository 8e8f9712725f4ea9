//! Decision engine.
//!
//! A pure filter over simulated runs: it never changes a profit estimate
//! and never touches chain state. Every decidable run is checked against
//! the global switches, its strategy's limits and today's counter snapshot,
//! and its approval flag is written back (true or false). Re-running it on
//! the same runs and counters yields the same approvals.

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::Store;
use crate::types::{Chain, DailyRiskCounter, DecisionResult, GlobalSettings, Run, Strategy};

// ---------------------------------------------------------------------------
// Rejection reasons
// ---------------------------------------------------------------------------

/// Why a run was not approved. A terminal non-approval, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    SafeMode,
    AutoArbitrageDisabled,
    StrategyAutoDisabled,
    StrategyMissing,
    BelowMinProfit,
    ZeroGasCost,
    BelowProfitToGasRatio,
    ExceedsMaxTradeValue,
    DailyTradeLimit,
    DailyLossLimit,
    GlobalTradeLimit,
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::SafeMode => "safe_mode",
            RejectionReason::AutoArbitrageDisabled => "auto_arbitrage_disabled",
            RejectionReason::StrategyAutoDisabled => "strategy_auto_disabled",
            RejectionReason::StrategyMissing => "strategy_missing",
            RejectionReason::BelowMinProfit => "below_min_profit",
            RejectionReason::ZeroGasCost => "zero_gas_cost",
            RejectionReason::BelowProfitToGasRatio => "below_profit_to_gas_ratio",
            RejectionReason::ExceedsMaxTradeValue => "exceeds_max_trade_value",
            RejectionReason::DailyTradeLimit => "daily_trade_limit",
            RejectionReason::DailyLossLimit => "daily_loss_limit",
            RejectionReason::GlobalTradeLimit => "global_trade_limit",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Check one run. `counter` is today's snapshot for the run's strategy and
/// chain; `global_trades` is today's trade count across all strategies.
pub fn evaluate(
    run: &Run,
    strategy: &Strategy,
    counter: &DailyRiskCounter,
    settings: &GlobalSettings,
    global_trades: u32,
) -> Result<(), RejectionReason> {
    if settings.safe_mode_enabled {
        return Err(RejectionReason::SafeMode);
    }
    if !settings.auto_arbitrage_enabled {
        return Err(RejectionReason::AutoArbitrageDisabled);
    }
    if !strategy.is_auto_enabled {
        return Err(RejectionReason::StrategyAutoDisabled);
    }

    if run.estimated_profit < strategy.min_expected_profit {
        return Err(RejectionReason::BelowMinProfit);
    }

    // No gas estimate means no ratio to check against
    if run.estimated_gas_cost <= Decimal::ZERO {
        return Err(RejectionReason::ZeroGasCost);
    }
    if run.estimated_profit / run.estimated_gas_cost < strategy.min_profit_to_gas_ratio {
        return Err(RejectionReason::BelowProfitToGasRatio);
    }

    if let Some(max) = strategy.max_trade_value {
        if run.notional > max {
            return Err(RejectionReason::ExceedsMaxTradeValue);
        }
    }

    if counter.total_trades >= strategy.max_trades_per_day {
        return Err(RejectionReason::DailyTradeLimit);
    }
    if counter.total_loss >= strategy.max_daily_loss {
        return Err(RejectionReason::DailyLossLimit);
    }
    if global_trades >= settings.max_global_trades_per_day {
        return Err(RejectionReason::GlobalTradeLimit);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Decide over `runs` in order and persist each approval flag.
pub async fn decide(
    store: &Store,
    runs: &[Run],
    settings: &GlobalSettings,
    now: DateTime<Utc>,
) -> Result<DecisionResult> {
    let today = now.date_naive();
    let global_trades = store.global_daily_trades(today).await?;

    let mut strategies: HashMap<String, Option<Strategy>> = HashMap::new();
    let mut counters: HashMap<(String, Chain), DailyRiskCounter> = HashMap::new();
    let mut result = DecisionResult::default();

    for run in runs.iter().filter(|r| r.is_decidable()) {
        result.evaluated += 1;

        if !strategies.contains_key(&run.strategy_id) {
            let loaded = store.strategy(&run.strategy_id).await?;
            strategies.insert(run.strategy_id.clone(), loaded);
        }

        let verdict = match strategies.get(&run.strategy_id).and_then(Option::as_ref) {
            None => Err(RejectionReason::StrategyMissing),
            Some(strategy) => {
                let key = (run.strategy_id.clone(), run.chain);
                let counter = match counters.get(&key) {
                    Some(c) => c.clone(),
                    None => {
                        let c = store.counter(&run.strategy_id, today, run.chain).await?;
                        counters.insert(key, c.clone());
                        c
                    }
                };
                evaluate(run, strategy, &counter, settings, global_trades)
            }
        };

        match verdict {
            Ok(()) => {
                store.set_approval(&run.id, true).await?;
                result.approved += 1;
                debug!(run_id = %run.id, profit = %run.estimated_profit, "Run approved");
            }
            Err(reason) => {
                store.set_approval(&run.id, false).await?;
                *result.rejected.entry(reason.code().to_string()).or_insert(0) += 1;
                debug!(run_id = %run.id, reason = %reason, "Run rejected");
            }
        }
    }

    info!(
        evaluated = result.evaluated,
        approved = result.approved,
        rejected = result.evaluated - result.approved,
        safe_mode = settings.safe_mode_enabled,
        "Decision complete"
    );
    Ok(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
