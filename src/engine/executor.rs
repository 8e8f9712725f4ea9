//! Execution engine.
//!
//! Settles approved runs one at a time, in creation order: submit through
//! the chain client with the chain's fee-payer signer, then persist the
//! terminal state and the daily counter charge in one transaction. A
//! failed attempt still consumes one trade from the daily budget.
//!
//! After every settlement the day's loss across all strategies is checked
//! against the global limit. On breach the engine stops and returns a
//! `SafeModeTrip` for the caller to persist. It never clears safe mode.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::chain::{ChainClients, ExecutionReceipt, KeyStore};
use crate::storage::Store;
use crate::types::{Chain, ExecutionResult, FerryError, GlobalSettings, Run, RunStatus, SafeModeTrip};

pub struct ExecutionEngine {
    chains: ChainClients,
    keys: Arc<dyn KeyStore>,
    /// Fee-payer wallet label used to sign on each chain.
    signer_labels: HashMap<Chain, String>,
}

impl ExecutionEngine {
    pub fn new(
        chains: ChainClients,
        keys: Arc<dyn KeyStore>,
        signer_labels: HashMap<Chain, String>,
    ) -> Self {
        Self {
            chains,
            keys,
            signer_labels,
        }
    }

    pub fn chains(&self) -> &ChainClients {
        &self.chains
    }

    /// Execute the approved runs among `runs`.
    pub async fn execute(
        &self,
        store: &Store,
        runs: &[Run],
        settings: &GlobalSettings,
        now: DateTime<Utc>,
    ) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::default();

        if settings.safe_mode_enabled {
            info!(
                reason = settings.safe_mode_reason.as_deref().unwrap_or("unknown"),
                "Safe mode active, execution skipped"
            );
            result.skipped_safe_mode = true;
            return Ok(result);
        }

        let today = now.date_naive();
        let approved = runs
            .iter()
            .filter(|r| r.approved_for_auto_execution && r.status == RunStatus::Simulated);

        for run in approved {
            result.attempted += 1;
            let mut run = run.clone();

            match self.submit(&run).await {
                Ok(receipt) => {
                    let profit = receipt.actual_profit;
                    run.settle_executed(profit, receipt.tx_reference.clone(), Utc::now())?;
                    if store.settle_run_and_record(&run, today).await?.is_some() {
                        result.executed += 1;
                        result.realized_pnl += profit;
                        info!(
                            run_id = %run.id,
                            chain = %run.chain,
                            tx = %receipt.tx_reference,
                            estimated = %run.estimated_profit,
                            actual = %profit,
                            "Run executed"
                        );
                    }
                }
                Err(reason) => {
                    run.settle_failed(reason.clone(), Utc::now())?;
                    if store.settle_run_and_record(&run, today).await?.is_some() {
                        result.failed += 1;
                        warn!(run_id = %run.id, chain = %run.chain, error = %reason, "Run execution failed");
                    }
                }
            }

            let global_loss = store.global_daily_loss(today).await?;
            if global_loss > settings.max_global_daily_loss {
                let trip = SafeModeTrip {
                    triggered_at: Utc::now(),
                    reason: format!(
                        "global daily loss {global_loss} exceeded limit {} on {today}",
                        settings.max_global_daily_loss
                    ),
                    global_loss,
                    limit: settings.max_global_daily_loss,
                };
                error!(
                    global_loss = %global_loss,
                    limit = %settings.max_global_daily_loss,
                    run_id = %run.id,
                    "Global loss limit breached, tripping safe mode"
                );
                result.safe_mode_trip = Some(trip);
                break;
            }
        }

        info!(
            attempted = result.attempted,
            executed = result.executed,
            failed = result.failed,
            pnl = %result.realized_pnl,
            tripped = result.safe_mode_trip.is_some(),
            "Execution complete"
        );
        Ok(result)
    }

    /// Submit one run. Any failure comes back as the run's error message.
    async fn submit(&self, run: &Run) -> Result<ExecutionReceipt, String> {
        let client = self.chains.get(run.chain).map_err(|e| e.to_string())?;
        let label = self
            .signer_labels
            .get(&run.chain)
            .ok_or_else(|| {
                FerryError::ChainNotConfigured {
                    chain: run.chain,
                    what: "fee-payer signer",
                }
                .to_string()
            })?;
        let signer = self.keys.signer_for(label).map_err(|e| e.to_string())?;
        client.execute(run, &signer).await.map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
