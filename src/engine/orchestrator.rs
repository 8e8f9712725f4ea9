//! Cycle orchestrator.
//!
//! One cycle: Scan (every chain, concurrently) → Decide → Execute →
//! Wallet health, strictly in that order. Only one cycle runs at a time
//! across processes, enforced by the `automation_cycle` lease row. A
//! trigger that finds the lease held records a SKIPPED cycle instead of
//! queueing.
//!
//! The cycle log is written when the cycle starts and updated after every
//! phase, so a crash leaves a RUNNING row behind. The next lease holder
//! closes such rows as FAILED.
//!
//! Diagnostic single-phase entry points take the same lease and fail with
//! `FerryError::LeaseHeld` while a cycle runs.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::engine::decision;
use crate::engine::executor::ExecutionEngine;
use crate::engine::scanner::OpportunityScanner;
use crate::engine::wallets;
use crate::storage::{Store, CYCLE_LEASE};
use crate::types::{
    AutomationCycleLog, ChainScanOutcome, DailyRiskCounter, DecisionResult, ExecutionResult,
    FerryError, GlobalSettings, PhaseOutcome, Run, TriggerType, WalletCheckResult, WalletRefillRequest,
};

/// Slack added to the cycle timeout when sizing the lease, so the lease
/// never expires under a cycle that is still finishing its log write.
const LEASE_MARGIN: Duration = Duration::from_secs(60);

/// Read-only snapshot for `ferry status` and `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub settings: GlobalSettings,
    pub lease_holder: Option<String>,
    pub last_cycle: Option<AutomationCycleLog>,
    pub date: NaiveDate,
    pub global_daily_loss: Decimal,
    pub global_daily_trades: u32,
    pub counters: Vec<DailyRiskCounter>,
    pub pending_refills: Vec<WalletRefillRequest>,
}

pub struct CycleOrchestrator {
    store: Store,
    scanners: Vec<OpportunityScanner>,
    executor: ExecutionEngine,
    cycle_timeout: Duration,
    /// Identity written into the lease row.
    holder: String,
}

impl CycleOrchestrator {
    pub fn new(
        store: Store,
        scanners: Vec<OpportunityScanner>,
        executor: ExecutionEngine,
        cycle_timeout: Duration,
    ) -> Self {
        let holder = format!("ferry-{}", uuid::Uuid::new_v4());
        Self {
            store,
            scanners,
            executor,
            cycle_timeout,
            holder,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    // ----- Lease -----

    fn lease_ttl(&self) -> chrono::Duration {
        let ttl = self.cycle_timeout + LEASE_MARGIN;
        chrono::Duration::milliseconds(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX / 2))
    }

    async fn acquire(&self, now: DateTime<Utc>) -> Result<bool> {
        self.store
            .try_acquire_lease(CYCLE_LEASE, &self.holder, now, self.lease_ttl())
            .await
    }

    async fn release(&self) {
        if let Err(e) = self.store.release_lease(CYCLE_LEASE, &self.holder).await {
            error!(holder = %self.holder, error = %e, "Failed to release cycle lease");
        }
    }

    /// Acquire the lease for a diagnostic phase or report who holds it.
    async fn acquire_for_diagnostic(&self) -> Result<()> {
        let now = Utc::now();
        if self.acquire(now).await? {
            return Ok(());
        }
        let holder = self
            .store
            .lease_holder(CYCLE_LEASE, now)
            .await?
            .unwrap_or_else(|| "unknown".to_string());
        Err(FerryError::LeaseHeld { holder }.into())
    }

    // ----- Full cycle -----

    /// Run one full cycle and return its final log.
    pub async fn run_cycle(&self, trigger: TriggerType) -> Result<AutomationCycleLog> {
        let now = Utc::now();
        let settings = self.store.settings().await?;

        if !settings.auto_arbitrage_enabled {
            return self.record_skip(trigger, now, "auto arbitrage disabled").await;
        }
        if !self.acquire(now).await? {
            return self.record_skip(trigger, now, "cycle lease held").await;
        }

        let outcome = self.run_locked(trigger, settings, now).await;
        self.release().await;
        outcome
    }

    async fn record_skip(
        &self,
        trigger: TriggerType,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<AutomationCycleLog> {
        let log = AutomationCycleLog::skipped(trigger, now, reason);
        self.store.insert_cycle_log(&log).await?;
        info!(cycle_id = %log.id, trigger = trigger.as_str(), reason, "Cycle skipped");
        Ok(log)
    }

    async fn run_locked(
        &self,
        trigger: TriggerType,
        settings: GlobalSettings,
        now: DateTime<Utc>,
    ) -> Result<AutomationCycleLog> {
        self.store.fail_abandoned_cycles(now).await?;

        let mut log = AutomationCycleLog::start(trigger, now);
        self.store.insert_cycle_log(&log).await?;
        info!(cycle_id = %log.id, trigger = trigger.as_str(), "Cycle started");

        let outcome = tokio::time::timeout(self.cycle_timeout, self.run_phases(&mut log, settings)).await;
        match outcome {
            Ok(Ok(())) => log.finalize(Utc::now()),
            Ok(Err(e)) => {
                error!(cycle_id = %log.id, error = %e, "Cycle failed");
                log.fail(Utc::now(), format!("{e:#}"));
            }
            Err(_) => {
                error!(cycle_id = %log.id, timeout_secs = self.cycle_timeout.as_secs(), "Cycle timed out");
                log.fail(
                    Utc::now(),
                    format!("cycle timed out after {}s", self.cycle_timeout.as_secs()),
                );
            }
        }

        self.store.update_cycle_log(&log).await?;
        info!(
            cycle_id = %log.id,
            status = log.overall_status.as_str(),
            phase_errors = log.phase_errors(),
            "{log}"
        );
        Ok(log)
    }

    /// Phase sequence. Phase failures are recorded in the log and the cycle
    /// moves on; an `Err` here means the log itself could not be kept.
    async fn run_phases(&self, log: &mut AutomationCycleLog, mut settings: GlobalSettings) -> Result<()> {
        let batch_id = log.id.clone();

        // Scan
        log.scan = self.scan_all(&batch_id).await;
        self.store.update_cycle_log(log).await?;

        // Decide
        let runs = self.store.runs_for_batch(&batch_id).await?;
        let decision = match decision::decide(&self.store, &runs, &settings, Utc::now()).await {
            Ok(result) => PhaseOutcome::Completed(result),
            Err(e) => {
                warn!(cycle_id = %log.id, error = %e, "Decision phase failed");
                PhaseOutcome::Failed { error: format!("{e:#}") }
            }
        };
        let approved = decision.completed().map_or(0, |d| d.approved);
        log.decision = Some(decision);
        self.store.update_cycle_log(log).await?;

        // Execute
        log.execution = Some(if approved == 0 {
            PhaseOutcome::Skipped {
                reason: "no approved runs".to_string(),
            }
        } else {
            let approved_runs = self.store.approved_runs(&batch_id).await?;
            match self.execute_and_persist(&approved_runs, &mut settings).await {
                Ok(result) => PhaseOutcome::Completed(result),
                Err(e) => {
                    warn!(cycle_id = %log.id, error = %e, "Execution phase failed");
                    PhaseOutcome::Failed { error: format!("{e:#}") }
                }
            }
        });
        self.store.update_cycle_log(log).await?;

        // Wallet health
        log.wallet_check = Some(
            match wallets::check_wallets(&self.store, self.executor.chains(), Utc::now()).await {
                Ok(result) => PhaseOutcome::Completed(result),
                Err(e) => {
                    warn!(cycle_id = %log.id, error = %e, "Wallet check failed");
                    PhaseOutcome::Failed { error: format!("{e:#}") }
                }
            },
        );
        self.store.update_cycle_log(log).await?;

        Ok(())
    }

    /// Scan every chain concurrently. Each chain has its own provider and
    /// rate-limit breaker, so one chain's failure leaves the others alone.
    async fn scan_all(&self, batch_id: &str) -> Vec<ChainScanOutcome> {
        let strategies = match self.store.strategies().await {
            Ok(s) => s,
            Err(e) => {
                let error = format!("{e:#}");
                return self
                    .scanners
                    .iter()
                    .map(|s| ChainScanOutcome {
                        chain: s.chain(),
                        outcome: PhaseOutcome::Failed { error: error.clone() },
                    })
                    .collect();
            }
        };

        let scans = self
            .scanners
            .iter()
            .map(|scanner| scanner.scan(&strategies, batch_id, &self.store));
        let results = join_all(scans).await;

        self.scanners
            .iter()
            .zip(results)
            .map(|(scanner, result)| ChainScanOutcome {
                chain: scanner.chain(),
                outcome: match result {
                    Ok(report) => PhaseOutcome::Completed(report.summary),
                    Err(e) => {
                        warn!(chain = %scanner.chain(), error = %e, "Chain scan failed");
                        PhaseOutcome::Failed { error: format!("{e:#}") }
                    }
                },
            })
            .collect()
    }

    /// Execute, then persist any safe-mode trip the engine returned.
    async fn execute_and_persist(
        &self,
        runs: &[Run],
        settings: &mut GlobalSettings,
    ) -> Result<ExecutionResult> {
        let result = self.executor.execute(&self.store, runs, settings, Utc::now()).await?;
        if let Some(trip) = &result.safe_mode_trip {
            self.store.trip_safe_mode(trip).await?;
            settings.apply_trip(trip);
            warn!(reason = %trip.reason, "Safe mode enabled");
        }
        Ok(result)
    }

    // ----- Diagnostic phases -----

    /// Scan every chain into a fresh batch.
    pub async fn scan_only(&self) -> Result<Vec<ChainScanOutcome>> {
        self.acquire_for_diagnostic().await?;
        let batch_id = format!("diag-{}", uuid::Uuid::new_v4());
        let outcome = self.scan_all(&batch_id).await;
        self.release().await;
        info!(batch_id, chains = outcome.len(), "Diagnostic scan complete");
        Ok(outcome)
    }

    /// Decide over the most recent scan batch.
    pub async fn decide_only(&self) -> Result<DecisionResult> {
        self.acquire_for_diagnostic().await?;
        let result = self.decide_latest().await;
        self.release().await;
        result
    }

    async fn decide_latest(&self) -> Result<DecisionResult> {
        let settings = self.store.settings().await?;
        let Some(batch_id) = self.store.latest_batch_id().await? else {
            return Ok(DecisionResult::default());
        };
        let runs = self.store.runs_for_batch(&batch_id).await?;
        decision::decide(&self.store, &runs, &settings, Utc::now()).await
    }

    /// Execute the approved runs of the most recent scan batch.
    pub async fn execute_only(&self) -> Result<ExecutionResult> {
        self.acquire_for_diagnostic().await?;
        let result = self.execute_latest().await;
        self.release().await;
        result
    }

    async fn execute_latest(&self) -> Result<ExecutionResult> {
        let mut settings = self.store.settings().await?;
        let Some(batch_id) = self.store.latest_batch_id().await? else {
            return Ok(ExecutionResult::default());
        };
        let runs = self.store.approved_runs(&batch_id).await?;
        self.execute_and_persist(&runs, &mut settings).await
    }

    pub async fn check_wallets(&self) -> Result<WalletCheckResult> {
        self.acquire_for_diagnostic().await?;
        let result = wallets::check_wallets(&self.store, self.executor.chains(), Utc::now()).await;
        self.release().await;
        result
    }

    // ----- Operator actions -----

    /// Clear safe mode. Only an operator may do this; no phase ever does.
    pub async fn clear_safe_mode(&self) -> Result<bool> {
        let cleared = self.store.clear_safe_mode().await?;
        if cleared {
            info!("Safe mode cleared by operator");
        }
        Ok(cleared)
    }

    /// Flip the master switch. A disabled switch makes every cycle SKIPPED.
    pub async fn set_auto_arbitrage(&self, enabled: bool) -> Result<GlobalSettings> {
        self.store.set_auto_arbitrage(enabled).await?;
        info!(enabled, "Auto-arbitrage switch updated by operator");
        self.store.settings().await
    }

    pub async fn set_global_limits(&self, max_daily_loss: Decimal, max_trades: u32) -> Result<GlobalSettings> {
        if max_daily_loss < Decimal::ZERO {
            return Err(FerryError::Config("max global daily loss must not be negative".into()).into());
        }
        self.store.set_global_limits(max_daily_loss, max_trades).await?;
        info!(%max_daily_loss, max_trades, "Global limits updated by operator");
        self.store.settings().await
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        let now = Utc::now();
        let date = now.date_naive();
        Ok(StatusSnapshot {
            settings: self.store.settings().await?,
            lease_holder: self.store.lease_holder(CYCLE_LEASE, now).await?,
            last_cycle: self.store.recent_cycle_logs(1).await?.into_iter().next(),
            date,
            global_daily_loss: self.store.global_daily_loss(date).await?,
            global_daily_trades: self.store.global_daily_trades(date).await?,
            counters: self.store.counters_for_date(date).await?,
            pending_refills: self.store.refill_requests(true, 50).await?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainClient, ChainClients, ExecutionReceipt, KeyStore, MockChainClient, MockKeyStore, Signer};
    use crate::engine::retry::RetryPolicy;
    use crate::engine::scanner::ScanSettings;
    use crate::quotes::{Quote, QuoteError, QuoteProvider, QuoteRequest};
    use crate::types::tests::sample_strategy;
    use crate::types::{Chain, CycleStatus, Network, RunStatus};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use secrecy::SecretString;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Every leg returns 1.01x its input: a reliably profitable round trip.
    struct Gaining;

    #[async_trait]
    impl QuoteProvider for Gaining {
        async fn get_quote(&self, req: &QuoteRequest) -> Result<Quote, QuoteError> {
            Ok(Quote {
                sell_token: req.sell_token.clone(),
                buy_token: req.buy_token.clone(),
                sell_amount: req.sell_amount,
                buy_amount: req.sell_amount * 101 / 100,
                gas_native: dec!(0.001),
                sources: req.source.iter().cloned().collect(),
            })
        }
        fn chain(&self) -> Chain {
            Chain::Solana
        }
        fn name(&self) -> &str {
            "gaining"
        }
    }

    fn settings(enabled: bool) -> GlobalSettings {
        GlobalSettings {
            auto_arbitrage_enabled: enabled,
            safe_mode_enabled: false,
            safe_mode_triggered_at: None,
            safe_mode_reason: None,
            max_global_daily_loss: dec!(1000),
            max_global_trades_per_day: 100,
        }
    }

    fn scan_settings() -> ScanSettings {
        ScanSettings {
            inter_quote_delay: Duration::ZERO,
            batch_pause: Duration::ZERO,
            shuffle_seed: Some(7),
            ..ScanSettings::default()
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            delays: vec![Duration::ZERO],
            rate_limit_cooldown: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    fn orchestrator(store: Store, client: MockChainClient) -> CycleOrchestrator {
        let scanner = OpportunityScanner::new(
            Arc::new(Gaining),
            scan_settings(),
            policy(),
            Network::Mainnet,
            Vec::new(),
            dec!(100),
        );
        let chains: ChainClients = vec![Arc::new(client) as Arc<dyn ChainClient>].into_iter().collect();
        let mut keys = MockKeyStore::new();
        keys.expect_signer_for().returning(|label| {
            Ok(Signer {
                label: label.to_string(),
                address: "FeePayer111".into(),
                secret: SecretString::new("k".into()),
            })
        });
        let executor = ExecutionEngine::new(
            chains,
            Arc::new(keys) as Arc<dyn KeyStore>,
            HashMap::from([(Chain::Solana, "sol-fee-payer".to_string())]),
        );
        CycleOrchestrator::new(store, vec![scanner], executor, Duration::from_secs(30))
    }

    fn executing_client(profit: Decimal) -> MockChainClient {
        let mut client = MockChainClient::new();
        client.expect_chain().return_const(Chain::Solana);
        client.expect_execute().returning(move |run, _| {
            Ok(ExecutionReceipt {
                tx_reference: format!("tx-{}", run.id),
                actual_profit: profit,
            })
        });
        client.expect_balance().returning(|_| Ok(dec!(10)));
        client
    }

    async fn seeded_store(enabled: bool) -> Store {
        let store = Store::in_memory().await.unwrap();
        store.seed_settings(&settings(enabled)).await.unwrap();
        store.upsert_strategy(&sample_strategy("s1")).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_full_cycle_succeeds() {
        let store = seeded_store(true).await;
        let orch = orchestrator(store.clone(), executing_client(dec!(5)));

        let log = orch.run_cycle(TriggerType::Manual).await.unwrap();
        assert_eq!(log.overall_status, CycleStatus::Success);
        assert_eq!(log.scan.len(), 1);

        let decision = log.decision.as_ref().and_then(|d| d.completed()).unwrap();
        assert!(decision.approved > 0);
        let execution = log.execution.as_ref().and_then(|e| e.completed()).unwrap();
        assert_eq!(execution.executed, decision.approved);

        let stored = store.cycle_log(&log.id).await.unwrap().unwrap();
        assert_eq!(stored.overall_status, CycleStatus::Success);
        assert_eq!(stored.decision, log.decision);
        assert!(store.lease_holder(CYCLE_LEASE, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_operator_switch_disables_next_cycle() {
        let store = seeded_store(true).await;
        let mut client = MockChainClient::new();
        client.expect_chain().return_const(Chain::Solana);
        client.expect_execute().never();
        client.expect_balance().never();
        let orch = orchestrator(store.clone(), client);

        let updated = orch.set_auto_arbitrage(false).await.unwrap();
        assert!(!updated.auto_arbitrage_enabled);
        let log = orch.run_cycle(TriggerType::Cron).await.unwrap();
        assert_eq!(log.overall_status, CycleStatus::Skipped);

        assert!(orch.set_global_limits(dec!(-1), 10).await.is_err());
        let limits = orch.set_global_limits(dec!(50), 10).await.unwrap();
        assert_eq!(limits.max_global_daily_loss, dec!(50));
    }

    #[tokio::test]
    async fn test_disabled_cycle_is_skipped() {
        let store = seeded_store(false).await;
        let mut client = MockChainClient::new();
        client.expect_chain().return_const(Chain::Solana);
        client.expect_execute().never();
        client.expect_balance().never();
        let orch = orchestrator(store.clone(), client);

        let log = orch.run_cycle(TriggerType::Cron).await.unwrap();
        assert_eq!(log.overall_status, CycleStatus::Skipped);
        assert!(log.scan.is_empty());
        assert!(store.latest_batch_id().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_held_lease_skips_cycle_and_blocks_diagnostics() {
        let store = seeded_store(true).await;
        let now = Utc::now();
        assert!(store
            .try_acquire_lease(CYCLE_LEASE, "other", now, chrono::Duration::minutes(5))
            .await
            .unwrap());

        let orch = orchestrator(store.clone(), executing_client(dec!(5)));
        let log = orch.run_cycle(TriggerType::Cron).await.unwrap();
        assert_eq!(log.overall_status, CycleStatus::Skipped);
        assert_eq!(log.error_message.as_deref(), Some("cycle lease held"));

        let err = orch.decide_only().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FerryError>(),
            Some(FerryError::LeaseHeld { holder }) if holder == "other"
        ));
    }

    #[tokio::test]
    async fn test_loss_trips_safe_mode_and_persists() {
        let store = seeded_store(true).await;
        let orch = orchestrator(store.clone(), executing_client(dec!(-1200)));

        let log = orch.run_cycle(TriggerType::Manual).await.unwrap();
        let execution = log.execution.as_ref().and_then(|e| e.completed()).unwrap();
        assert!(execution.safe_mode_trip.is_some());
        assert_eq!(execution.executed, 1);

        let settings = store.settings().await.unwrap();
        assert!(settings.safe_mode_enabled);
        assert!(settings.safe_mode_reason.unwrap().contains("1200"));

        assert!(orch.clear_safe_mode().await.unwrap());
        assert!(!store.settings().await.unwrap().safe_mode_enabled);
    }

    #[tokio::test]
    async fn test_diagnostics_work_on_latest_batch() {
        let store = seeded_store(true).await;
        let orch = orchestrator(store.clone(), executing_client(dec!(5)));

        let scans = orch.scan_only().await.unwrap();
        assert_eq!(scans.len(), 1);

        let decision = orch.decide_only().await.unwrap();
        assert!(decision.approved > 0);

        let execution = orch.execute_only().await.unwrap();
        assert_eq!(execution.executed, decision.approved);

        let batch = store.latest_batch_id().await.unwrap().unwrap();
        let runs = store.runs_for_batch(&batch).await.unwrap();
        assert_eq!(
            runs.iter().filter(|r| r.status == RunStatus::Executed).count(),
            decision.approved
        );
    }

    #[tokio::test]
    async fn test_abandoned_running_log_is_failed() {
        let store = seeded_store(true).await;
        let stale = AutomationCycleLog::start(TriggerType::Cron, Utc::now());
        store.insert_cycle_log(&stale).await.unwrap();

        let orch = orchestrator(store.clone(), executing_client(dec!(5)));
        orch.run_cycle(TriggerType::Cron).await.unwrap();

        let closed = store.cycle_log(&stale.id).await.unwrap().unwrap();
        assert_eq!(closed.overall_status, CycleStatus::Failed);
    }
}
