//! End-to-end cycles over an in-memory store and scripted collaborators.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use ferry::chain::ChainError;
use ferry::quotes::QuoteError;
use ferry::storage::{Store, CYCLE_LEASE};
use ferry::types::{
    Chain, CycleStatus, FeePayerWallet, GlobalSettings, Network, PhaseOutcome, RefillReason, Run,
    RunStatus, ScanMode, ScanVerdict, Strategy, StrategyPurpose, TriggerType, WalletHealth,
    WalletType,
};

use crate::mocks::{orchestrator, ScriptedChain, ScriptedQuotes};

fn settings(enabled: bool, max_loss: Decimal) -> GlobalSettings {
    GlobalSettings {
        auto_arbitrage_enabled: enabled,
        safe_mode_enabled: false,
        safe_mode_triggered_at: None,
        safe_mode_reason: None,
        max_global_daily_loss: max_loss,
        max_global_trades_per_day: 1_000,
    }
}

fn strategy(id: &str) -> Strategy {
    Strategy {
        id: id.to_string(),
        name: format!("USDC/SOL {id}"),
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
        max_daily_loss: dec!(5000),
        max_trades_per_day: 50,
        max_trade_value: None,
    }
}

/// USDC → SOL at 1/100, SOL → USDC at 102: +2% per round trip.
fn profitable_quotes() -> Arc<ScriptedQuotes> {
    Arc::new(
        ScriptedQuotes::new(Chain::Solana, dec!(0.001))
            .with_rate("USDC", "SOL", 1, 100)
            .with_rate("SOL", "USDC", 102, 1),
    )
}

async fn store_with(settings: GlobalSettings, strategies: &[Strategy]) -> Store {
    let store = Store::in_memory().await.unwrap();
    store.seed_settings(&settings).await.unwrap();
    for s in strategies {
        store.upsert_strategy(s).await.unwrap();
    }
    store
}

#[tokio::test]
async fn test_disabled_cycle_touches_nothing() {
    let store = store_with(settings(false, dec!(1000)), &[strategy("s1")]).await;
    let quotes = profitable_quotes();
    let chain = Arc::new(ScriptedChain::new(Chain::Solana));
    let orch = orchestrator(store.clone(), quotes.clone(), chain.clone(), &[], dec!(100));

    let log = orch.run_cycle(TriggerType::Cron).await.unwrap();
    assert_eq!(log.overall_status, CycleStatus::Skipped);
    assert!(log.scan.is_empty());
    assert!(log.decision.is_none());
    assert_eq!(quotes.calls(), 0);
    assert!(chain.executed().is_empty());

    let logs = store.recent_cycle_logs(10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].overall_status, CycleStatus::Skipped);
}

#[tokio::test]
async fn test_overlapping_trigger_is_skipped_not_queued() {
    let store = store_with(settings(true, dec!(1000)), &[strategy("s1")]).await;
    store
        .try_acquire_lease(CYCLE_LEASE, "cron-worker", Utc::now(), chrono::Duration::minutes(5))
        .await
        .unwrap();

    let quotes = profitable_quotes();
    let orch = orchestrator(
        store.clone(),
        quotes.clone(),
        Arc::new(ScriptedChain::new(Chain::Solana)),
        &[],
        dec!(100),
    );

    let log = orch.run_cycle(TriggerType::Manual).await.unwrap();
    assert_eq!(log.overall_status, CycleStatus::Skipped);
    assert_eq!(quotes.calls(), 0);
    assert_eq!(
        store.lease_holder(CYCLE_LEASE, Utc::now()).await.unwrap().as_deref(),
        Some("cron-worker")
    );
}

#[tokio::test]
async fn test_full_cycle_executes_and_records_everything() {
    let store = store_with(settings(true, dec!(1000)), &[strategy("s1")]).await;
    let quotes = profitable_quotes();
    let chain = Arc::new(ScriptedChain::new(Chain::Solana).with_balance("fee-payer-1", dec!(0.5)));
    store
        .upsert_wallet(&FeePayerWallet {
            label: "solana-fee-payer".into(),
            wallet_type: WalletType::FeePayer,
            chain: Chain::Solana,
            address: "fee-payer-1".into(),
            low_threshold: dec!(1),
            critical_threshold: dec!(0.1),
            is_active: true,
            last_balance: None,
            last_health: None,
            last_checked_at: None,
        })
        .await
        .unwrap();
    let orch = orchestrator(store.clone(), quotes.clone(), chain.clone(), &[], dec!(100));

    let log = orch.run_cycle(TriggerType::Cron).await.unwrap();
    assert_eq!(log.overall_status, CycleStatus::Success);

    // Raydium→Orca and Orca→Raydium, two legs each
    let scan = match &log.scan[0].outcome {
        PhaseOutcome::Completed(s) => s.clone(),
        other => panic!("scan did not complete: {other:?}"),
    };
    assert_eq!(scan.combinations_attempted, 2);
    assert_eq!(scan.profitable, 2);
    assert_eq!(quotes.calls(), 4);

    let runs = store.runs_for_batch(&log.id).await.unwrap();
    assert_eq!(runs.len(), 2);
    // 1020 - 1000 - 3 slippage - 0.2 gas
    assert!(runs.iter().all(|r| r.estimated_profit == dec!(16.8)));
    assert!(runs.iter().all(|r| r.status == RunStatus::Executed));
    assert_eq!(chain.executed().len(), 2);

    let wallets = log.wallet_check.as_ref().and_then(|w| w.completed()).unwrap();
    assert_eq!(wallets.low, 1);
    assert_eq!(wallets.requests_created, 1);
    let refills = store.refill_requests(true, 10).await.unwrap();
    assert_eq!(refills[0].reason, RefillReason::LowBalance);
    let stored = store.wallets().await.unwrap();
    assert_eq!(stored[0].last_health, Some(WalletHealth::Low));
}

#[tokio::test]
async fn test_triangular_round_trip_has_exact_net() {
    let mut tri = strategy("tri");
    tri.scan_mode = ScanMode::Triangular;
    tri.token_via = Some("BONK".to_string());
    let store = store_with(settings(true, dec!(1000)), &[tri]).await;

    // 1000 USDC → 10 SOL → 500 BONK-units → 1020 USDC on every venue
    let quotes = Arc::new(
        ScriptedQuotes::new(Chain::Solana, dec!(0.001))
            .with_rate("USDC", "SOL", 1, 100)
            .with_rate("SOL", "BONK", 50, 1)
            .with_rate("BONK", "USDC", 102, 50),
    );
    let orch = orchestrator(
        store.clone(),
        quotes.clone(),
        Arc::new(ScriptedChain::new(Chain::Solana)),
        &["Meteora"],
        dec!(100),
    );

    let scans = orch.scan_only().await.unwrap();
    assert_eq!(scans.len(), 1);

    // Raydium, Orca and Meteora give 3! orderings of distinct venues
    let batch = store.latest_batch_id().await.unwrap().unwrap();
    let runs = store.runs_for_batch(&batch).await.unwrap();
    assert_eq!(runs.len(), 6);

    for run in &runs {
        assert_eq!(run.token_path, vec!["USDC", "SOL", "BONK", "USDC"]);
        assert_eq!(run.source_path.len(), 3);
        assert_ne!(run.source_path[0], run.source_path[1]);
        assert_ne!(run.source_path[1], run.source_path[2]);
        assert_ne!(run.source_path[0], run.source_path[2]);
        assert_eq!(run.final_output, Some(dec!(1020)));
        // leg3 output - notional - 30bps slippage - 3 legs of 0.001 gas at 100
        assert_eq!(run.estimated_profit, dec!(1020) - dec!(1000) - dec!(3) - dec!(0.3));
        assert_eq!(run.verdict, ScanVerdict::Profitable);
    }
    assert_eq!(quotes.calls(), 18);
}

#[tokio::test]
async fn test_rate_limit_budget_stops_quote_calls() {
    let store = store_with(settings(true, dec!(1000)), &[strategy("s1"), strategy("s2")]).await;
    let quotes = profitable_quotes();
    quotes.set_error(QuoteError::RateLimited("HTTP 429".into()));
    let chain = Arc::new(ScriptedChain::new(Chain::Solana));
    let orch = orchestrator(
        store.clone(),
        quotes.clone(),
        chain.clone(),
        &["Meteora", "Phoenix"],
        dec!(100),
    );

    let log = orch.run_cycle(TriggerType::Cron).await.unwrap();
    let scan = log.scan[0].outcome.completed().unwrap().clone();
    assert!(scan.aborted_due_to_rate_limit);
    assert_eq!(scan.rate_limited_responses, 2);
    assert_eq!(quotes.calls(), 2);

    // the cycle still went on to decide and check wallets
    assert_eq!(log.overall_status, CycleStatus::Success);
    let decision = log.decision.as_ref().and_then(|d| d.completed()).unwrap();
    assert_eq!(decision.approved, 0);
    assert!(matches!(log.execution, Some(PhaseOutcome::Skipped { .. })));
    assert!(chain.executed().is_empty());

    // a later scan does not inherit the tripped breaker, but the provider
    // keeps throttling so it trips again after the same budget
    orch.scan_only().await.unwrap();
    assert_eq!(quotes.calls(), 4);
}

#[tokio::test]
async fn test_daily_trade_limit_blocks_approvals() {
    let mut capped = strategy("capped");
    capped.max_trades_per_day = 5;
    let store = store_with(settings(true, dec!(1000)), &[capped.clone()]).await;

    // five earlier trades today, settled through the normal path
    let today = Utc::now().date_naive();
    for i in 0..5 {
        let mut earlier = Run::simulated(&capped, "earlier", Utc::now());
        store.insert_run(&earlier).await.unwrap();
        earlier
            .settle_executed(dec!(2), format!("tx-earlier-{i}"), Utc::now())
            .unwrap();
        store.settle_run_and_record(&earlier, today).await.unwrap().unwrap();
    }

    let chain = Arc::new(ScriptedChain::new(Chain::Solana));
    let orch = orchestrator(store.clone(), profitable_quotes(), chain.clone(), &[], dec!(100));

    let log = orch.run_cycle(TriggerType::Cron).await.unwrap();
    let decision = log.decision.as_ref().and_then(|d| d.completed()).unwrap();
    assert_eq!(decision.evaluated, 2);
    assert_eq!(decision.approved, 0);
    assert_eq!(decision.rejected.get("daily_trade_limit"), Some(&2));
    assert!(matches!(log.execution, Some(PhaseOutcome::Skipped { .. })));
    assert!(chain.executed().is_empty());
}

#[tokio::test]
async fn test_global_loss_breach_trips_safe_mode() {
    let store = store_with(settings(true, dec!(1000)), &[strategy("s1")]).await;
    let chain = Arc::new(ScriptedChain::new(Chain::Solana).with_outcomes(vec![Ok(dec!(-1200))]));
    let orch = orchestrator(store.clone(), profitable_quotes(), chain.clone(), &[], dec!(100));

    let log = orch.run_cycle(TriggerType::Cron).await.unwrap();
    let execution = log.execution.as_ref().and_then(|e| e.completed()).unwrap();
    assert_eq!(execution.executed, 1);
    assert_eq!(chain.executed().len(), 1, "execution halts after the breach");

    let trip = execution.safe_mode_trip.as_ref().unwrap();
    assert_eq!(trip.global_loss, dec!(1200));

    let g = store.settings().await.unwrap();
    assert!(g.safe_mode_enabled);
    assert!(g.safe_mode_triggered_at.is_some());
    assert!(g.safe_mode_reason.as_deref().unwrap().contains("1200"));

    // the untouched profitable run is still decidable, and safe mode vetoes it
    let decision = orch.decide_only().await.unwrap();
    assert_eq!(decision.evaluated, 1);
    assert_eq!(decision.approved, 0);
    assert_eq!(decision.rejected.get("safe_mode"), Some(&1));

    // nothing executes until an operator clears it
    let execution = orch.execute_only().await.unwrap();
    assert!(execution.skipped_safe_mode || execution.attempted == 0);
    assert_eq!(chain.executed().len(), 1);
}

#[tokio::test]
async fn test_counter_loss_matches_executed_losses() {
    let store = store_with(settings(true, dec!(10000)), &[strategy("s1")]).await;
    let chain = Arc::new(ScriptedChain::new(Chain::Solana).with_outcomes(vec![
        Ok(dec!(-3)),
        Ok(dec!(5)),
        Err(ChainError::Rejected("slippage exceeded".into())),
        Ok(dec!(-2.5)),
    ]));
    let orch = orchestrator(
        store.clone(),
        profitable_quotes(),
        chain.clone(),
        &["Meteora"],
        dec!(100),
    );

    let log = orch.run_cycle(TriggerType::Cron).await.unwrap();
    let execution = log.execution.as_ref().and_then(|e| e.completed()).unwrap();
    assert_eq!(execution.attempted, 6);
    assert_eq!(execution.failed, 1);
    assert_eq!(execution.executed, 5);

    let runs = store.runs_for_batch(&log.id).await.unwrap();
    let expected_loss: Decimal = runs
        .iter()
        .filter(|r| r.status == RunStatus::Executed)
        .filter_map(|r| r.actual_profit)
        .filter(|p| *p < Decimal::ZERO)
        .map(|p| -p)
        .sum();
    assert_eq!(expected_loss, dec!(5.5));

    let counter = store
        .counter("s1", Utc::now().date_naive(), Chain::Solana)
        .await
        .unwrap();
    assert_eq!(counter.total_loss, expected_loss);
    assert_eq!(counter.total_trades, 6);

    let failed = runs.iter().find(|r| r.status == RunStatus::Failed).unwrap();
    assert!(failed.error_message.as_deref().unwrap().contains("slippage exceeded"));
}

#[tokio::test]
async fn test_terminal_runs_are_not_rewritten() {
    let store = store_with(settings(true, dec!(1000)), &[strategy("s1")]).await;
    let chain = Arc::new(ScriptedChain::new(Chain::Solana));
    let orch = orchestrator(store.clone(), profitable_quotes(), chain.clone(), &[], dec!(100));

    let log = orch.run_cycle(TriggerType::Cron).await.unwrap();
    let mut run = store.runs_for_batch(&log.id).await.unwrap().remove(0);
    assert_eq!(run.status, RunStatus::Executed);

    // the store refuses the overwrite even if the in-memory guard is bypassed
    run.status = RunStatus::Simulated;
    run.settle_failed("late failure".into(), Utc::now()).unwrap();
    let today = Utc::now().date_naive();
    assert!(store.settle_run_and_record(&run, today).await.unwrap().is_none());
    assert!(!store.set_approval(&run.id, false).await.unwrap());

    let stored = store.run(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Executed);
    assert!(stored.error_message.is_none());

    // executing the same batch again submits nothing
    let again = orch.execute_only().await.unwrap();
    assert_eq!(again.attempted, 0);
    assert_eq!(chain.executed().len(), 2);
}
