//! Opportunity scanner.
//!
//! For every enabled strategy on this scanner's chain, enumerates venue
//! combinations (two-leg source matrix or three-leg triangular), quotes
//! each leg in sequence through a `QuoteSession`, and persists one
//! SIMULATED run per attempted combination, profitable or not.
//!
//! Pacing: an inter-quote delay before every remote call except the first,
//! and a longer pause after every `batch_size` combinations. The
//! rate-limit breaker spans the whole chain scan; once it opens, the
//! remaining combinations (of every strategy) are abandoned.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::retry::{QuoteSession, RetryPolicy};
use crate::quotes::{QuoteProvider, QuoteRequest};
use crate::storage::Store;
use crate::types::{
    Chain, Network, OpportunitySummary, Run, ScanMode, ScanSummary, ScanVerdict, Strategy,
};

// ---------------------------------------------------------------------------
// Settings & report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    /// Upper bound on combinations per strategy, applied after shuffling.
    pub max_combinations: usize,
    pub inter_quote_delay: Duration,
    pub batch_size: usize,
    pub batch_pause: Duration,
    /// Slippage buffer in basis points of notional.
    pub slippage_bps: u32,
    /// Opportunities kept in the scan summary.
    pub top_opportunities: usize,
    /// Fixed shuffle seed; `None` shuffles from entropy.
    pub shuffle_seed: Option<u64>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_combinations: 12,
            inter_quote_delay: Duration::from_millis(1_500),
            batch_size: 2,
            batch_pause: Duration::from_millis(5_000),
            slippage_bps: 30,
            top_opportunities: 5,
            shuffle_seed: None,
        }
    }
}

/// Result of one chain's scan. `runs` are sorted by net profit, best first.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub summary: ScanSummary,
    pub runs: Vec<Run>,
}

// ---------------------------------------------------------------------------
// Amount helpers
// ---------------------------------------------------------------------------

/// Whole token units → integer base units (truncating).
pub(crate) fn to_base_units(amount: Decimal, decimals: u32) -> Option<u128> {
    let scale = Decimal::from(10u64.checked_pow(decimals)?);
    amount.checked_mul(scale)?.trunc().to_u128()
}

/// Integer base units → whole token units.
pub(crate) fn from_base_units(units: u128, decimals: u32) -> Option<Decimal> {
    let units = i128::try_from(units).ok()?;
    Decimal::try_from_i128_with_scale(units, decimals).ok()
}

/// Ordered venue tuples for one round trip. Every leg of a tuple runs on a
/// different venue: pairs for the source matrix, triples for triangular.
/// Fewer venues than legs yields nothing.
pub fn enumerate_combinations(venues: &[String], mode: ScanMode) -> Vec<Vec<String>> {
    let mut combos = Vec::new();
    match mode {
        ScanMode::SourceMatrix => {
            for x in venues {
                for y in venues.iter().filter(|y| *y != x) {
                    combos.push(vec![x.clone(), y.clone()]);
                }
            }
        }
        ScanMode::Triangular => {
            for x in venues {
                for y in venues.iter().filter(|y| *y != x) {
                    for z in venues.iter().filter(|z| *z != x && *z != y) {
                        combos.push(vec![x.clone(), y.clone(), z.clone()]);
                    }
                }
            }
        }
    }
    combos
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct OpportunityScanner {
    provider: Arc<dyn QuoteProvider>,
    settings: ScanSettings,
    policy: RetryPolicy,
    network: Network,
    /// Venues configured for the chain, merged with each strategy's pair.
    venues: Vec<String>,
    /// Price of one native fee token in strategy `token_in` units.
    gas_reference_price: Decimal,
}

impl OpportunityScanner {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        settings: ScanSettings,
        policy: RetryPolicy,
        network: Network,
        venues: Vec<String>,
        gas_reference_price: Decimal,
    ) -> Self {
        Self {
            provider,
            settings,
            policy,
            network,
            venues,
            gas_reference_price,
        }
    }

    pub fn chain(&self) -> Chain {
        self.provider.chain()
    }

    fn venue_set(&self, strategy: &Strategy) -> Vec<String> {
        let mut set: Vec<String> = Vec::new();
        for v in strategy.venues().into_iter().chain(self.venues.iter().cloned()) {
            if !set.contains(&v) {
                set.push(v);
            }
        }
        set
    }

    fn slippage_buffer(&self, notional: Decimal) -> Decimal {
        notional * Decimal::from(self.settings.slippage_bps) / Decimal::from(10_000u32)
    }

    /// Scan every eligible strategy and persist one run per combination.
    pub async fn scan(&self, strategies: &[Strategy], batch_id: &str, store: &Store) -> Result<ScanReport> {
        let chain = self.chain();
        let eligible: Vec<&Strategy> = strategies
            .iter()
            .filter(|s| s.is_enabled && s.chain == chain && s.network == self.network)
            .collect();

        info!(
            chain = %chain,
            provider = self.provider.name(),
            strategies = eligible.len(),
            batch_id,
            "Starting chain scan"
        );

        let mut rng = match self.settings.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut session = QuoteSession::new(self.provider.as_ref(), &self.policy);
        let mut summary = ScanSummary::default();
        let mut runs: Vec<Run> = Vec::new();
        let mut pacer = Pacer::new(&self.settings);

        'strategies: for strategy in eligible {
            let hops = strategy.token_path().len() - 1;
            if hops != strategy.scan_mode.legs() {
                warn!(
                    strategy_id = %strategy.id,
                    scan_mode = strategy.scan_mode.as_str(),
                    hops,
                    "Token path does not match scan mode, skipping"
                );
                continue;
            }

            let Some(sell_amount) = to_base_units(strategy.notional, strategy.token_in_decimals)
            else {
                warn!(strategy_id = %strategy.id, notional = %strategy.notional, "Notional does not fit base units, skipping");
                continue;
            };

            let mut combos = enumerate_combinations(&self.venue_set(strategy), strategy.scan_mode);
            combos.shuffle(&mut rng);
            combos.truncate(self.settings.max_combinations);
            summary.strategies_scanned += 1;

            debug!(strategy_id = %strategy.id, combinations = combos.len(), "Enumerated combinations");

            for combo in combos {
                if session.aborted() {
                    break 'strategies;
                }

                pacer.before_combination().await;

                let run = self
                    .evaluate(strategy, &combo, sell_amount, batch_id, &mut session, &mut pacer)
                    .await;
                store.insert_run(&run).await?;

                summary.combinations_attempted += 1;
                match run.verdict {
                    ScanVerdict::Profitable => summary.profitable += 1,
                    ScanVerdict::NotProfitable => summary.not_profitable += 1,
                    ScanVerdict::Failed => summary.failed += 1,
                }
                runs.push(run);
            }
        }

        summary.quote_calls = session.calls();
        summary.rate_limited_responses = session.rate_limited();
        summary.aborted_due_to_rate_limit = session.aborted();

        runs.sort_by(|a, b| b.estimated_profit.cmp(&a.estimated_profit));
        summary.top_opportunities = runs
            .iter()
            .filter(|r| r.verdict == ScanVerdict::Profitable)
            .take(self.settings.top_opportunities)
            .map(|r| OpportunitySummary {
                run_id: r.id.clone(),
                strategy_id: r.strategy_id.clone(),
                source_path: r.source_path.clone(),
                net_profit: r.estimated_profit,
            })
            .collect();

        if summary.aborted_due_to_rate_limit {
            warn!(
                chain = %chain,
                rate_limited = summary.rate_limited_responses,
                attempted = summary.combinations_attempted,
                "Scan aborted: rate-limit budget exhausted"
            );
        }
        info!(
            chain = %chain,
            attempted = summary.combinations_attempted,
            profitable = summary.profitable,
            failed = summary.failed,
            quote_calls = summary.quote_calls,
            "Chain scan complete"
        );

        Ok(ScanReport { summary, runs })
    }

    /// Quote every leg of one combination and price the round trip.
    async fn evaluate(
        &self,
        strategy: &Strategy,
        combo: &[String],
        sell_amount: u128,
        batch_id: &str,
        session: &mut QuoteSession<'_>,
        pacer: &mut Pacer,
    ) -> Run {
        let mut run = Run::simulated(strategy, batch_id, Utc::now());
        run.source_path = combo.to_vec();

        let path = run.token_path.clone();
        let mut amount = sell_amount;
        let mut gas_native = Decimal::ZERO;

        for (leg, (venue, hop)) in combo.iter().zip(path.windows(2)).enumerate() {
            pacer.before_quote().await;

            let request = QuoteRequest {
                network: strategy.network,
                sell_token: hop[0].clone(),
                buy_token: hop[1].clone(),
                sell_amount: amount,
                source: Some(venue.clone()),
                direct_only: true,
            };

            match session.quote(&request).await {
                Ok(quote) => {
                    amount = quote.buy_amount;
                    gas_native += quote.gas_native;
                }
                Err(e) => {
                    debug!(
                        strategy_id = %strategy.id,
                        leg = leg + 1,
                        venue = %venue,
                        error = %e,
                        "Leg quote failed"
                    );
                    run.verdict = ScanVerdict::Failed;
                    run.error_message = Some(format!("leg {} ({venue}) failed: {e}", leg + 1));
                    return run;
                }
            }
        }

        let Some(final_output) = from_base_units(amount, strategy.token_in_decimals) else {
            run.verdict = ScanVerdict::Failed;
            run.error_message = Some(format!("final output {amount} does not fit a decimal"));
            return run;
        };

        let gas_cost = gas_native * self.gas_reference_price;
        let net = final_output - strategy.notional - self.slippage_buffer(strategy.notional) - gas_cost;

        run.final_output = Some(final_output);
        run.estimated_gas_cost = gas_cost;
        run.estimated_profit = net;
        run.verdict = if net > Decimal::ZERO {
            ScanVerdict::Profitable
        } else {
            ScanVerdict::NotProfitable
        };
        run
    }
}

/// Pacing state for one chain scan.
struct Pacer {
    inter_quote_delay: Duration,
    batch_size: usize,
    batch_pause: Duration,
    quotes: usize,
    combinations: usize,
}

impl Pacer {
    fn new(settings: &ScanSettings) -> Self {
        Self {
            inter_quote_delay: settings.inter_quote_delay,
            batch_size: settings.batch_size,
            batch_pause: settings.batch_pause,
            quotes: 0,
            combinations: 0,
        }
    }

    /// Pauses once every `batch_size` combinations, never before the first.
    async fn before_combination(&mut self) {
        if self.combinations > 0 && self.batch_size > 0 && self.combinations % self.batch_size == 0 {
            pause(self.batch_pause).await;
        }
        self.combinations += 1;
    }

    /// Spaces every remote quote after the first of the scan.
    async fn before_quote(&mut self) {
        if self.quotes > 0 {
            pause(self.inter_quote_delay).await;
        }
        self.quotes += 1;
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
