//! Scripted collaborators for integration testing.
//!
//! Deterministic quote provider, chain client and key store, all
//! in-memory with no external dependencies. Behaviour is controllable
//! from test code and every call is counted.

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::SecretString;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferry::chain::{ChainClient, ChainClients, ChainError, ExecutionReceipt, KeyStore, Signer};
use ferry::engine::executor::ExecutionEngine;
use ferry::engine::orchestrator::CycleOrchestrator;
use ferry::engine::retry::RetryPolicy;
use ferry::engine::scanner::{OpportunityScanner, ScanSettings};
use ferry::quotes::{Quote, QuoteError, QuoteProvider, QuoteRequest};
use ferry::storage::Store;
use ferry::types::{Chain, Network, Run};

// ---------------------------------------------------------------------------
// Quote provider
// ---------------------------------------------------------------------------

/// Quotes each (sell, buy) pair at a fixed ratio of the sell amount.
pub struct ScriptedQuotes {
    chain: Chain,
    ratios: HashMap<(String, String), (u128, u128)>,
    gas_native: Decimal,
    /// If set, every call fails with this error.
    force_error: Mutex<Option<QuoteError>>,
    calls: AtomicUsize,
}

impl ScriptedQuotes {
    pub fn new(chain: Chain, gas_native: Decimal) -> Self {
        Self {
            chain,
            ratios: HashMap::new(),
            gas_native,
            force_error: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// `buy = sell * num / den` for this pair.
    pub fn with_rate(mut self, sell: &str, buy: &str, num: u128, den: u128) -> Self {
        self.ratios.insert((sell.to_string(), buy.to_string()), (num, den));
        self
    }

    pub fn set_error(&self, err: QuoteError) {
        *self.force_error.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteProvider for ScriptedQuotes {
    async fn get_quote(&self, req: &QuoteRequest) -> Result<Quote, QuoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.force_error.lock().unwrap().clone() {
            return Err(err);
        }
        let (num, den) = self
            .ratios
            .get(&(req.sell_token.clone(), req.buy_token.clone()))
            .copied()
            .ok_or_else(|| QuoteError::NoLiquidity {
                status: 400,
                message: format!("no route {}→{}", req.sell_token, req.buy_token),
            })?;
        Ok(Quote {
            sell_token: req.sell_token.clone(),
            buy_token: req.buy_token.clone(),
            sell_amount: req.sell_amount,
            buy_amount: req.sell_amount * num / den,
            gas_native: self.gas_native,
            sources: req.source.iter().cloned().collect(),
        })
    }

    fn chain(&self) -> Chain {
        self.chain
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Chain client
// ---------------------------------------------------------------------------

/// Settles runs at scripted profits (then at the estimate once the script
/// runs out) and reports fixed balances.
pub struct ScriptedChain {
    chain: Chain,
    profits: Mutex<VecDeque<Result<Decimal, ChainError>>>,
    balances: HashMap<String, Decimal>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedChain {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            profits: Mutex::new(VecDeque::new()),
            balances: HashMap::new(),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_outcomes(self, outcomes: Vec<Result<Decimal, ChainError>>) -> Self {
        *self.profits.lock().unwrap() = outcomes.into();
        self
    }

    pub fn with_balance(mut self, address: &str, balance: Decimal) -> Self {
        self.balances.insert(address.to_string(), balance);
        self
    }

    /// Run ids submitted, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn execute(&self, run: &Run, _signer: &Signer) -> Result<ExecutionReceipt, ChainError> {
        self.executed.lock().unwrap().push(run.id.clone());
        let scripted = self.profits.lock().unwrap().pop_front();
        let profit = match scripted {
            Some(outcome) => outcome?,
            None => run.estimated_profit,
        };
        Ok(ExecutionReceipt {
            tx_reference: format!("0xmock{}", run.id.replace('-', "")),
            actual_profit: profit,
        })
    }

    async fn balance(&self, address: &str) -> Result<Decimal, ChainError> {
        self.balances
            .get(address)
            .copied()
            .ok_or_else(|| ChainError::RemoteTransient(format!("unknown account {address}")))
    }
}

// ---------------------------------------------------------------------------
// Key store
// ---------------------------------------------------------------------------

pub struct StaticKeys;

impl KeyStore for StaticKeys {
    fn signer_for(&self, label: &str) -> Result<Signer, ChainError> {
        Ok(Signer {
            label: label.to_string(),
            address: format!("{label}-address"),
            secret: SecretString::new("test-key".to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub fn scan_settings() -> ScanSettings {
    ScanSettings {
        inter_quote_delay: Duration::ZERO,
        batch_pause: Duration::ZERO,
        shuffle_seed: Some(42),
        ..ScanSettings::default()
    }
}

pub fn retry_policy() -> RetryPolicy {
    RetryPolicy {
        delays: vec![Duration::ZERO],
        rate_limit_cooldown: Duration::ZERO,
        ..RetryPolicy::default()
    }
}

/// One-chain orchestrator over scripted collaborators with zero pacing.
pub fn orchestrator(
    store: Store,
    quotes: Arc<ScriptedQuotes>,
    chain: Arc<ScriptedChain>,
    venues: &[&str],
    gas_reference_price: Decimal,
) -> CycleOrchestrator {
    let chain_id = quotes.chain();
    let scanner = OpportunityScanner::new(
        quotes,
        scan_settings(),
        retry_policy(),
        Network::Mainnet,
        venues.iter().map(|v| v.to_string()).collect(),
        gas_reference_price,
    );
    let chains: ChainClients = vec![chain as Arc<dyn ChainClient>].into_iter().collect();
    let executor = ExecutionEngine::new(
        chains,
        Arc::new(StaticKeys),
        HashMap::from([(chain_id, format!("{chain_id}-fee-payer"))]),
    );
    CycleOrchestrator::new(store, vec![scanner], executor, Duration::from_secs(30))
}
