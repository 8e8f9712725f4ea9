//! Quote retry policy and the cumulative rate-limit breaker.
//!
//! `RetryPolicy` is plain data injected into the scanner. `QuoteSession`
//! applies it to one chain's scan: every call goes through the per-call
//! timeout, transient failures back off along the delay schedule, and
//! every 429 counts toward a breaker that is never reset within the scan.

use std::time::Duration;

use tracing::{debug, warn};

use crate::quotes::{Quote, QuoteError, QuoteProvider, QuoteRequest};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per leg, including the first.
    pub max_attempts: u32,
    /// Backoff after attempt n is `delays[n - 1]`; the last entry repeats.
    pub delays: Vec<Duration>,
    /// Let the final attempt use multi-hop routes.
    pub relax_on_final_attempt: bool,
    /// Rate-limited responses tolerated per scan before aborting it.
    pub rate_limit_budget: u32,
    pub rate_limit_cooldown: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![Duration::from_millis(2_000), Duration::from_millis(4_000)],
            relax_on_final_attempt: true,
            rate_limit_budget: 2,
            rate_limit_cooldown: Duration::from_millis(10_000),
            call_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after `attempt` (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let idx = attempt.saturating_sub(1) as usize;
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether `attempt` should restrict routing to single-hop routes.
    pub fn direct_only(&self, attempt: u32) -> bool {
        let relaxed = self.relax_on_final_attempt && attempt > 1 && attempt >= self.max_attempts;
        !relaxed
    }
}

// ---------------------------------------------------------------------------
// Breaker
// ---------------------------------------------------------------------------

/// Counts rate-limited responses over a whole scan. Successful calls in
/// between do not reset it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitBreaker {
    budget: u32,
    hits: u32,
}

impl RateLimitBreaker {
    pub fn new(budget: u32) -> Self {
        Self { budget, hits: 0 }
    }

    /// Record one rate-limited response. Returns true once the breaker is open.
    pub fn record(&mut self) -> bool {
        self.hits += 1;
        self.is_tripped()
    }

    pub fn is_tripped(&self) -> bool {
        self.hits >= self.budget
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Retry state for one chain's scan.
pub struct QuoteSession<'a> {
    provider: &'a dyn QuoteProvider,
    policy: &'a RetryPolicy,
    breaker: RateLimitBreaker,
    calls: usize,
}

impl<'a> QuoteSession<'a> {
    pub fn new(provider: &'a dyn QuoteProvider, policy: &'a RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            breaker: RateLimitBreaker::new(policy.rate_limit_budget),
            calls: 0,
        }
    }

    /// Remote calls issued so far, retries included.
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn rate_limited(&self) -> u32 {
        self.breaker.hits()
    }

    /// The breaker is open; no further calls will be made.
    pub fn aborted(&self) -> bool {
        self.breaker.is_tripped()
    }

    /// Quote one leg, retrying per policy.
    pub async fn quote(&mut self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        let mut attempt: u32 = 1;

        loop {
            if self.aborted() {
                return Err(QuoteError::RateLimited(format!(
                    "scan aborted after {} rate-limited responses",
                    self.breaker.hits()
                )));
            }

            let mut req = request.clone();
            req.direct_only = self.policy.direct_only(attempt);

            self.calls += 1;
            let result = match tokio::time::timeout(
                self.policy.call_timeout,
                self.provider.get_quote(&req),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(QuoteError::RemoteTransient(format!(
                    "quote timed out after {}ms",
                    self.policy.call_timeout.as_millis()
                ))),
            };

            let err = match result {
                Ok(quote) => return Ok(quote),
                Err(e) => e,
            };

            if err.is_rate_limited() {
                let tripped = self.breaker.record();
                warn!(
                    provider = self.provider.name(),
                    chain = %self.provider.chain(),
                    hits = self.breaker.hits(),
                    budget = self.policy.rate_limit_budget,
                    tripped,
                    "Quote rate-limited"
                );
                if tripped || attempt >= self.policy.max_attempts {
                    return Err(err);
                }
                tokio::time::sleep(self.policy.rate_limit_cooldown).await;
            } else if err.is_retryable() && attempt < self.policy.max_attempts {
                let delay = self.policy.delay_for(attempt);
                debug!(
                    provider = self.provider.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying quote"
                );
                tokio::time::sleep(delay).await;
            } else {
                return Err(err);
            }

            attempt += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
