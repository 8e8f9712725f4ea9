//! Quote provider integrations.
//!
//! Defines the `QuoteProvider` trait and provides implementations for:
//! - Jupiter: Solana swap routing (account-model chain)
//! - 0x: EVM swap routing
//!
//! Adapters never retry. Retry, pacing and the rate-limit breaker belong
//! to the scanner (see `engine::retry`).

pub mod jupiter;
pub mod zeroex;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Chain, Network};

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// A single-leg swap quote request. Amounts are in the sell token's
/// smallest unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub network: Network,
    pub sell_token: String,
    pub buy_token: String,
    pub sell_amount: u128,
    /// Restrict routing to this venue.
    pub source: Option<String>,
    /// Ask for single-hop routes only. Relaxed on the final retry.
    pub direct_only: bool,
}

/// A routed swap quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub sell_token: String,
    pub buy_token: String,
    pub sell_amount: u128,
    pub buy_amount: u128,
    /// Estimated fee in whole native-token units (SOL, ETH, ...).
    pub gas_native: Decimal,
    /// Venues the route touched.
    pub sources: Vec<String>,
}

/// Connection settings shared by the HTTP adapters.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<secrecy::SecretString>,
    /// Dust threshold in the sell token's smallest unit.
    pub min_sell_amount: u128,
    /// Used when the routing service does not report a fee estimate.
    pub fallback_gas_native: Decimal,
    pub timeout_secs: u64,
}

/// Parse a decimal-string base-unit amount as returned by routing APIs.
pub(crate) fn parse_base_units(field: &str, value: &str) -> Result<u128, QuoteError> {
    value
        .parse::<u128>()
        .map_err(|_| QuoteError::RemoteTransient(format!("malformed {field}: {value:?}")))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteError {
    #[error("Invalid amount: {amount} is below the dust threshold {min}")]
    InvalidAmount { amount: u128, min: u128 },

    #[error("No liquidity (HTTP {status}): {message}")]
    NoLiquidity { status: u16, message: String },

    #[error("Transient quote failure: {0}")]
    RemoteTransient(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),
}

impl QuoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, QuoteError::RemoteTransient(_) | QuoteError::RateLimited(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, QuoteError::RateLimited(_))
    }
}

/// Map a non-success HTTP status onto the quote error taxonomy.
///
/// 429 counts toward the scanner's rate-limit budget, the rest of 4xx is
/// final for this request, and 5xx may succeed on retry.
pub fn classify_status(status: StatusCode, body: &str) -> QuoteError {
    let message: String = body.chars().take(200).collect();
    if status == StatusCode::TOO_MANY_REQUESTS {
        QuoteError::RateLimited(format!("HTTP {status}: {message}"))
    } else if status.is_client_error() {
        QuoteError::NoLiquidity {
            status: status.as_u16(),
            message,
        }
    } else {
        QuoteError::RemoteTransient(format!("HTTP {status}: {message}"))
    }
}

/// Map a transport error (timeout, connection reset) to a retryable failure.
pub fn transport_error(err: reqwest::Error) -> QuoteError {
    if err.is_timeout() {
        QuoteError::RemoteTransient(format!("timeout: {err}"))
    } else {
        QuoteError::RemoteTransient(err.to_string())
    }
}

/// Reject dust before spending a remote call on it.
pub fn check_dust(amount: u128, min: u128) -> Result<(), QuoteError> {
    if amount < min {
        return Err(QuoteError::InvalidAmount { amount, min });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over swap-routing services.
///
/// One provider serves one chain; its rate limit is tracked per chain.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetch a quote for one leg.
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError>;

    /// Chain this provider quotes on.
    fn chain(&self) -> Chain;

    /// Provider name for logging and identification.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        let e = classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(e.is_rate_limited());
        assert!(e.is_retryable());
    }

    #[test]
    fn test_classify_client_error_is_no_liquidity() {
        let e = classify_status(StatusCode::BAD_REQUEST, "no route found");
        assert!(matches!(e, QuoteError::NoLiquidity { status: 400, .. }));
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_classify_server_error_is_transient() {
        let e = classify_status(StatusCode::BAD_GATEWAY, "");
        assert!(matches!(e, QuoteError::RemoteTransient(_)));
        assert!(e.is_retryable());
        assert!(!e.is_rate_limited());
    }

    #[test]
    fn test_classify_truncates_body() {
        let body = "x".repeat(1000);
        match classify_status(StatusCode::NOT_FOUND, &body) {
            QuoteError::NoLiquidity { message, .. } => assert_eq!(message.len(), 200),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_dust_threshold() {
        assert!(check_dust(1_000, 1_000).is_ok());
        let err = check_dust(999, 1_000).unwrap_err();
        assert_eq!(err, QuoteError::InvalidAmount { amount: 999, min: 1_000 });
        assert!(!err.is_retryable());
    }
}
