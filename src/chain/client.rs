//! HTTP chain client.
//!
//! Balances are read over plain JSON-RPC (`getBalance` on Solana,
//! `eth_getBalance` on EVM chains). Trades are handed to an execution
//! relay that builds, signs and lands the transaction and reports the
//! realised profit. In dry-run mode nothing leaves the process: runs
//! settle at their estimated profit with a synthetic reference.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{ChainClient, ChainError, ExecutionReceipt, Signer};
use crate::types::{Chain, Network, Run};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Solana wraps values in `{ context, value }`.
#[derive(Debug, Deserialize)]
struct SolanaBalance {
    value: u64,
}

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    run_id: &'a str,
    chain: Chain,
    network: Network,
    token_path: &'a [String],
    source_path: &'a [String],
    notional: Decimal,
    expected_profit: Decimal,
    signer_address: &'a str,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    tx_reference: String,
    actual_profit: Decimal,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HttpChainClient {
    http: Client,
    chain: Chain,
    network: Network,
    rpc_url: String,
    relay_url: Option<String>,
    dry_run: bool,
}

impl HttpChainClient {
    pub fn new(
        chain: Chain,
        network: Network,
        rpc_url: String,
        relay_url: Option<String>,
        dry_run: bool,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("FERRY/0.1.0 (arbitrage-loop)")
            .build()
            .with_context(|| format!("Failed to build HTTP client for {chain}"))?;

        Ok(Self {
            http,
            chain,
            network,
            rpc_url,
            relay_url,
            dry_run,
        })
    }

    async fn rpc_call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ChainError> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });

        let resp = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::RemoteTransient(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            return Err(ChainError::RemoteTransient(format!(
                "{method}: HTTP {}",
                resp.status()
            )));
        }

        let parsed: RpcResponse<T> = resp
            .json()
            .await
            .map_err(|e| ChainError::RemoteTransient(format!("{method}: bad response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(ChainError::Rejected(format!(
                "{method}: RPC error {}: {}",
                err.code, err.message
            )));
        }

        parsed
            .result
            .ok_or_else(|| ChainError::RemoteTransient(format!("{method}: empty result")))
    }

    fn dry_run_receipt(&self, run: &Run) -> ExecutionReceipt {
        ExecutionReceipt {
            tx_reference: format!("dry-run-{}", uuid::Uuid::new_v4()),
            actual_profit: run.estimated_profit,
        }
    }
}

/// Convert integer base units into whole native units.
pub(crate) fn base_units_to_native(units: u128, decimals: u32) -> Result<Decimal, ChainError> {
    let units = i128::try_from(units)
        .map_err(|_| ChainError::RemoteTransient(format!("balance overflow: {units}")))?;
    Decimal::try_from_i128_with_scale(units, decimals)
        .map_err(|e| ChainError::RemoteTransient(format!("balance overflow: {e}")))
}

/// Parse an `0x`-prefixed hex quantity.
pub(crate) fn parse_hex_quantity(hex: &str) -> Result<u128, ChainError> {
    let digits = hex.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|_| ChainError::RemoteTransient(format!("malformed hex quantity: {hex:?}")))
}

/// Classify a relay failure.
fn relay_error(status: StatusCode, body: &str) -> ChainError {
    let message: String = body.chars().take(300).collect();
    if status.is_server_error() {
        ChainError::RemoteTransient(format!("relay HTTP {status}: {message}"))
    } else if message.to_lowercase().contains("insufficient") {
        ChainError::InsufficientBalance(message)
    } else {
        ChainError::Rejected(format!("relay HTTP {status}: {message}"))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn execute(&self, run: &Run, signer: &Signer) -> Result<ExecutionReceipt, ChainError> {
        if self.dry_run {
            let receipt = self.dry_run_receipt(run);
            info!(
                run_id = %run.id,
                chain = %self.chain,
                signer = %signer.label,
                profit = %receipt.actual_profit,
                "[DRY RUN] Would execute run"
            );
            return Ok(receipt);
        }

        let relay = self.relay_url.as_deref().ok_or_else(|| {
            ChainError::Unsupported(format!("no execution relay configured for {}", self.chain))
        })?;

        let request = RelayRequest {
            run_id: &run.id,
            chain: self.chain,
            network: self.network,
            token_path: &run.token_path,
            source_path: &run.source_path,
            notional: run.notional,
            expected_profit: run.estimated_profit,
            signer_address: &signer.address,
        };

        debug!(run_id = %run.id, relay, "Submitting run to execution relay");

        let resp = self
            .http
            .post(format!("{}/execute", relay.trim_end_matches('/')))
            .bearer_auth(signer.secret.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::RemoteTransient(format!("relay: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(relay_error(status, &body));
        }

        let parsed: RelayResponse = resp
            .json()
            .await
            .map_err(|e| ChainError::RemoteTransient(format!("relay: bad response: {e}")))?;

        Ok(ExecutionReceipt {
            tx_reference: parsed.tx_reference,
            actual_profit: parsed.actual_profit,
        })
    }

    async fn balance(&self, address: &str) -> Result<Decimal, ChainError> {
        let units = if self.chain.is_evm() {
            let hex: String = self
                .rpc_call("eth_getBalance", json!([address, "latest"]))
                .await?;
            parse_hex_quantity(&hex)?
        } else {
            let bal: SolanaBalance = self.rpc_call("getBalance", json!([address])).await?;
            u128::from(bal.value)
        };
        base_units_to_native(units, self.chain.native_decimals())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
