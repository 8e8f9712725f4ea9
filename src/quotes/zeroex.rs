//! 0x swap-routing integration (EVM chains).
//!
//! API docs: https://0x.org/docs/0x-swap-api/api-references/get-swap-v1-price
//! Endpoint: GET /swap/v1/price?sellToken&buyToken&sellAmount&includedSources
//! Auth: `0x-api-key` header.
//!
//! One client per chain; the base URL selects the chain deployment
//! (e.g. `https://base.api.0x.org`). 0x has no single-hop switch, so
//! `direct_only` is ignored.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::str::FromStr;
use tracing::debug;

use super::{
    check_dust, classify_status, parse_base_units, transport_error, ProviderSettings, Quote,
    QuoteError, QuoteProvider, QuoteRequest,
};
use crate::types::Chain;

const PROVIDER_NAME: &str = "0x";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZeroExPriceResponse {
    sell_amount: String,
    buy_amount: String,
    #[serde(default)]
    estimated_gas: Option<String>,
    #[serde(default)]
    gas_price: Option<String>,
    #[serde(default)]
    sources: Vec<ZeroExSource>,
}

#[derive(Debug, Deserialize)]
struct ZeroExSource {
    name: String,
    /// Share of the fill routed through this source, as a decimal string.
    #[serde(default)]
    proportion: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ZeroExClient {
    http: Client,
    chain: Chain,
    settings: ProviderSettings,
}

impl ZeroExClient {
    pub fn new(chain: Chain, settings: ProviderSettings) -> Result<Self> {
        if !chain.is_evm() {
            anyhow::bail!("0x only routes on EVM chains, got {chain}");
        }

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .user_agent("FERRY/0.1.0 (arbitrage-loop)")
            .build()
            .context("Failed to build HTTP client for 0x")?;

        Ok(Self {
            http,
            chain,
            settings,
        })
    }

    fn price_url(&self, request: &QuoteRequest) -> String {
        let mut url = format!(
            "{}/swap/v1/price?sellToken={}&buyToken={}&sellAmount={}",
            self.settings.base_url.trim_end_matches('/'),
            urlencoding::encode(&request.sell_token),
            urlencoding::encode(&request.buy_token),
            request.sell_amount,
        );
        if let Some(chain_id) = self.chain.evm_chain_id(request.network) {
            url.push_str(&format!("&chainId={chain_id}"));
        }
        if let Some(source) = &request.source {
            url.push_str(&format!("&includedSources={}", urlencoding::encode(source)));
        }
        url
    }

    /// Fee in whole native units: estimatedGas × gasPrice / 10^18.
    fn gas_native(&self, resp: &ZeroExPriceResponse) -> Decimal {
        let gas = resp
            .estimated_gas
            .as_deref()
            .and_then(|g| g.parse::<u64>().ok());
        let price = resp.gas_price.as_deref().and_then(|p| p.parse::<u64>().ok());

        match (gas, price) {
            (Some(gas), Some(price)) => {
                let wei = Decimal::from(gas) * Decimal::from(price);
                wei / Decimal::from(10u64.pow(self.chain.native_decimals()))
            }
            _ => self.settings.fallback_gas_native,
        }
    }

    fn parse_quote(&self, body: &str, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        let resp: ZeroExPriceResponse = serde_json::from_str(body)
            .map_err(|e| QuoteError::RemoteTransient(format!("unparseable 0x price: {e}")))?;

        let sell_amount = parse_base_units("sellAmount", &resp.sell_amount)?;
        let buy_amount = parse_base_units("buyAmount", &resp.buy_amount)?;
        if buy_amount == 0 {
            return Err(QuoteError::NoLiquidity {
                status: 200,
                message: "route returned zero output".to_string(),
            });
        }

        // 0x lists every known source with its share; keep only the used ones
        let sources = resp
            .sources
            .iter()
            .filter(|s| Decimal::from_str(&s.proportion).map_or(false, |p| p > Decimal::ZERO))
            .map(|s| s.name.clone())
            .collect();

        Ok(Quote {
            sell_token: request.sell_token.clone(),
            buy_token: request.buy_token.clone(),
            sell_amount,
            buy_amount,
            gas_native: self.gas_native(&resp),
            sources,
        })
    }
}

#[async_trait]
impl QuoteProvider for ZeroExClient {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        check_dust(request.sell_amount, self.settings.min_sell_amount)?;

        let url = self.price_url(request);
        debug!(url = %url, chain = %self.chain, "Fetching 0x price");

        let mut req = self.http.get(&url);
        if let Some(key) = &self.settings.api_key {
            req = req.header("0x-api-key", key.expose_secret().as_str());
        }

        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        self.parse_quote(&body, request)
    }

    fn chain(&self) -> Chain {
        self.chain
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Network;
    use rust_decimal_macros::dec;

    fn client() -> ZeroExClient {
        ZeroExClient::new(
            Chain::Base,
            ProviderSettings {
                base_url: "https://base.api.0x.org".to_string(),
                api_key: None,
                min_sell_amount: 1_000,
                fallback_gas_native: dec!(0.0001),
                timeout_secs: 10,
            },
        )
        .unwrap()
    }

    fn request() -> QuoteRequest {
        QuoteRequest {
            network: Network::Mainnet,
            sell_token: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
            buy_token: "0x4200000000000000000000000000000000000006".to_string(),
            sell_amount: 500_000_000,
            source: Some("Uniswap_V3".to_string()),
            direct_only: true,
        }
    }

    #[test]
    fn test_rejects_non_evm_chain() {
        let result = ZeroExClient::new(
            Chain::Solana,
            ProviderSettings {
                base_url: "https://api.0x.org".into(),
                api_key: None,
                min_sell_amount: 1,
                fallback_gas_native: Decimal::ZERO,
                timeout_secs: 1,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_price_url() {
        let url = client().price_url(&request());
        assert!(url.starts_with("https://base.api.0x.org/swap/v1/price?"));
        assert!(url.contains("sellAmount=500000000"));
        assert!(url.contains("chainId=8453"));
        assert!(url.contains("includedSources=Uniswap_V3"));
    }

    #[test]
    fn test_parse_quote_with_gas() {
        let body = r#"{
            "sellAmount": "500000000",
            "buyAmount": "201000000000000000",
            "estimatedGas": "150000",
            "gasPrice": "2000000000",
            "sources": [
                {"name": "Uniswap_V3", "proportion": "1"},
                {"name": "Aerodrome", "proportion": "0"}
            ]
        }"#;
        let q = client().parse_quote(body, &request()).unwrap();
        assert_eq!(q.buy_amount, 201_000_000_000_000_000);
        assert_eq!(q.sources, vec!["Uniswap_V3"]);
        // 150k gas × 2 gwei = 0.0003 ETH
        assert_eq!(q.gas_native, dec!(0.0003));
    }

    #[test]
    fn test_parse_quote_without_gas_uses_fallback() {
        let body = r#"{"sellAmount": "500000000", "buyAmount": "42"}"#;
        let q = client().parse_quote(body, &request()).unwrap();
        assert_eq!(q.gas_native, dec!(0.0001));
        assert!(q.sources.is_empty());
    }

    #[test]
    fn test_parse_malformed_amount() {
        let body = r#"{"sellAmount": "500000000", "buyAmount": "lots"}"#;
        let err = client().parse_quote(body, &request()).unwrap_err();
        assert!(matches!(err, QuoteError::RemoteTransient(_)));
    }
}
