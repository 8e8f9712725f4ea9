//! Jupiter swap-routing integration (Solana).
//!
//! API docs: https://station.jup.ag/docs/apis/swap-api
//! Endpoint: GET /quote?inputMint&outputMint&amount&dexes&onlyDirectRoutes
//! Auth: optional `x-api-key` header for the paid tier.
//!
//! Jupiter does not return a fee estimate, so every quote carries the
//! configured fallback fee (base fee + typical priority fee).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use super::{
    check_dust, classify_status, parse_base_units, transport_error, ProviderSettings, Quote,
    QuoteError, QuoteProvider, QuoteRequest,
};
use crate::types::Chain;

const PROVIDER_NAME: &str = "jupiter";

// ---------------------------------------------------------------------------
// API response types (Jupiter JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JupiterQuoteResponse {
    in_amount: String,
    out_amount: String,
    #[serde(default)]
    route_plan: Vec<JupiterRouteStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JupiterRouteStep {
    swap_info: JupiterSwapInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JupiterSwapInfo {
    #[serde(default)]
    label: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct JupiterClient {
    http: Client,
    settings: ProviderSettings,
}

impl JupiterClient {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .user_agent("FERRY/0.1.0 (arbitrage-loop)")
            .build()
            .context("Failed to build HTTP client for Jupiter")?;

        Ok(Self { http, settings })
    }

    fn quote_url(&self, request: &QuoteRequest) -> String {
        let mut url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&onlyDirectRoutes={}",
            self.settings.base_url.trim_end_matches('/'),
            urlencoding::encode(&request.sell_token),
            urlencoding::encode(&request.buy_token),
            request.sell_amount,
            request.direct_only,
        );
        if let Some(source) = &request.source {
            url.push_str(&format!("&dexes={}", urlencoding::encode(source)));
        }
        url
    }

    /// Convert a Jupiter response body into a `Quote`.
    fn parse_quote(&self, body: &str, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        let resp: JupiterQuoteResponse = serde_json::from_str(body).map_err(|e| {
            QuoteError::RemoteTransient(format!("unparseable Jupiter quote: {e}"))
        })?;

        let sell_amount = parse_base_units("inAmount", &resp.in_amount)?;
        let buy_amount = parse_base_units("outAmount", &resp.out_amount)?;
        if buy_amount == 0 {
            return Err(QuoteError::NoLiquidity {
                status: 200,
                message: "route returned zero output".to_string(),
            });
        }

        let mut sources: Vec<String> = resp
            .route_plan
            .iter()
            .filter_map(|step| step.swap_info.label.clone())
            .collect();
        sources.dedup();

        Ok(Quote {
            sell_token: request.sell_token.clone(),
            buy_token: request.buy_token.clone(),
            sell_amount,
            buy_amount,
            gas_native: self.settings.fallback_gas_native,
            sources,
        })
    }
}

#[async_trait]
impl QuoteProvider for JupiterClient {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        check_dust(request.sell_amount, self.settings.min_sell_amount)?;

        let url = self.quote_url(request);
        debug!(url = %url, "Fetching Jupiter quote");

        let mut req = self.http.get(&url);
        if let Some(key) = &self.settings.api_key {
            req = req.header("x-api-key", key.expose_secret().as_str());
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
        Chain::Solana
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
