use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

use super::{check_status, decode_transaction_base64, http_client, map_send_error, parse_u64};
use crate::domain::price::PriceFeed;
use crate::exchanges::types::{QuoteRequest, VenueLabel, VenueQuote};
use crate::exchanges::VenueClient;
use crate::shared::errors::VenueError;

const VENUE: VenueLabel = VenueLabel::Jupiter;

/// Fields of the v6 quote response we read; the whole body is kept as payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JupiterQuoteResponse {
    in_amount: String,
    out_amount: String,
    other_amount_threshold: String,
    /// Fraction, not percent
    price_impact_pct: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JupiterSwapResponse {
    swap_transaction: String,
}

#[derive(Debug, Deserialize)]
struct JupiterPriceResponse {
    data: HashMap<String, Option<JupiterPriceEntry>>,
}

#[derive(Debug, Deserialize)]
struct JupiterPriceEntry {
    price: String,
}

/// Jupiter aggregator quote/swap API client
pub struct JupiterClient {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl JupiterClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            http_client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }
}

#[async_trait]
impl VenueClient for JupiterClient {
    fn label(&self) -> VenueLabel {
        VENUE
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<VenueQuote, VenueError> {
        let url = format!("{}/quote", self.base_url);
        debug!("🔍 Jupiter quote {} -> {} ({})", request.input_mint, request.output_mint, request.amount);

        let response = self
            .authorized(self.http_client.get(&url).query(&[
                ("inputMint", request.input_mint.to_string()),
                ("outputMint", request.output_mint.to_string()),
                ("amount", request.amount.to_string()),
                ("slippageBps", request.slippage_bps.to_string()),
            ]))
            .send()
            .await
            .map_err(|e| map_send_error(VENUE, e))?;
        let payload: serde_json::Value = check_status(VENUE, response)
            .await?
            .json()
            .await
            .map_err(|e| map_send_error(VENUE, e))?;

        let parsed: JupiterQuoteResponse = serde_json::from_value(payload.clone())
            .map_err(|e| VenueError::Decode(format!("Jupiter quote: {}", e)))?;
        let price_impact_pct = parsed
            .price_impact_pct
            .as_deref()
            .and_then(|raw| Decimal::from_str(raw).ok())
            .map(|fraction| fraction * Decimal::ONE_HUNDRED);

        Ok(VenueQuote {
            venue: VENUE,
            in_amount: parse_u64("inAmount", &parsed.in_amount)?,
            out_amount: parse_u64("outAmount", &parsed.out_amount)?,
            min_out_amount: parse_u64("otherAmountThreshold", &parsed.other_amount_threshold)?,
            price_impact_pct,
            payload,
        })
    }

    async fn build_swap(
        &self,
        quote: &VenueQuote,
        user: &Pubkey,
    ) -> Result<VersionedTransaction, VenueError> {
        let url = format!("{}/swap", self.base_url);
        let body = json!({
            "quoteResponse": quote.payload,
            "userPublicKey": user.to_string(),
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
        });

        let response = self
            .authorized(self.http_client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| map_send_error(VENUE, e))?;
        let swap: JupiterSwapResponse = check_status(VENUE, response)
            .await?
            .json()
            .await
            .map_err(|e| map_send_error(VENUE, e))?;
        decode_transaction_base64(&swap.swap_transaction)
    }
}

/// Reference USD prices from Jupiter's price API
pub struct JupiterPriceClient {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl JupiterPriceClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            http_client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl PriceFeed for JupiterPriceClient {
    async fn usd_price(&self, mint: &str) -> Result<Decimal, VenueError> {
        let mut request = self.http_client.get(&self.base_url).query(&[("ids", mint)]);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let response = request.send().await.map_err(|e| map_send_error(VENUE, e))?;
        let body: JupiterPriceResponse = check_status(VENUE, response)
            .await?
            .json()
            .await
            .map_err(|e| map_send_error(VENUE, e))?;

        let entry = body
            .data
            .get(mint)
            .and_then(|entry| entry.as_ref())
            .ok_or_else(|| VenueError::NoPrice(mint.to_string()))?;
        Decimal::from_str(&entry.price)
            .map_err(|e| VenueError::Decode(format!("price {:?}: {}", entry.price, e)))
    }
}
