use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use tracing::debug;

use super::{check_status, decode_transaction_base64, http_client, map_send_error, parse_u64};
use crate::exchanges::types::{QuoteRequest, VenueLabel, VenueQuote};
use crate::exchanges::VenueClient;
use crate::shared::errors::VenueError;
use crate::shared::types::SOL_MINT;

const VENUE: VenueLabel = VenueLabel::Raydium;
const DEFAULT_COMPUTE_UNIT_PRICE: u64 = 100_000;

/// Trade API envelope
#[derive(Debug, Deserialize)]
struct RaydiumEnvelope<T> {
    success: bool,
    data: Option<T>,
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RaydiumComputeData {
    input_mint: String,
    input_amount: String,
    output_mint: String,
    output_amount: String,
    other_amount_threshold: String,
    /// Already a percentage
    price_impact_pct: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct RaydiumTransactionData {
    transaction: String,
}

/// Raydium trade API client (compute + transaction endpoints)
pub struct RaydiumClient {
    http_client: Client,
    base_url: String,
    compute_unit_price: u64,
}

impl RaydiumClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http_client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            compute_unit_price: DEFAULT_COMPUTE_UNIT_PRICE,
        })
    }

    fn unwrap_envelope<T>(envelope: RaydiumEnvelope<T>) -> Result<T, VenueError> {
        match envelope {
            RaydiumEnvelope { success: true, data: Some(data), .. } => Ok(data),
            RaydiumEnvelope { msg, .. } => Err(VenueError::Unsupported {
                venue: VENUE,
                reason: msg.unwrap_or_else(|| "unsuccessful response".to_string()),
            }),
        }
    }
}

#[async_trait]
impl VenueClient for RaydiumClient {
    fn label(&self) -> VenueLabel {
        VENUE
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<VenueQuote, VenueError> {
        let url = format!("{}/compute/swap-base-in", self.base_url);
        debug!("🔍 Raydium quote {} -> {} ({})", request.input_mint, request.output_mint, request.amount);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("inputMint", request.input_mint.to_string()),
                ("outputMint", request.output_mint.to_string()),
                ("amount", request.amount.to_string()),
                ("slippageBps", request.slippage_bps.to_string()),
                ("txVersion", "V0".to_string()),
            ])
            .send()
            .await
            .map_err(|e| map_send_error(VENUE, e))?;
        let payload: serde_json::Value = check_status(VENUE, response)
            .await?
            .json()
            .await
            .map_err(|e| map_send_error(VENUE, e))?;

        let envelope: RaydiumEnvelope<RaydiumComputeData> = serde_json::from_value(payload.clone())
            .map_err(|e| VenueError::Decode(format!("Raydium compute: {}", e)))?;
        let data = Self::unwrap_envelope(envelope)?;

        Ok(VenueQuote {
            venue: VENUE,
            in_amount: parse_u64("inputAmount", &data.input_amount)?,
            out_amount: parse_u64("outputAmount", &data.output_amount)?,
            min_out_amount: parse_u64("otherAmountThreshold", &data.other_amount_threshold)?,
            price_impact_pct: data.price_impact_pct,
            payload,
        })
    }

    async fn build_swap(
        &self,
        quote: &VenueQuote,
        user: &Pubkey,
    ) -> Result<VersionedTransaction, VenueError> {
        let data = &quote.payload["data"];
        let input_mint = data["inputMint"].as_str().unwrap_or_default();
        let output_mint = data["outputMint"].as_str().unwrap_or_default();
        let url = format!("{}/transaction/swap-base-in", self.base_url);
        let body = json!({
            "computeUnitPriceMicroLamports": self.compute_unit_price.to_string(),
            "swapResponse": quote.payload,
            "txVersion": "V0",
            "wallet": user.to_string(),
            "wrapSol": input_mint == SOL_MINT,
            "unwrapSol": output_mint == SOL_MINT,
        });

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(VENUE, e))?;
        let envelope: RaydiumEnvelope<Vec<RaydiumTransactionData>> = check_status(VENUE, response)
            .await?
            .json()
            .await
            .map_err(|e| map_send_error(VENUE, e))?;

        let transactions = Self::unwrap_envelope(envelope)?;
        match transactions.as_slice() {
            [single] => decode_transaction_base64(&single.transaction),
            [] => Err(VenueError::Decode("Raydium returned no transaction".into())),
            _ => Err(VenueError::Unsupported {
                venue: VENUE,
                reason: format!("swap needs {} transactions", transactions.len()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::api_clients::test_support::unsigned_tx_base64;
    use mockito::Matcher;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    const RAY: &str = "4k3Dyjzvzp8eMZWUXbBCjEvwSkkk59S5iCNLY3QrkX6R";

    fn request() -> QuoteRequest {
        QuoteRequest {
            input_mint: Pubkey::from_str(SOL_MINT).unwrap(),
            output_mint: Pubkey::from_str(RAY).unwrap(),
            amount: 1_000_000_000,
            slippage_bps: 100,
        }
    }

    fn compute_body() -> serde_json::Value {
        json!({
            "id": "abc",
            "success": true,
            "version": "V1",
            "data": {
                "swapType": "BaseIn",
                "inputMint": SOL_MINT,
                "inputAmount": "1000000000",
                "outputMint": RAY,
                "outputAmount": "75000000",
                "otherAmountThreshold": "74250000",
                "slippageBps": 100,
                "priceImpactPct": 0.35,
                "routePlan": []
            }
        })
    }

    #[tokio::test]
    async fn test_quote_reads_compute_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/compute/swap-base-in")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("txVersion".into(), "V0".into()),
                Matcher::UrlEncoded("amount".into(), "1000000000".into()),
            ]))
            .with_status(200)
            .with_body(compute_body().to_string())
            .create_async()
            .await;

        let client = RaydiumClient::new(&server.url()).unwrap();
        let quote = client.quote(&request()).await.unwrap();
        assert_eq!(quote.out_amount, 75_000_000);
        assert_eq!(quote.min_out_amount, 74_250_000);
        assert_eq!(quote.price_impact_pct, Some(dec!(0.35)));
    }

    #[tokio::test]
    async fn test_unsuccessful_compute_is_unsupported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/compute/swap-base-in")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({ "id": "x", "success": false, "msg": "ROUTE_NOT_FOUND" }).to_string())
            .create_async()
            .await;

        let client = RaydiumClient::new(&server.url()).unwrap();
        assert_eq!(
            client.quote(&request()).await.unwrap_err(),
            VenueError::Unsupported { venue: VenueLabel::Raydium, reason: "ROUTE_NOT_FOUND".into() }
        );
    }

    #[tokio::test]
    async fn test_build_swap_wraps_sol_input() {
        let user = Pubkey::new_unique();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transaction/swap-base-in")
            .match_body(Matcher::PartialJson(json!({
                "wallet": user.to_string(),
                "wrapSol": true,
                "unwrapSol": false,
                "txVersion": "V0"
            })))
            .with_status(200)
            .with_body(
                json!({
                    "id": "y",
                    "success": true,
                    "data": [{ "transaction": unsigned_tx_base64(&user) }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = RaydiumClient::new(&server.url()).unwrap();
        let quote = VenueQuote {
            venue: VenueLabel::Raydium,
            in_amount: 1_000_000_000,
            out_amount: 75_000_000,
            min_out_amount: 74_250_000,
            price_impact_pct: None,
            payload: compute_body(),
        };
        let tx = client.build_swap(&quote, &user).await.unwrap();
        mock.assert_async().await;
        assert_eq!(tx.message.static_account_keys()[0], user);
    }
}
