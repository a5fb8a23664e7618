use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use tracing::debug;

use super::{check_status, decode_transaction_bytes, http_client, map_send_error};
use crate::exchanges::types::{QuoteRequest, VenueLabel, VenueQuote};
use crate::exchanges::VenueClient;
use crate::shared::errors::VenueError;
use crate::shared::types::{from_base_units, is_launch_venue_mint, sol_mint};

const VENUE: VenueLabel = VenueLabel::PumpFun;
/// Bonding-curve trade fee, basis points
const FEE_BPS: u128 = 100;
const PUMP_TOKEN_DECIMALS: u8 = 6;
const SOL_DECIMALS: u8 = 9;
const PRIORITY_FEE_SOL: f64 = 0.00005;

#[derive(Debug, Deserialize)]
struct BondingCurve {
    virtual_sol_reserves: u64,
    virtual_token_reserves: u64,
    #[serde(default)]
    complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Buy,
    Sell,
}

impl Side {
    fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// pump.fun launch venue: quotes off the bonding curve, builds through pumpportal
pub struct PumpFunClient {
    http_client: Client,
    base_url: String,
    trade_url: String,
}

impl PumpFunClient {
    pub fn new(base_url: &str, trade_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http_client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            trade_url: trade_url.trim_end_matches('/').to_string(),
        })
    }

    /// Only SOL <-> launch token pairs trade on the curve
    fn side(request: &QuoteRequest) -> Result<(Side, Pubkey), VenueError> {
        let sol = sol_mint();
        if request.input_mint == sol && is_launch_venue_mint(&request.output_mint) {
            Ok((Side::Buy, request.output_mint))
        } else if request.output_mint == sol && is_launch_venue_mint(&request.input_mint) {
            Ok((Side::Sell, request.input_mint))
        } else {
            Err(VenueError::Unsupported {
                venue: VENUE,
                reason: "only SOL <-> pump.fun token pairs".into(),
            })
        }
    }

    async fn bonding_curve(&self, mint: &Pubkey) -> Result<BondingCurve, VenueError> {
        let url = format!("{}/coins/{}", self.base_url, mint);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_send_error(VENUE, e))?;
        check_status(VENUE, response)
            .await?
            .json()
            .await
            .map_err(|e| map_send_error(VENUE, e))
    }
}

/// Constant-product output after the curve fee: (amount_out, impact_pct)
fn curve_output(side: Side, curve: &BondingCurve, amount_in: u64) -> (u64, Decimal) {
    let amount_in = amount_in as u128;
    let (reserve_in, reserve_out) = match side {
        Side::Buy => (curve.virtual_sol_reserves as u128, curve.virtual_token_reserves as u128),
        Side::Sell => (curve.virtual_token_reserves as u128, curve.virtual_sol_reserves as u128),
    };
    let effective_in = match side {
        Side::Buy => amount_in * (10_000 - FEE_BPS) / 10_000,
        Side::Sell => amount_in,
    };
    let denominator = reserve_in + effective_in;
    if denominator == 0 {
        return (0, Decimal::ZERO);
    }
    let mut out = reserve_out * effective_in / denominator;
    if side == Side::Sell {
        out = out * (10_000 - FEE_BPS) / 10_000;
    }
    let impact = Decimal::from(effective_in as u64) / Decimal::from(denominator as u64)
        * Decimal::ONE_HUNDRED;
    (u64::try_from(out).unwrap_or(u64::MAX), impact)
}

#[async_trait]
impl VenueClient for PumpFunClient {
    fn label(&self) -> VenueLabel {
        VENUE
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<VenueQuote, VenueError> {
        let (side, mint) = Self::side(request)?;
        debug!("🔍 pump.fun {} quote for {} ({})", side.as_str(), mint, request.amount);

        let curve = self.bonding_curve(&mint).await?;
        if curve.complete {
            return Err(VenueError::Unsupported {
                venue: VENUE,
                reason: format!("{} has migrated off the bonding curve", mint),
            });
        }

        let (out_amount, impact) = curve_output(side, &curve, request.amount);
        if out_amount == 0 {
            return Err(VenueError::Unsupported {
                venue: VENUE,
                reason: "bonding curve has no liquidity".into(),
            });
        }
        let min_out_amount =
            (out_amount as u128 * (10_000 - request.slippage_bps as u128) / 10_000) as u64;

        // pumpportal takes UI amounts: SOL for buys, tokens for sells
        let ui_amount = match side {
            Side::Buy => from_base_units(request.amount, SOL_DECIMALS),
            Side::Sell => from_base_units(request.amount, PUMP_TOKEN_DECIMALS),
        };
        let payload = json!({
            "mint": mint.to_string(),
            "action": side.as_str(),
            "amount": ui_amount.to_string(),
            "denominatedInSol": side == Side::Buy,
            "slippage": (request.slippage_bps / 100).max(1),
        });

        Ok(VenueQuote {
            venue: VENUE,
            in_amount: request.amount,
            out_amount,
            min_out_amount,
            price_impact_pct: Some(impact.round_dp(4)),
            payload,
        })
    }

    async fn build_swap(
        &self,
        quote: &VenueQuote,
        user: &Pubkey,
    ) -> Result<VersionedTransaction, VenueError> {
        let payload = &quote.payload;
        let amount: f64 = payload["amount"]
            .as_str()
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| VenueError::Decode("pump.fun payload without amount".into()))?;
        let body = json!({
            "publicKey": user.to_string(),
            "action": payload["action"],
            "mint": payload["mint"],
            "amount": amount,
            "denominatedInSol": if payload["denominatedInSol"].as_bool().unwrap_or(false) { "true" } else { "false" },
            "slippage": payload["slippage"],
            "priorityFee": PRIORITY_FEE_SOL,
            "pool": "pump",
        });

        let url = format!("{}/trade-local", self.trade_url);
        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(VENUE, e))?;
        let bytes = check_status(VENUE, response)
            .await?
            .bytes()
            .await
            .map_err(|e| map_send_error(VENUE, e))?;
        decode_transaction_bytes(&bytes)
    }
}
