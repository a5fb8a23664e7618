use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

/// Liquidity venues, declared in resolution priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueLabel {
    Jupiter,
    Raydium,
    PumpFun,
}

impl VenueLabel {
    pub const PRIORITY: [VenueLabel; 3] = [VenueLabel::Jupiter, VenueLabel::Raydium, VenueLabel::PumpFun];

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueLabel::Jupiter => "Jupiter",
            VenueLabel::Raydium => "Raydium",
            VenueLabel::PumpFun => "pump.fun",
        }
    }
}

impl fmt::Display for VenueLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VenueLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jupiter" | "jup" => Ok(VenueLabel::Jupiter),
            "raydium" => Ok(VenueLabel::Raydium),
            "pumpfun" | "pump_fun" | "pump.fun" | "pump" => Ok(VenueLabel::PumpFun),
            _ => Err(anyhow::anyhow!("Unknown venue: {}", s)),
        }
    }
}

/// Quote request in native units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub amount: u64,
    pub slippage_bps: u16,
}

/// A venue's answer to a quote request, native units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueQuote {
    pub venue: VenueLabel,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Worst-case output after slippage
    pub min_out_amount: u64,
    /// Venue-reported impact, percent
    pub price_impact_pct: Option<Decimal>,
    /// Venue-specific data needed to build the swap
    pub payload: serde_json::Value,
}

/// Venue chosen for a mint pair, with the quote it was chosen on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub best_route: VenueLabel,
    /// Either side is a pump.fun launch token
    pub is_launch_token: bool,
    pub input_decimals: u8,
    pub output_decimals: u8,
    pub quote: VenueQuote,
}

/// Priced quote, UI units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Output per input
    pub price: Decimal,
    /// Deviation from the reference price, percent
    pub impact: Decimal,
    pub min_output: Decimal,
    /// Expected price from reference USD prices, when both were fresh
    pub reference_price: Option<Decimal>,
}
