//! Common types used across the application

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

/// Wrapped SOL mint, used for native SOL balances and swaps
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Token-2022 program, accepted alongside the classic SPL token program
pub const TOKEN_2022_PROGRAM: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

/// Largest decimals value we convert; keeps `10^decimals` inside u64
const MAX_DECIMALS: u8 = 18;

/// Amount expressed both in UI units and the token's native integer unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub ui: Decimal,
    pub raw: u64,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn from_ui(ui: Decimal, decimals: u8) -> Result<Self, String> {
        let raw = to_base_units(ui, decimals)?;
        Ok(Self { ui, raw, decimals })
    }

    pub fn from_raw(raw: u64, decimals: u8) -> Self {
        Self {
            ui: from_base_units(raw, decimals),
            raw,
            decimals,
        }
    }
}

/// Convert a UI amount into native units, truncating sub-unit dust
pub fn to_base_units(amount: Decimal, decimals: u8) -> Result<u64, String> {
    if decimals > MAX_DECIMALS {
        return Err(format!("unsupported decimals {}", decimals));
    }
    if amount.is_sign_negative() {
        return Err(format!("negative amount {}", amount));
    }
    let factor = Decimal::from(10u64.pow(decimals as u32));
    amount
        .checked_mul(factor)
        .map(|v| v.trunc())
        .and_then(|v| v.to_u64())
        .ok_or_else(|| format!("amount {} does not fit {} decimals", amount, decimals))
}

/// Convert native units into a UI amount
pub fn from_base_units(raw: u64, decimals: u8) -> Decimal {
    let mut value = Decimal::from(raw);
    // set_scale fails past 28, far beyond any SPL mint
    if value.set_scale(decimals as u32).is_err() {
        return Decimal::ZERO;
    }
    value.normalize()
}

/// Parse a base58 mint address
pub fn parse_mint(mint: &str) -> Result<Pubkey, String> {
    Pubkey::from_str(mint.trim()).map_err(|e| format!("{}: {}", mint, e))
}

/// Parse a token reference: a base58 mint, or the "SOL" symbol for wrapped SOL
pub fn parse_token(token: &str) -> Result<Pubkey, String> {
    if token.trim().eq_ignore_ascii_case("SOL") {
        return Ok(sol_mint());
    }
    parse_mint(token)
}

pub fn sol_mint() -> Pubkey {
    spl_token::native_mint::id()
}

/// pump.fun vanity mints end with "pump"
pub fn is_launch_venue_mint(mint: &Pubkey) -> bool {
    mint.to_string().ends_with("pump")
}
