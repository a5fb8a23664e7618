//! HTTP clients for the liquidity venues

pub mod jupiter_client;
pub mod pumpfun_client;
pub mod raydium_client;

pub use jupiter_client::{JupiterClient, JupiterPriceClient};
pub use pumpfun_client::PumpFunClient;
pub use raydium_client::RaydiumClient;

use base64::Engine;
use reqwest::{Client, Response, StatusCode};
use solana_sdk::transaction::VersionedTransaction;

use crate::exchanges::types::VenueLabel;
use crate::shared::errors::VenueError;

const MAX_ERROR_BODY: usize = 256;

pub(crate) fn http_client() -> anyhow::Result<Client> {
    Ok(Client::builder()
        .user_agent(concat!("treasury-swap/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Classify a transport failure
pub(crate) fn map_send_error(venue: VenueLabel, e: reqwest::Error) -> VenueError {
    if e.is_timeout() {
        VenueError::Timeout(venue)
    } else if e.is_decode() {
        VenueError::Decode(format!("{}: {}", venue, e))
    } else {
        VenueError::Network(format!("{}: {}", venue, e))
    }
}

/// Pass successful responses through; 401/403 become `Unauthorized`, other statuses `Rejected`
pub(crate) async fn check_status(
    venue: VenueLabel,
    response: Response,
) -> Result<Response, VenueError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(VenueError::Unauthorized(venue));
    }
    let mut message = response.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY).rev().find(|i| message.is_char_boundary(*i)).unwrap_or(0);
        message.truncate(cut);
    }
    Err(VenueError::Rejected {
        venue,
        status: status.as_u16(),
        message,
    })
}

pub(crate) fn decode_transaction_bytes(bytes: &[u8]) -> Result<VersionedTransaction, VenueError> {
    bincode::deserialize(bytes).map_err(|e| VenueError::Decode(format!("transaction: {}", e)))
}

pub(crate) fn decode_transaction_base64(encoded: &str) -> Result<VersionedTransaction, VenueError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| VenueError::Decode(format!("transaction base64: {}", e)))?;
    decode_transaction_bytes(&bytes)
}

pub(crate) fn parse_u64(field: &str, value: &str) -> Result<u64, VenueError> {
    value
        .parse::<u64>()
        .map_err(|e| VenueError::Decode(format!("{} = {:?}: {}", field, value, e)))
}
