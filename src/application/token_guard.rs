//! Token legitimacy checks run before a swap is admitted

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::price::PriceCache;
use crate::infrastructure::blockchain::TreasuryChain;
use crate::shared::errors::{ValidationError, VenueError};
use crate::shared::types::{sol_mint, TOKEN_2022_PROGRAM};

/// Cheap pre-checks on a mint. Definite negatives reject; probes that fail or
/// time out are inconclusive and let the swap proceed.
pub struct TokenGuard {
    chain: Arc<dyn TreasuryChain>,
    prices: Arc<PriceCache>,
    probe_timeout: Duration,
}

impl TokenGuard {
    pub fn new(chain: Arc<dyn TreasuryChain>, prices: Arc<PriceCache>, probe_timeout: Duration) -> Self {
        Self {
            chain,
            prices,
            probe_timeout,
        }
    }

    pub async fn check(&self, mint: &Pubkey) -> Result<(), ValidationError> {
        if *mint == sol_mint() {
            return Ok(());
        }
        self.check_program(mint).await?;
        self.check_liquidity(mint).await
    }

    async fn check_program(&self, mint: &Pubkey) -> Result<(), ValidationError> {
        let owner = match tokio::time::timeout(self.probe_timeout, self.chain.mint_owner(mint)).await {
            Ok(Ok(owner)) => owner,
            Ok(Err(e)) => {
                warn!(%mint, error = %e, "⚠️ Mint owner probe failed, proceeding");
                return Ok(());
            }
            Err(_) => {
                warn!(%mint, "⚠️ Mint owner probe timed out, proceeding");
                return Ok(());
            }
        };

        match owner {
            Some(owner) if is_token_program(&owner) => Ok(()),
            Some(owner) => Err(ValidationError::IllegitimateToken {
                mint: mint.to_string(),
                reason: format!("mint is owned by {}, not a token program", owner),
            }),
            None => Err(ValidationError::IllegitimateToken {
                mint: mint.to_string(),
                reason: "mint account does not exist".into(),
            }),
        }
    }

    async fn check_liquidity(&self, mint: &Pubkey) -> Result<(), ValidationError> {
        let key = mint.to_string();
        match tokio::time::timeout(self.probe_timeout, self.prices.price(&key)).await {
            Ok(Ok(price)) => {
                debug!(%mint, %price, "liquidity probe passed");
                Ok(())
            }
            Ok(Err(VenueError::NoPrice(_))) => Err(ValidationError::NoLiquidity(key)),
            Ok(Err(e)) => {
                warn!(%mint, error = %e, "⚠️ Liquidity probe failed, proceeding");
                Ok(())
            }
            Err(_) => {
                warn!(%mint, "⚠️ Liquidity probe timed out, proceeding");
                Ok(())
            }
        }
    }
}

fn is_token_program(owner: &Pubkey) -> bool {
    *owner == spl_token::id()
        || Pubkey::from_str(TOKEN_2022_PROGRAM)
            .map(|program| program == *owner)
            .unwrap_or(false)
}
