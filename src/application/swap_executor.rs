//! Venue-polymorphic swap execution: build, sign, submit, measure

use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::swap::SwapResult;
use crate::exchanges::types::{QuoteRequest, Route, VenueQuote};
use crate::exchanges::{VenueClient, VenueSet};
use crate::infrastructure::blockchain::TreasuryChain;
use crate::shared::errors::{ExecutionError, VenueError};
use crate::shared::types::{from_base_units, to_base_units};

/// Executes a resolved route on whichever venue it names
pub struct SwapExecutor {
    venues: VenueSet,
    chain: Arc<dyn TreasuryChain>,
    submit_timeout: Duration,
    slippage_bps: u16,
}

impl SwapExecutor {
    pub fn new(
        venues: VenueSet,
        chain: Arc<dyn TreasuryChain>,
        submit_timeout: Duration,
        slippage_bps: u16,
    ) -> Self {
        Self {
            venues,
            chain,
            submit_timeout,
            slippage_bps,
        }
    }

    /// Swap `amount` (UI units of the route's input) and report the settlement
    pub async fn execute(
        &self,
        route: &Route,
        signing_key: &Keypair,
        amount: Decimal,
    ) -> Result<SwapResult, ExecutionError> {
        let input_decimals = self
            .chain
            .token_decimals(&route.input_mint)
            .await
            .map_err(|e| ExecutionError::AmountConversion(e.to_string()))?;
        let raw_amount =
            to_base_units(amount, input_decimals).map_err(ExecutionError::AmountConversion)?;
        if raw_amount == 0 {
            return Err(ExecutionError::AmountConversion(format!(
                "{} rounds to zero at {} decimals",
                amount, input_decimals
            )));
        }

        let venue = self.venues.get(route.best_route).ok_or_else(|| {
            ExecutionError::Venue(VenueError::Unsupported {
                venue: route.best_route,
                reason: "venue not enabled".into(),
            })
        })?;
        let quote = self.quote_for(venue, route, raw_amount).await?;

        let user = signing_key.pubkey();
        let before = self.output_balance(&user, &route.output_mint).await;

        let unsigned = venue.build_swap(&quote, &user).await?;
        let signed = VersionedTransaction::try_new(unsigned.message, &[signing_key])
            .map_err(|e| ExecutionError::Signing(e.to_string()))?;

        info!(venue = %route.best_route, amount = %amount, "🚀 Submitting swap");
        let submitted =
            tokio::time::timeout(self.submit_timeout, self.chain.send_and_confirm(&signed)).await;
        let signature = match submitted {
            Ok(Ok(signature)) => signature,
            Ok(Err(e)) => return Err(ExecutionError::Submission(e.to_string())),
            Err(_) => return Err(ExecutionError::Timeout),
        };
        if signature == Signature::default() {
            return Err(ExecutionError::MissingSignature);
        }

        let quoted_output = from_base_units(quote.out_amount, route.output_decimals);
        let after = self.output_balance(&user, &route.output_mint).await;
        let output_amount = match (before, after) {
            (Some(before), Some(after)) if after > before => after - before,
            _ => {
                debug!("Output balance delta not observable, using quoted output");
                quoted_output
            }
        };

        info!(signature = %signature, output = %output_amount, "✅ Swap settled");
        Ok(SwapResult {
            signature: signature.to_string(),
            input_amount: amount,
            output_amount,
            price: output_amount / amount,
            venue: route.best_route,
        })
    }

    /// The route's quote when it covers exactly `raw_amount`, otherwise a fresh one
    async fn quote_for(
        &self,
        venue: &Arc<dyn VenueClient>,
        route: &Route,
        raw_amount: u64,
    ) -> Result<VenueQuote, ExecutionError> {
        if route.quote.in_amount == raw_amount {
            return Ok(route.quote.clone());
        }
        debug!(venue = %route.best_route, raw_amount, "Re-quoting for execution amount");
        let request = QuoteRequest {
            input_mint: route.input_mint,
            output_mint: route.output_mint,
            amount: raw_amount,
            slippage_bps: self.slippage_bps,
        };
        Ok(venue.quote(&request).await?)
    }

    async fn output_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Option<Decimal> {
        match self.chain.token_balance(owner, mint).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!("⚠️ Could not read output balance: {}", e);
                None
            }
        }
    }
}
