//! Picks the first venue able to quote a pair and prices the quote

use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::price::PriceCache;
use crate::exchanges::types::{Quote, QuoteRequest, Route, VenueQuote};
use crate::exchanges::{VenueClient, VenueSet};
use crate::infrastructure::blockchain::TreasuryChain;
use crate::shared::errors::{RouteError, VenueError};
use crate::shared::retry::RetryPolicy;
use crate::shared::types::{from_base_units, is_launch_venue_mint, to_base_units};

const IMPACT_DP: u32 = 6;

pub struct RouteResolver {
    venues: VenueSet,
    chain: Arc<dyn TreasuryChain>,
    prices: Arc<PriceCache>,
    retry: RetryPolicy,
    quote_timeout: Duration,
    slippage_bps: u16,
}

impl RouteResolver {
    pub fn new(
        venues: VenueSet,
        chain: Arc<dyn TreasuryChain>,
        prices: Arc<PriceCache>,
        retry: RetryPolicy,
        quote_timeout: Duration,
        slippage_bps: u16,
    ) -> Self {
        Self {
            venues,
            chain,
            prices,
            retry,
            quote_timeout,
            slippage_bps,
        }
    }

    pub fn venues(&self) -> &VenueSet {
        &self.venues
    }

    /// First venue, in priority order, returning a usable quote for `amount` (UI units)
    pub async fn resolve(
        &self,
        input: &Pubkey,
        output: &Pubkey,
        amount: Decimal,
    ) -> Result<Route, RouteError> {
        let input_decimals = self.decimals(input).await?;
        let output_decimals = self.decimals(output).await?;
        let raw = to_base_units(amount, input_decimals).map_err(RouteError::AmountConversion)?;
        if raw == 0 {
            return Err(RouteError::AmountConversion(format!(
                "{} rounds to zero at {} decimals",
                amount, input_decimals
            )));
        }

        let request = QuoteRequest {
            input_mint: *input,
            output_mint: *output,
            amount: raw,
            slippage_bps: self.slippage_bps,
        };

        let mut attempts = Vec::new();
        for venue in self.venues.iter() {
            match self.quote_venue(venue.as_ref(), &request).await {
                Ok(quote) if quote.out_amount > 0 => {
                    info!(
                        venue = %quote.venue,
                        in_amount = quote.in_amount,
                        out_amount = quote.out_amount,
                        "✅ Route found"
                    );
                    return Ok(Route {
                        input_mint: *input,
                        output_mint: *output,
                        best_route: quote.venue,
                        is_launch_token: is_launch_venue_mint(input) || is_launch_venue_mint(output),
                        input_decimals,
                        output_decimals,
                        quote,
                    });
                }
                Ok(_) => {
                    warn!(venue = %venue.label(), "⚠️ Venue quoted zero output");
                    attempts.push(format!("{}: zero output", venue.label()));
                }
                Err(e) => {
                    warn!(venue = %venue.label(), error = %e, "⚠️ Venue failed, trying next");
                    attempts.push(format!("{}: {}", venue.label(), e));
                }
            }
        }

        Err(RouteError::NoViableRoute {
            input: input.to_string(),
            output: output.to_string(),
            attempts,
        })
    }

    /// Resolve and price in one step
    pub async fn quote(
        &self,
        input: &Pubkey,
        output: &Pubkey,
        amount: Decimal,
    ) -> Result<(Route, Quote), RouteError> {
        let route = self.resolve(input, output, amount).await?;
        let quote = self.price_quote(&route).await;
        Ok((route, quote))
    }

    /// Price a resolved route. Impact is measured against fresh reference prices for
    /// both tokens when available, otherwise taken from the venue.
    pub async fn price_quote(&self, route: &Route) -> Quote {
        let venue_quote = &route.quote;
        let in_ui = from_base_units(venue_quote.in_amount, route.input_decimals);
        let out_ui = from_base_units(venue_quote.out_amount, route.output_decimals);
        let price = out_ui.checked_div(in_ui).unwrap_or(Decimal::ZERO);
        let min_output = from_base_units(venue_quote.min_out_amount, route.output_decimals);

        let input = route.input_mint.to_string();
        let output = route.output_mint.to_string();
        let (ref_in, ref_out) =
            tokio::join!(self.reference_price(&input), self.reference_price(&output));

        let measured = match (ref_in, ref_out) {
            (Some(ref_in), Some(ref_out)) => reference_impact(ref_in, ref_out, price),
            _ => None,
        };
        let (impact, reference_price) = match measured {
            Some((impact, expected)) => (impact, Some(expected)),
            None => (
                venue_quote.price_impact_pct.map(|p| p.abs()).unwrap_or(Decimal::ZERO),
                None,
            ),
        };

        Quote {
            price,
            impact: impact.round_dp(IMPACT_DP),
            min_output,
            reference_price,
        }
    }

    /// Re-quote an exact native amount on one venue
    pub async fn requote(&self, route: &Route, amount: u64) -> Result<VenueQuote, VenueError> {
        let venue = self.venues.get(route.best_route).ok_or_else(|| VenueError::Unsupported {
            venue: route.best_route,
            reason: "venue not enabled".into(),
        })?;
        let request = QuoteRequest {
            input_mint: route.input_mint,
            output_mint: route.output_mint,
            amount,
            slippage_bps: self.slippage_bps,
        };
        self.quote_venue(venue.as_ref(), &request).await
    }

    async fn quote_venue(
        &self,
        venue: &dyn VenueClient,
        request: &QuoteRequest,
    ) -> Result<VenueQuote, VenueError> {
        let label = venue.label();
        let timeout = self.quote_timeout;
        self.retry
            .run(
                move || async move {
                    match tokio::time::timeout(timeout, venue.quote(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(VenueError::Timeout(label)),
                    }
                },
                VenueError::is_transient,
            )
            .await
    }

    async fn reference_price(&self, mint: &str) -> Option<Decimal> {
        tokio::time::timeout(self.quote_timeout, self.prices.reference_price(mint))
            .await
            .ok()
            .flatten()
    }

    async fn decimals(&self, mint: &Pubkey) -> Result<u8, RouteError> {
        self.chain
            .token_decimals(mint)
            .await
            .map_err(|e| RouteError::Decimals(format!("{}: {}", mint, e)))
    }
}

/// Impact of `price` against the reference cross price, with that price.
/// `None` when the references cannot produce a usable cross price.
fn reference_impact(ref_in: Decimal, ref_out: Decimal, price: Decimal) -> Option<(Decimal, Decimal)> {
    let expected = ref_in.checked_div(ref_out)?;
    if expected <= Decimal::ZERO {
        return None;
    }
    let impact = expected
        .checked_sub(price)?
        .abs()
        .checked_div(expected)?
        .checked_mul(Decimal::ONE_HUNDRED)?;
    Some((impact, expected))
}
