pub mod api_clients;
pub mod route_resolver;
pub mod types;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;

use crate::config::VenuesCfg;
use crate::exchanges::types::{QuoteRequest, VenueLabel, VenueQuote};
use crate::shared::errors::VenueError;

pub use route_resolver::RouteResolver;

/// A liquidity venue: quotes a pair and builds the unsigned swap for a quote
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn label(&self) -> VenueLabel;

    async fn quote(&self, request: &QuoteRequest) -> Result<VenueQuote, VenueError>;

    /// Unsigned transaction paying from `user` for exactly `quote.in_amount`
    async fn build_swap(
        &self,
        quote: &VenueQuote,
        user: &Pubkey,
    ) -> Result<VersionedTransaction, VenueError>;
}

/// Enabled venues in priority order, shared by the resolver and the executor
#[derive(Clone, Default)]
pub struct VenueSet {
    venues: Vec<Arc<dyn VenueClient>>,
}

impl VenueSet {
    pub fn new(mut venues: Vec<Arc<dyn VenueClient>>) -> Self {
        venues.sort_by_key(|venue| venue.label());
        venues.dedup_by_key(|venue| venue.label());
        Self { venues }
    }

    pub fn get(&self, label: VenueLabel) -> Option<&Arc<dyn VenueClient>> {
        self.venues.iter().find(|venue| venue.label() == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn VenueClient>> {
        self.venues.iter()
    }

    pub fn labels(&self) -> Vec<VenueLabel> {
        self.venues.iter().map(|venue| venue.label()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }
}

pub fn create_venue(label: VenueLabel, config: &VenuesCfg) -> anyhow::Result<Arc<dyn VenueClient>> {
    match label {
        VenueLabel::Jupiter => Ok(Arc::new(api_clients::JupiterClient::new(
            &config.jupiter_url,
            config.jupiter_api_key.clone(),
        )?)),
        VenueLabel::Raydium => Ok(Arc::new(api_clients::RaydiumClient::new(&config.raydium_url)?)),
        VenueLabel::PumpFun => Ok(Arc::new(api_clients::PumpFunClient::new(
            &config.pumpfun_url,
            &config.pumpportal_url,
        )?)),
    }
}

pub fn create_venue_set(config: &VenuesCfg) -> anyhow::Result<VenueSet> {
    let venues = config
        .enabled
        .iter()
        .map(|label| create_venue(*label, config))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(VenueSet::new(venues))
}
