//! Price domain - reference USD prices and their short-lived cache

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::shared::errors::VenueError;

/// Source of reference USD prices
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// USD price of one UI unit of `mint`; `VenueError::NoPrice` when the feed has none
    async fn usd_price(&self, mint: &str) -> Result<Decimal, VenueError>;
}

/// Price data point
#[derive(Debug, Clone)]
pub struct PriceData {
    pub price: Decimal,
    pub fetched_at: Instant,
}

/// Caches feed prices for a freshness window so monitors and quotes
/// don't hit the feed on every call
pub struct PriceCache {
    feed: Arc<dyn PriceFeed>,
    ttl: Duration,
    entries: RwLock<HashMap<String, PriceData>>,
}

impl PriceCache {
    pub fn new(feed: Arc<dyn PriceFeed>, ttl: Duration) -> Self {
        Self {
            feed,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached price if still fresh
    pub async fn cached(&self, mint: &str) -> Option<Decimal> {
        let entries = self.entries.read().await;
        entries
            .get(mint)
            .filter(|data| data.fetched_at.elapsed() < self.ttl)
            .map(|data| data.price)
    }

    /// Fresh cached price, or a new one from the feed
    pub async fn price(&self, mint: &str) -> Result<Decimal, VenueError> {
        if let Some(price) = self.cached(mint).await {
            return Ok(price);
        }
        let price = self.feed.usd_price(mint).await?;
        self.entries.write().await.insert(
            mint.to_string(),
            PriceData {
                price,
                fetched_at: Instant::now(),
            },
        );
        Ok(price)
    }

    /// Like [`PriceCache::price`] but treats any failure as "no reference price"
    pub async fn reference_price(&self, mint: &str) -> Option<Decimal> {
        match self.price(mint).await {
            Ok(price) if price > Decimal::ZERO => Some(price),
            Ok(_) => None,
            Err(e) => {
                debug!(mint, error = %e, "no reference price");
                None
            }
        }
    }

    pub async fn invalidate(&self, mint: &str) {
        self.entries.write().await.remove(mint);
    }
}
