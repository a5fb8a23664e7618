// src/app.rs
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::{
    OrchestratorSettings, StrategyMonitor, SwapExecutor, SwapSink, TokenGuard,
    TreasurySwapOrchestrator,
};
use crate::config::{Config, WalletCfg};
use crate::domain::ledger::{RecordStore, TransactionalLedger};
use crate::domain::lock::LockManager;
use crate::domain::pending::PendingLedger;
use crate::domain::price::{PriceCache, PriceFeed};
use crate::exchanges::api_clients::JupiterPriceClient;
use crate::exchanges::types::Quote;
use crate::exchanges::{create_venue_set, RouteResolver, VenueSet};
use crate::infrastructure::blockchain::{
    EnvKeyProvider, FileKeyProvider, KeyProvider, SolanaChain, TreasuryChain,
};
use crate::infrastructure::storage::MemoryRecordStore;
use crate::shared::errors::AppError;
use crate::shared::types::{parse_mint, parse_token};

/// Every long-lived service, constructed once and shared by `Arc`
pub struct TreasuryServices {
    pub config: Config,
    pub treasury: Pubkey,
    pub chain: Arc<dyn TreasuryChain>,
    pub ledger: TransactionalLedger,
    pub locks: LockManager,
    pub pending: Arc<PendingLedger>,
    pub prices: Arc<PriceCache>,
    pub resolver: Arc<RouteResolver>,
    pub orchestrator: Arc<TreasurySwapOrchestrator>,
    pub monitor: StrategyMonitor,
}

impl TreasuryServices {
    /// Production wiring: Solana RPC, HTTP venues, Jupiter prices, in-memory ledger
    pub fn build(config: Config) -> Result<Self> {
        let chain = Arc::new(
            SolanaChain::new(config.rpc.url.clone(), &config.rpc.commitment)
                .context("create RPC client")?,
        );
        let venues = create_venue_set(&config.venues).context("create venue clients")?;
        let feed = Arc::new(
            JupiterPriceClient::new(&config.venues.jupiter_price_url, config.venues.jupiter_api_key.clone())
                .context("create price client")?,
        );
        let keys = key_provider(&config.wallet);
        Self::with_parts(config, chain, venues, feed, keys, Arc::new(MemoryRecordStore::new()))
    }

    pub fn with_parts(
        config: Config,
        chain: Arc<dyn TreasuryChain>,
        venues: VenueSet,
        feed: Arc<dyn PriceFeed>,
        keys: Arc<dyn KeyProvider>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| AppError::ConfigError(e.to_string()))?;
        let treasury = parse_mint(&config.wallet.treasury)
            .map_err(|e| AppError::ConfigError(format!("invalid treasury wallet {}", e)))?;
        if venues.is_empty() {
            return Err(AppError::ConfigError("no venues enabled".into()).into());
        }
        match keys.signing_key() {
            Some(key) if key.pubkey() != treasury => {
                return Err(AppError::ConfigError(format!(
                    "signing key {} is not the treasury wallet {}",
                    key.pubkey(),
                    treasury
                ))
                .into());
            }
            Some(_) => {}
            None => warn!("⚠️ No signing key available yet, swaps will fail until one is provided"),
        }

        let ledger = TransactionalLedger::new(store.clone());
        let locks = LockManager::new(store.clone());
        let pending = Arc::new(PendingLedger::new(store));
        let prices = Arc::new(PriceCache::new(
            feed,
            Duration::from_secs(config.monitor.price_ttl_secs),
        ));

        let resolver = Arc::new(RouteResolver::new(
            venues.clone(),
            chain.clone(),
            prices.clone(),
            config.retry.clone(),
            config.timeouts.quote(),
            config.venues.slippage_bps,
        ));
        let executor = Arc::new(SwapExecutor::new(
            venues,
            chain.clone(),
            config.timeouts.submit(),
            config.venues.slippage_bps,
        ));
        let guard = TokenGuard::new(chain.clone(), prices.clone(), config.timeouts.probe());

        let orchestrator = Arc::new(TreasurySwapOrchestrator::new(
            ledger.clone(),
            locks.clone(),
            pending.clone(),
            resolver.clone(),
            executor,
            guard,
            chain.clone(),
            keys,
            treasury,
            OrchestratorSettings::from_config(&config),
        ));
        let monitor = StrategyMonitor::new(
            ledger.clone(),
            locks.clone(),
            prices.clone(),
            orchestrator.clone() as Arc<dyn SwapSink>,
            Duration::from_secs(config.monitor.interval_secs),
            config.timeouts.lock_ttl(),
        );

        info!(
            treasury = %treasury,
            venues = ?resolver.venues().labels(),
            "✅ Treasury services ready"
        );
        Ok(Self {
            config,
            treasury,
            chain,
            ledger,
            locks,
            pending,
            prices,
            resolver,
            orchestrator,
            monitor,
        })
    }

    /// Best route and priced quote for `amount` of `from`
    pub async fn quote(&self, from: &str, to: &str, amount: Decimal) -> Result<Quote> {
        let input = parse_token(from).map_err(|e| anyhow::anyhow!("invalid input token {}", e))?;
        let output = parse_token(to).map_err(|e| anyhow::anyhow!("invalid output token {}", e))?;
        let (route, quote) = self.resolver.quote(&input, &output, amount).await?;
        info!(venue = %route.best_route, "Route resolved");
        Ok(quote)
    }

    /// Treasury balance of `token` with in-flight reservations taken out
    pub async fn available_balance(&self, token: &str) -> Result<(Decimal, Decimal)> {
        let mint = parse_token(token).map_err(|e| anyhow::anyhow!("invalid token {}", e))?;
        let current = self
            .chain
            .token_balance(&self.treasury, &mint)
            .await
            .map_err(|e| AppError::BlockchainError(e.to_string()))?;
        let available = self.pending.available_balance(&mint.to_string(), current).await?;
        Ok((current, available))
    }
}

/// Key file when configured, otherwise the base58 env var
pub fn key_provider(wallet: &WalletCfg) -> Arc<dyn KeyProvider> {
    match &wallet.keypair {
        Some(path) => Arc::new(FileKeyProvider::new(path)),
        None => Arc::new(EnvKeyProvider::new(wallet.keypair_env.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::swap::{SwapReason, SwapRequest};
    use crate::exchanges::types::VenueLabel;
    use crate::exchanges::VenueClient;
    use crate::shared::types::SOL_MINT;
    use crate::testing::{sol, usdc_mint, FakeChain, FakeKeyProvider, FakePriceFeed, FakeVenue, USDC_MINT};
    use rust_decimal_macros::dec;
    use solana_sdk::signature::{Keypair, Signer};

    fn services(keypair: Keypair) -> TreasuryServices {
        let config = Config::from_toml(&format!(
            r#"
            [rpc]
            url = "http://localhost:8899"

            [wallet]
            treasury = "{}"

            [limits]
            treasury_impact_ceiling_pct = "3"
            "#,
            keypair.pubkey()
        ))
        .unwrap();

        let chain = Arc::new(FakeChain::new().with_balance(&sol(), dec!(20)));
        chain.settle_with(&[(sol(), dec!(-2)), (usdc_mint(), dec!(296))]);
        let feed = FakePriceFeed::new()
            .with_price(SOL_MINT, dec!(150))
            .with_price(USDC_MINT, dec!(1));
        let venue = FakeVenue::new(VenueLabel::Raydium).with_rate(dec!(0.148));

        TreasuryServices::with_parts(
            config,
            chain,
            VenueSet::new(vec![Arc::new(venue) as Arc<dyn VenueClient>]),
            Arc::new(feed),
            Arc::new(FakeKeyProvider::new(keypair)),
            Arc::new(MemoryRecordStore::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_wired_services_execute_a_swap() {
        let services = services(Keypair::new());
        assert_eq!(services.orchestrator.settings().treasury_impact_ceiling_pct, dec!(3));

        let quote = services.quote("SOL", USDC_MINT, dec!(2)).await.unwrap();
        assert_eq!(quote.price, dec!(148));
        assert_eq!(quote.reference_price, Some(dec!(150)));

        let result = services
            .orchestrator
            .execute_swap(SwapRequest::new("SOL", USDC_MINT, "2", SwapReason::ProposalPassed, "governance"))
            .await
            .unwrap();
        assert_eq!(result.output_amount, dec!(296));
        assert_eq!(result.venue, VenueLabel::Raydium);

        let (current, available) = services.available_balance("SOL").await.unwrap();
        assert_eq!(current, dec!(18));
        assert_eq!(available, dec!(18));
    }

    #[test]
    fn test_rejects_bad_treasury_and_empty_venues() {
        let config = Config::with_defaults("http://localhost:8899", "not-a-key");
        let err = TreasuryServices::with_parts(
            config,
            Arc::new(FakeChain::new()),
            VenueSet::new(vec![Arc::new(FakeVenue::new(VenueLabel::Jupiter)) as Arc<dyn VenueClient>]),
            Arc::new(FakePriceFeed::new()),
            Arc::new(FakeKeyProvider::empty()),
            Arc::new(MemoryRecordStore::new()),
        );
        assert!(matches!(
            err.err().and_then(|e| e.downcast::<AppError>().ok()),
            Some(AppError::ConfigError(_))
        ));

        let config = Config::with_defaults("http://localhost:8899", Pubkey::new_unique().to_string());
        let err = TreasuryServices::with_parts(
            config,
            Arc::new(FakeChain::new()),
            VenueSet::default(),
            Arc::new(FakePriceFeed::new()),
            Arc::new(FakeKeyProvider::empty()),
            Arc::new(MemoryRecordStore::new()),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_signing_key_for_another_wallet_is_rejected() {
        let config = Config::with_defaults("http://localhost:8899", Pubkey::new_unique().to_string());
        let err = TreasuryServices::with_parts(
            config,
            Arc::new(FakeChain::new()),
            VenueSet::new(vec![Arc::new(FakeVenue::new(VenueLabel::Jupiter)) as Arc<dyn VenueClient>]),
            Arc::new(FakePriceFeed::new()),
            Arc::new(FakeKeyProvider::new(Keypair::new())),
            Arc::new(MemoryRecordStore::new()),
        );
        assert!(matches!(
            err.err().and_then(|e| e.downcast::<AppError>().ok()),
            Some(AppError::ConfigError(message)) if message.contains("not the treasury wallet")
        ));
    }

    #[test]
    fn test_inconsistent_config_is_rejected_at_wiring() {
        let keypair = Keypair::new();
        let mut config = Config::with_defaults("http://localhost:8899", keypair.pubkey().to_string());
        config.monitor.interval_secs = 0;
        let err = TreasuryServices::with_parts(
            config,
            Arc::new(FakeChain::new()),
            VenueSet::new(vec![Arc::new(FakeVenue::new(VenueLabel::Jupiter)) as Arc<dyn VenueClient>]),
            Arc::new(FakePriceFeed::new()),
            Arc::new(FakeKeyProvider::new(keypair)),
            Arc::new(MemoryRecordStore::new()),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_key_provider_prefers_file() {
        let wallet = WalletCfg {
            treasury: Pubkey::new_unique().to_string(),
            keypair: Some("/nonexistent/id.json".into()),
            keypair_env: "TREASURY_TEST_UNSET_KEY".into(),
        };
        assert!(key_provider(&wallet).signing_key().is_none());
    }
}
