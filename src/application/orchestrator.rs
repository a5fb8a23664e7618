//! Treasury swap orchestration
//!
//! Every request walks `received → validated → locked → quoted → executing` and ends
//! `executed` or `failed`. Validation happens before the per-request lock is taken;
//! everything after it runs inside a single ledger transaction that is committed with
//! the settlement records or rolled back, in which case a `swap_failed` record is
//! written on its own. The lock and the pending reservation are always released.

use async_trait::async_trait;
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signer;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

use crate::application::swap_executor::SwapExecutor;
use crate::application::token_guard::TokenGuard;
use crate::config::Config;
use crate::domain::ledger::{
    LedgerRecord, LedgerTransaction, NewRecord, RecordContent, RecordFilter, RecordId, RecordKind,
    SwapCompleted, SwapExecutionResult, SwapFailed, TransactionalLedger,
};
use crate::domain::lock::LockManager;
use crate::domain::pending::{PendingKind, PendingLedger, PendingTransaction, Reservation};
use crate::domain::swap::{
    SwapReason, SwapRequest, SwapResult, SwapStatus, TransactionStatus, TreasuryTransaction,
};
use crate::exchanges::RouteResolver;
use crate::infrastructure::blockchain::{KeyProvider, TreasuryChain};
use crate::shared::errors::{ExecutionError, LedgerError, SwapError, ValidationError};
use crate::shared::types::parse_token;

/// Where swap requests go. The orchestrator is the production implementation;
/// the strategy monitor only ever talks to this seam.
#[async_trait]
pub trait SwapSink: Send + Sync {
    async fn submit(&self, request: SwapRequest) -> Result<SwapResult, SwapError>;
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub treasury_impact_ceiling_pct: Decimal,
    pub strategy_impact_ceiling_pct: Decimal,
    /// Per-swap ceiling keyed by input mint, whatever spelling the config used
    pub max_swap_amount: HashMap<Pubkey, Decimal>,
    pub lock_ttl: Duration,
    pub pending_ttl: Duration,
    pub swap_attempt_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            treasury_impact_ceiling_pct: config.limits.treasury_impact_ceiling_pct,
            strategy_impact_ceiling_pct: config.limits.strategy_impact_ceiling_pct,
            max_swap_amount: swap_ceilings(&config.limits.max_swap_amount),
            lock_ttl: config.timeouts.lock_ttl(),
            pending_ttl: config.timeouts.pending_ttl(),
            swap_attempt_timeout: config.timeouts.swap_attempt(),
        }
    }

    /// Impact ceiling for the context a request comes from
    pub fn impact_ceiling(&self, reason: SwapReason) -> Decimal {
        match reason {
            SwapReason::StrategyTriggered => self.strategy_impact_ceiling_pct,
            SwapReason::ProposalPassed | SwapReason::Manual => self.treasury_impact_ceiling_pct,
        }
    }
}

/// Ceilings keyed by mint; when a symbol and its mint are both configured the lower wins
fn swap_ceilings(configured: &HashMap<String, Decimal>) -> HashMap<Pubkey, Decimal> {
    let mut ceilings: HashMap<Pubkey, Decimal> = HashMap::new();
    for (token, &ceiling) in configured {
        match parse_token(token) {
            Ok(mint) => {
                let entry = ceilings.entry(mint).or_insert(ceiling);
                *entry = (*entry).min(ceiling);
            }
            Err(e) => warn!(error = %e, "ignoring per-swap ceiling for unparseable token"),
        }
    }
    ceilings
}

/// Stored request record and the version our next status write expects
struct TrackedRequest {
    id: RecordId,
    version: u64,
    status: SwapStatus,
}

impl TrackedRequest {
    fn from_record(record: &LedgerRecord) -> Option<Self> {
        match &record.content {
            RecordContent::SwapRequest(request) => Some(Self {
                id: record.id,
                version: record.version,
                status: request.status,
            }),
            _ => None,
        }
    }
}

pub struct TreasurySwapOrchestrator {
    ledger: TransactionalLedger,
    locks: LockManager,
    pending: Arc<PendingLedger>,
    resolver: Arc<RouteResolver>,
    executor: Arc<SwapExecutor>,
    guard: TokenGuard,
    chain: Arc<dyn TreasuryChain>,
    keys: Arc<dyn KeyProvider>,
    treasury: Pubkey,
    settings: OrchestratorSettings,
    holder: String,
}

impl TreasurySwapOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: TransactionalLedger,
        locks: LockManager,
        pending: Arc<PendingLedger>,
        resolver: Arc<RouteResolver>,
        executor: Arc<SwapExecutor>,
        guard: TokenGuard,
        chain: Arc<dyn TreasuryChain>,
        keys: Arc<dyn KeyProvider>,
        treasury: Pubkey,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            ledger,
            locks,
            pending,
            resolver,
            executor,
            guard,
            chain,
            keys,
            treasury,
            settings,
            holder: format!("orchestrator-{}", crate::shared::utils::generate_id()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run one swap request to a terminal state
    pub async fn execute_swap(&self, request: SwapRequest) -> Result<SwapResult, SwapError> {
        let span = tracing::info_span!("swap", request_id = %request.request_id, reason = request.reason.as_str());
        let outcome = self.run(&request).instrument(span).await;
        match &outcome {
            Ok(result) => info!(
                request_id = %request.request_id,
                signature = %result.signature,
                output = %result.output_amount,
                "✅ Swap executed"
            ),
            Err(e) => warn!(request_id = %request.request_id, error = %e, "❌ Swap failed"),
        }
        outcome
    }

    async fn run(&self, request: &SwapRequest) -> Result<SwapResult, SwapError> {
        let amount = request.parsed_amount()?;
        // Duplicates are reported before validation, whose balance check would
        // otherwise count the in-flight original's own reservation against them
        if self.pending.is_pending(&request.request_id).await? {
            let err = SwapError::LockBusy(request.lock_key());
            self.record_failure(request, None, SwapStatus::Received, &err).await;
            return Err(err);
        }
        if let Some(existing) = self.find_request(&request.request_id).await? {
            if matches!(existing.status, SwapStatus::Executed | SwapStatus::Executing) {
                return Err(SwapError::AlreadyProcessed(request.request_id.clone()));
            }
        }
        let (from, to) = self.validate(request, amount).await?;

        let key = request.lock_key();
        let Some(guard) = self.locks.acquire(&key, &self.holder, self.settings.lock_ttl).await? else {
            let err = SwapError::LockBusy(key);
            self.record_failure(request, None, SwapStatus::Validated, &err).await;
            return Err(err);
        };

        let outcome = self.locked(request, amount, from, to).await;

        if let Err(e) = guard.release().await {
            error!(key = %request.lock_key(), error = %e, "lock release failed, relying on expiry");
        }
        outcome
    }

    /// Everything done while holding `swap-<requestId>`
    async fn locked(
        &self,
        request: &SwapRequest,
        amount: Decimal,
        from: Pubkey,
        to: Pubkey,
    ) -> Result<SwapResult, SwapError> {
        let mut tracked = self.open_request(request).await?;
        if matches!(tracked.status, SwapStatus::Executed | SwapStatus::Executing) {
            return Err(SwapError::AlreadyProcessed(request.request_id.clone()));
        }
        if let Err(e) = self.advance(request, &mut tracked, SwapStatus::Locked).await {
            let err = SwapError::from(e);
            self.record_failure(request, Some(&mut tracked), SwapStatus::Validated, &err).await;
            return Err(err);
        }

        let reservation = match self.reserve(request, amount, &from).await {
            Ok(reservation) => reservation,
            Err(err) => {
                self.record_failure(request, Some(&mut tracked), SwapStatus::Locked, &err).await;
                return Err(err);
            }
        };

        let budget = self.settings.swap_attempt_timeout;
        let outcome = match tokio::time::timeout(
            budget,
            self.settle(request, &mut tracked, amount, from, to),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(SwapError::Timeout(budget)),
        };

        if let Err(err) = &outcome {
            let stage = tracked.status;
            self.record_failure(request, Some(&mut tracked), stage, err).await;
        }
        if let Err(e) = self.pending.release(&reservation.transaction_id).await {
            error!(transaction_id = %reservation.transaction_id, error = %e, "pending release failed, relying on expiry");
        }
        outcome
    }

    /// Steps 3–7: one ledger transaction around quote, execution and the result records
    async fn settle(
        &self,
        request: &SwapRequest,
        tracked: &mut TrackedRequest,
        amount: Decimal,
        from: Pubkey,
        to: Pubkey,
    ) -> Result<SwapResult, SwapError> {
        let mut tx = self.ledger.begin();
        match self.settle_in(&mut tx, request, tracked, amount, from, to).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if tx.rollback() {
                    info!(request_id = %request.request_id, "↩️ Ledger transaction rolled back");
                }
                Err(e)
            }
        }
    }

    async fn settle_in(
        &self,
        tx: &mut LedgerTransaction,
        request: &SwapRequest,
        tracked: &mut TrackedRequest,
        amount: Decimal,
        from: Pubkey,
        to: Pubkey,
    ) -> Result<SwapResult, SwapError> {
        let (route, quote) = self.resolver.quote(&from, &to, amount).await?;
        self.advance(request, tracked, SwapStatus::Quoted).await?;

        let ceiling = self.settings.impact_ceiling(request.reason);
        info!(venue = %route.best_route, price = %quote.price, impact = %quote.impact, %ceiling, "💱 Quote received");
        if quote.impact > ceiling {
            return Err(SwapError::PriceImpactExceeded {
                impact: quote.impact,
                ceiling,
            });
        }

        let signing_key = self.keys.signing_key().ok_or(ExecutionError::MissingSigningKey)?;
        if signing_key.pubkey() != self.treasury {
            return Err(ExecutionError::KeyMismatch {
                expected: self.treasury.to_string(),
                found: signing_key.pubkey().to_string(),
            }
            .into());
        }
        self.advance(request, tracked, SwapStatus::Executing).await?;
        let result = self.executor.execute(&route, &signing_key, amount).await?;

        let request_id = request.request_id.clone();
        tx.create(
            NewRecord::new(RecordContent::TreasuryTransaction(TreasuryTransaction {
                signature: result.signature.clone(),
                from: request.from_token.clone(),
                to: request.to_token.clone(),
                amount,
                token: from.to_string(),
                status: TransactionStatus::Executed,
                initiator: request.source_agent.clone(),
                created_at: request.created_at,
                updated_at: chrono::Utc::now(),
            }))
            .correlated(request_id.clone()),
        )?;
        tx.create(
            NewRecord::new(RecordContent::SwapExecutionResult(SwapExecutionResult {
                request_id: request_id.clone(),
                result: result.clone(),
            }))
            .correlated(request_id.clone()),
        )?;
        tx.create(
            NewRecord::new(RecordContent::SwapCompleted(SwapCompleted {
                request_id: request_id.clone(),
                from_token: request.from_token.clone(),
                to_token: request.to_token.clone(),
                signature: result.signature.clone(),
                reason: request.reason,
                source_id: request.source_id.clone(),
            }))
            .correlated(request_id),
        )?;
        tx.update(
            tracked.id,
            RecordContent::SwapRequest(request.with_status(SwapStatus::Executed)),
            tracked.version,
        )?;
        tx.commit().await?;
        tracked.version += 1;
        tracked.status = SwapStatus::Executed;
        Ok(result)
    }

    async fn validate(
        &self,
        request: &SwapRequest,
        amount: Decimal,
    ) -> Result<(Pubkey, Pubkey), ValidationError> {
        let from = parse_token(&request.from_token).map_err(ValidationError::InvalidMint)?;
        let to = parse_token(&request.to_token).map_err(ValidationError::InvalidMint)?;
        if from == to {
            return Err(ValidationError::SameToken(request.from_token.clone()));
        }

        if let Some(&ceiling) = self.settings.max_swap_amount.get(&from) {
            if amount > ceiling {
                return Err(ValidationError::ExceedsSwapCeiling {
                    requested: amount,
                    ceiling,
                });
            }
        }

        self.guard.check(&from).await?;
        self.guard.check(&to).await?;

        let current = self.current_balance(&from).await?;
        let available = self
            .pending
            .available_balance(&from.to_string(), current)
            .await
            .map_err(|e| ValidationError::BalanceUnavailable(e.to_string()))?;
        if amount > available {
            return Err(ValidationError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        Ok((from, to))
    }

    async fn reserve(
        &self,
        request: &SwapRequest,
        amount: Decimal,
        from: &Pubkey,
    ) -> Result<Reservation, SwapError> {
        let current = self.current_balance(from).await?;
        let pending = PendingTransaction::new(
            request.request_id.clone(),
            PendingKind::Swap,
            from.to_string(),
            amount,
            self.settings.pending_ttl,
        );
        Ok(self.pending.reserve(pending, current).await?)
    }

    async fn current_balance(&self, mint: &Pubkey) -> Result<Decimal, ValidationError> {
        self.chain
            .token_balance(&self.treasury, mint)
            .await
            .map_err(|e| ValidationError::BalanceUnavailable(e.to_string()))
    }

    async fn find_request(&self, request_id: &str) -> Result<Option<TrackedRequest>, LedgerError> {
        let records = self
            .ledger
            .query(&RecordFilter::kind(RecordKind::SwapRequest).correlated(request_id))
            .await?;
        Ok(records.iter().rev().find_map(TrackedRequest::from_record))
    }

    /// The request's ledger record, created on first sight
    async fn open_request(&self, request: &SwapRequest) -> Result<TrackedRequest, LedgerError> {
        let key = format!("request-{}", request.request_id);
        let record = NewRecord::new(RecordContent::SwapRequest(
            request.with_status(SwapStatus::Validated),
        ))
        .correlated(request.request_id.clone());
        if let Some(stored) = self.ledger.store().create_exclusive(&key, record).await? {
            return TrackedRequest::from_record(&stored)
                .ok_or_else(|| LedgerError::Decode(format!("record {} is not a swap request", stored.id)));
        }
        self.find_request(&request.request_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(key))
    }

    /// Compare-and-swap the request's status
    async fn advance(
        &self,
        request: &SwapRequest,
        tracked: &mut TrackedRequest,
        status: SwapStatus,
    ) -> Result<(), LedgerError> {
        let patch = RecordContent::SwapRequest(request.with_status(status));
        if !self.ledger.update_with_version(tracked.id, patch, tracked.version).await? {
            let found = self
                .ledger
                .get(tracked.id)
                .await?
                .map(|record| record.version)
                .unwrap_or_default();
            return Err(LedgerError::VersionConflict {
                id: tracked.id.to_string(),
                expected: tracked.version,
                found,
            });
        }
        tracked.version += 1;
        tracked.status = status;
        Ok(())
    }

    /// Failure record written outside any transaction, plus the `failed` status when we own the request
    async fn record_failure(
        &self,
        request: &SwapRequest,
        tracked: Option<&mut TrackedRequest>,
        stage: SwapStatus,
        err: &SwapError,
    ) {
        let failed = NewRecord::new(RecordContent::SwapFailed(SwapFailed {
            request_id: request.request_id.clone(),
            stage,
            error: err.to_string(),
            reason: request.reason,
            source_id: request.source_id.clone(),
        }))
        .correlated(request.request_id.clone());
        if let Err(e) = self.ledger.create(failed).await {
            error!(request_id = %request.request_id, error = %e, "could not write swap_failed record");
        }
        if let Some(tracked) = tracked {
            if let Err(e) = self.advance(request, tracked, SwapStatus::Failed).await {
                error!(request_id = %request.request_id, error = %e, "could not mark request failed");
            }
        }
    }
}

#[async_trait]
impl SwapSink for TreasurySwapOrchestrator {
    async fn submit(&self, request: SwapRequest) -> Result<SwapResult, SwapError> {
        self.execute_swap(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::price::{PriceCache, PriceFeed};
    use crate::exchanges::types::VenueLabel;
    use crate::exchanges::{VenueClient, VenueSet};
    use crate::infrastructure::storage::MemoryRecordStore;
    use crate::shared::errors::ChainError;
    use crate::shared::retry::RetryPolicy;
    use crate::shared::types::SOL_MINT;
    use crate::testing::{sol, usdc_mint, FakeChain, FakeKeyProvider, FakePriceFeed, FakeVenue, USDC_MINT};
    use rust_decimal_macros::dec;
    use solana_sdk::signature::{Keypair, Signer};

    struct Harness {
        orchestrator: Arc<TreasurySwapOrchestrator>,
        ledger: TransactionalLedger,
        locks: LockManager,
        pending: Arc<PendingLedger>,
        chain: Arc<FakeChain>,
        venue: Arc<FakeVenue>,
    }

    impl Harness {
        async fn count(&self, kind: RecordKind) -> usize {
            self.ledger.query(&RecordFilter::kind(kind)).await.unwrap().len()
        }

        async fn request_status(&self, request_id: &str) -> SwapStatus {
            let records = self
                .ledger
                .query(&RecordFilter::kind(RecordKind::SwapRequest).correlated(request_id))
                .await
                .unwrap();
            match &records.last().unwrap().content {
                RecordContent::SwapRequest(request) => request.status,
                other => panic!("unexpected record {:?}", other),
            }
        }
    }

    /// 100 SOL treasury, SOL at $150, USDC at $1; each swap settles −10 SOL / +1470 USDC
    fn harness_with(rate: Decimal, keys: FakeKeyProvider, treasury: Pubkey) -> Harness {
        build(rate, keys, treasury, dec!(50))
    }

    fn build(rate: Decimal, keys: FakeKeyProvider, treasury: Pubkey, sol_ceiling: Decimal) -> Harness {
        let store = Arc::new(MemoryRecordStore::new());
        let ledger = TransactionalLedger::new(store.clone());
        let locks = LockManager::new(store.clone());
        let pending = Arc::new(PendingLedger::new(store));

        let chain = Arc::new(FakeChain::new().with_balance(&sol(), dec!(100)));
        chain.settle_with(&[(sol(), dec!(-10)), (usdc_mint(), dec!(1470))]);
        let feed = FakePriceFeed::new()
            .with_price(SOL_MINT, dec!(150))
            .with_price(USDC_MINT, dec!(1));
        let prices = Arc::new(PriceCache::new(Arc::new(feed) as Arc<dyn PriceFeed>, Duration::from_secs(10)));

        let venue = Arc::new(FakeVenue::new(VenueLabel::Jupiter).with_rate(rate));
        let venues = VenueSet::new(vec![venue.clone() as Arc<dyn VenueClient>]);
        let resolver = Arc::new(RouteResolver::new(
            venues.clone(),
            chain.clone(),
            prices.clone(),
            RetryPolicy::no_retry(),
            Duration::from_secs(1),
            100,
        ));
        let executor = Arc::new(SwapExecutor::new(venues, chain.clone(), Duration::from_secs(2), 100));
        let guard = TokenGuard::new(chain.clone(), prices, Duration::from_millis(500));

        let mut config = Config::with_defaults("http://localhost:8899", treasury.to_string());
        config.limits.max_swap_amount.insert("SOL".into(), sol_ceiling);
        let settings = OrchestratorSettings::from_config(&config);

        let orchestrator = Arc::new(TreasurySwapOrchestrator::new(
            ledger.clone(),
            locks.clone(),
            pending.clone(),
            resolver,
            executor,
            guard,
            chain.clone(),
            Arc::new(keys),
            treasury,
            settings,
        ));
        Harness {
            orchestrator,
            ledger,
            locks,
            pending,
            chain,
            venue,
        }
    }

    fn harness(rate: Decimal) -> Harness {
        let keypair = Keypair::new();
        let treasury = keypair.pubkey();
        harness_with(rate, FakeKeyProvider::new(keypair), treasury)
    }

    fn sol_to_usdc(id: &str, amount: &str, reason: SwapReason) -> SwapRequest {
        SwapRequest::new("SOL", USDC_MINT, amount, reason, "treasury-agent").with_id(id)
    }

    // Raw USDC per raw lamport; 0.147 is a price of 147 against the 150 reference
    const RATE_2_PCT: Decimal = dec!(0.147);
    const RATE_8_PCT: Decimal = dec!(0.138);

    #[tokio::test]
    async fn test_swap_within_ceiling_executes_and_records() {
        let h = harness(RATE_2_PCT);
        let result = h
            .orchestrator
            .execute_swap(sol_to_usdc("req-1", "10", SwapReason::Manual))
            .await
            .unwrap();

        assert_eq!(result.output_amount, dec!(1470));
        assert_eq!(result.price, dec!(147));
        assert_eq!(result.venue, VenueLabel::Jupiter);

        let txs = h
            .ledger
            .query(&RecordFilter::kind(RecordKind::TreasuryTransaction))
            .await
            .unwrap();
        assert_eq!(txs.len(), 1);
        match &txs[0].content {
            RecordContent::TreasuryTransaction(tx) => {
                assert_eq!(tx.status, TransactionStatus::Executed);
                assert_eq!(tx.signature, result.signature);
            }
            other => panic!("unexpected record {:?}", other),
        }
        assert_eq!(h.count(RecordKind::SwapExecutionResult).await, 1);
        assert_eq!(h.count(RecordKind::SwapCompleted).await, 1);
        assert_eq!(h.count(RecordKind::SwapFailed).await, 0);
        assert_eq!(h.request_status("req-1").await, SwapStatus::Executed);

        assert!(h.locks.current("swap-req-1").await.unwrap().is_none());
        assert!(!h.pending.is_pending("req-1").await.unwrap());
        assert_eq!(h.chain.balance(&sol()), dec!(90));
    }

    #[tokio::test]
    async fn test_excessive_impact_aborts_before_execution() {
        let h = harness(RATE_8_PCT);
        let err = h
            .orchestrator
            .execute_swap(sol_to_usdc("req-2", "10", SwapReason::Manual))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SwapError::PriceImpactExceeded {
                impact: dec!(8),
                ceiling: dec!(5)
            }
        );
        assert_eq!(h.chain.sent(), 0);
        assert_eq!(h.count(RecordKind::TreasuryTransaction).await, 0);
        assert_eq!(h.count(RecordKind::SwapFailed).await, 1);
        assert_eq!(h.request_status("req-2").await, SwapStatus::Failed);
        assert!(h.locks.current("swap-req-2").await.unwrap().is_none());
        assert!(!h.pending.is_pending("req-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_impact_exactly_at_ceiling_passes() {
        // 142.5 against 150 is exactly 5%
        let h = harness(dec!(0.1425));
        assert!(h
            .orchestrator
            .execute_swap(sol_to_usdc("edge-at", "10", SwapReason::ProposalPassed))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_impact_just_above_ceiling_fails() {
        let h = harness(dec!(0.1424));
        let err = h
            .orchestrator
            .execute_swap(sol_to_usdc("edge-above", "10", SwapReason::ProposalPassed))
            .await
            .unwrap_err();
        assert!(matches!(err, SwapError::PriceImpactExceeded { .. }));
        assert_eq!(h.chain.sent(), 0);
    }

    #[tokio::test]
    async fn test_strategy_swaps_use_the_wider_ceiling() {
        let h = harness(RATE_8_PCT);
        assert!(h
            .orchestrator
            .execute_swap(sol_to_usdc("strat-1", "10", SwapReason::StrategyTriggered))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_same_id_executes_once() {
        let h = harness(RATE_2_PCT);
        h.chain.delay_sends(Duration::from_millis(300));

        let (a, b) = tokio::join!(
            h.orchestrator.execute_swap(sol_to_usdc("dup", "10", SwapReason::Manual)),
            h.orchestrator.execute_swap(sol_to_usdc("dup", "10", SwapReason::Manual)),
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(SwapError::LockBusy(key)) if key == "swap-dup")));
        assert_eq!(h.chain.sent(), 1);
        assert_eq!(h.count(RecordKind::TreasuryTransaction).await, 1);
    }

    #[tokio::test]
    async fn test_resubmitting_executed_request_is_rejected() {
        let h = harness(RATE_2_PCT);
        h.orchestrator
            .execute_swap(sol_to_usdc("once", "10", SwapReason::Manual))
            .await
            .unwrap();
        let err = h
            .orchestrator
            .execute_swap(sol_to_usdc("once", "10", SwapReason::Manual))
            .await
            .unwrap_err();
        assert_eq!(err, SwapError::AlreadyProcessed("once".into()));
        assert_eq!(h.chain.sent(), 1);
        assert_eq!(h.count(RecordKind::TreasuryTransaction).await, 1);
    }

    #[tokio::test]
    async fn test_execution_failure_rolls_back_and_records_failure() {
        let h = harness(RATE_2_PCT);
        h.chain.fail_sends(ChainError::Rpc("blockhash not found".into()));

        let err = h
            .orchestrator
            .execute_swap(sol_to_usdc("boom", "10", SwapReason::Manual))
            .await
            .unwrap_err();
        assert!(matches!(err, SwapError::Execution(ExecutionError::Submission(_))));

        assert_eq!(h.count(RecordKind::TreasuryTransaction).await, 0);
        assert_eq!(h.count(RecordKind::SwapExecutionResult).await, 0);
        assert_eq!(h.count(RecordKind::SwapCompleted).await, 0);

        let failures = h
            .ledger
            .query(&RecordFilter::kind(RecordKind::SwapFailed).correlated("boom"))
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        match &failures[0].content {
            RecordContent::SwapFailed(failed) => assert_eq!(failed.stage, SwapStatus::Executing),
            other => panic!("unexpected record {:?}", other),
        }
        assert_eq!(h.request_status("boom").await, SwapStatus::Failed);
        assert!(h.locks.current("swap-boom").await.unwrap().is_none());
        assert_eq!(h.pending.pending_total(SOL_MINT).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_failed_request_can_be_retried() {
        let h = harness(RATE_2_PCT);
        h.chain.fail_sends(ChainError::Rpc("node unhealthy".into()));
        assert!(h
            .orchestrator
            .execute_swap(sol_to_usdc("retry", "10", SwapReason::Manual))
            .await
            .is_err());

        h.chain.heal_sends();
        assert!(h
            .orchestrator
            .execute_swap(sol_to_usdc("retry", "10", SwapReason::Manual))
            .await
            .is_ok());
        assert_eq!(h.request_status("retry").await, SwapStatus::Executed);
        assert_eq!(h.count(RecordKind::SwapRequest).await, 1);
        assert_eq!(h.count(RecordKind::SwapFailed).await, 1);
        assert_eq!(h.count(RecordKind::TreasuryTransaction).await, 1);
    }

    #[tokio::test]
    async fn test_pending_amounts_reduce_available_balance() {
        let h = harness(RATE_2_PCT);
        h.pending
            .reserve(
                PendingTransaction::new("transfer-1", PendingKind::Transfer, SOL_MINT, dec!(95), Duration::from_secs(600)),
                dec!(100),
            )
            .await
            .unwrap();

        let err = h
            .orchestrator
            .execute_swap(sol_to_usdc("late", "10", SwapReason::Manual))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SwapError::Validation(ValidationError::InsufficientBalance {
                requested: dec!(10),
                available: dec!(5)
            })
        );
        assert_eq!(h.count(RecordKind::SwapRequest).await, 0);
    }

    #[tokio::test]
    async fn test_validation_rejects_before_locking() {
        let h = harness(RATE_2_PCT);
        let same = h
            .orchestrator
            .execute_swap(SwapRequest::new("SOL", SOL_MINT, "1", SwapReason::Manual, "agent"))
            .await
            .unwrap_err();
        assert!(matches!(same, SwapError::Validation(ValidationError::SameToken(_))));

        let too_big = h
            .orchestrator
            .execute_swap(sol_to_usdc("big", "60", SwapReason::Manual))
            .await
            .unwrap_err();
        assert!(matches!(
            too_big,
            SwapError::Validation(ValidationError::ExceedsSwapCeiling { .. })
        ));

        let negative = h
            .orchestrator
            .execute_swap(sol_to_usdc("neg", "-1", SwapReason::Manual))
            .await
            .unwrap_err();
        assert!(matches!(
            negative,
            SwapError::Validation(ValidationError::NonPositiveAmount(_))
        ));
        assert_eq!(h.venue.quotes(), 0);
        assert_eq!(h.count(RecordKind::Lock).await, 0);
    }

    #[tokio::test]
    async fn test_held_lock_is_surfaced_as_busy() {
        let h = harness(RATE_2_PCT);
        let held = h
            .locks
            .acquire("swap-busy", "someone-else", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let err = h
            .orchestrator
            .execute_swap(sol_to_usdc("busy", "10", SwapReason::Manual))
            .await
            .unwrap_err();
        assert_eq!(err, SwapError::LockBusy("swap-busy".into()));
        assert_eq!(h.chain.sent(), 0);
        assert_eq!(h.count(RecordKind::SwapFailed).await, 1);
        held.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_signing_key_fails_execution() {
        let h = harness_with(RATE_2_PCT, FakeKeyProvider::empty(), Pubkey::new_unique());
        let err = h
            .orchestrator
            .execute_swap(sol_to_usdc("nokey", "10", SwapReason::Manual))
            .await
            .unwrap_err();
        assert_eq!(err, SwapError::Execution(ExecutionError::MissingSigningKey));
        assert_eq!(h.request_status("nokey").await, SwapStatus::Failed);
    }

    #[tokio::test]
    async fn test_swap_ceiling_applies_whatever_the_token_spelling() {
        let h = harness(RATE_2_PCT);
        for spelling in [SOL_MINT, "sol", " SOL "] {
            let err = h
                .orchestrator
                .execute_swap(SwapRequest::new(spelling, USDC_MINT, "60", SwapReason::Manual, "agent"))
                .await
                .unwrap_err();
            assert_eq!(
                err,
                SwapError::Validation(ValidationError::ExceedsSwapCeiling {
                    requested: dec!(60),
                    ceiling: dec!(50)
                })
            );
        }
        assert_eq!(h.chain.sent(), 0);
    }

    #[test]
    fn test_symbol_and_mint_ceilings_keep_the_lower() {
        let mut config = Config::with_defaults("http://localhost:8899", Pubkey::new_unique().to_string());
        config.limits.max_swap_amount.insert("SOL".into(), dec!(50));
        config.limits.max_swap_amount.insert(SOL_MINT.into(), dec!(20));
        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(settings.max_swap_amount.len(), 1);
        assert_eq!(settings.max_swap_amount.get(&sol()), Some(&dec!(20)));
    }

    #[tokio::test]
    async fn test_signing_key_must_be_the_treasury() {
        let h = harness_with(RATE_2_PCT, FakeKeyProvider::new(Keypair::new()), Pubkey::new_unique());
        let err = h
            .orchestrator
            .execute_swap(sol_to_usdc("foreign-key", "10", SwapReason::Manual))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SwapError::Execution(ExecutionError::KeyMismatch { .. })
        ));
        assert_eq!(h.venue.builds(), 0);
        assert_eq!(h.chain.sent(), 0);
        assert_eq!(h.chain.balance(&sol()), dec!(100));
        assert_eq!(h.request_status("foreign-key").await, SwapStatus::Failed);
    }

    #[tokio::test]
    async fn test_concurrent_large_duplicate_is_reported_as_busy() {
        let keypair = Keypair::new();
        let treasury = keypair.pubkey();
        let h = build(RATE_2_PCT, FakeKeyProvider::new(keypair), treasury, dec!(80));
        h.chain.delay_sends(Duration::from_millis(300));

        let (a, b) = tokio::join!(
            h.orchestrator.execute_swap(sol_to_usdc("big-dup", "60", SwapReason::Manual)),
            h.orchestrator.execute_swap(sol_to_usdc("big-dup", "60", SwapReason::Manual)),
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(SwapError::LockBusy(key)) if key == "swap-big-dup")));
        assert!(!outcomes.iter().any(|r| matches!(
            r,
            Err(SwapError::Validation(ValidationError::InsufficientBalance { .. }))
        )));
        assert_eq!(h.chain.sent(), 1);
    }

    #[tokio::test]
    async fn test_reserved_request_id_is_busy_before_balance_checks() {
        let h = harness(RATE_2_PCT);
        h.pending
            .reserve(
                PendingTransaction::new("in-flight", PendingKind::Swap, SOL_MINT, dec!(45), Duration::from_secs(600)),
                dec!(100),
            )
            .await
            .unwrap();

        let err = h
            .orchestrator
            .execute_swap(sol_to_usdc("in-flight", "45", SwapReason::Manual))
            .await
            .unwrap_err();
        assert_eq!(err, SwapError::LockBusy("swap-in-flight".into()));
        assert_eq!(h.venue.quotes(), 0);
        assert_eq!(h.count(RecordKind::SwapRequest).await, 0);
        assert!(h.pending.is_pending("in-flight").await.unwrap());
    }
}
