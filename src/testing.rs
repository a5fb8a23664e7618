//! In-process fakes for the chain, venues, price feed and key provider

use async_trait::async_trait;
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::transaction::{Transaction, VersionedTransaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::application::orchestrator::SwapSink;
use crate::domain::price::PriceFeed;
use crate::domain::swap::{SwapRequest, SwapResult};
use crate::exchanges::types::{QuoteRequest, VenueLabel, VenueQuote};
use crate::exchanges::VenueClient;
use crate::infrastructure::blockchain::{KeyProvider, TreasuryChain};
use crate::shared::errors::{ChainError, SwapError, VenueError};
use crate::shared::types::{sol_mint, SOL_MINT};

pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

pub fn usdc_mint() -> Pubkey {
    Pubkey::from_str(USDC_MINT).unwrap()
}

#[derive(Default)]
pub struct FakePriceFeed {
    prices: Mutex<HashMap<String, Decimal>>,
    calls: AtomicUsize,
}

impl FakePriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, mint: &str, price: Decimal) -> Self {
        self.set_price(mint, price);
        self
    }

    pub fn set_price(&self, mint: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(mint.to_string(), price);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceFeed for FakePriceFeed {
    async fn usd_price(&self, mint: &str) -> Result<Decimal, VenueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prices
            .lock()
            .unwrap()
            .get(mint)
            .copied()
            .ok_or_else(|| VenueError::NoPrice(mint.to_string()))
    }
}

/// Treasury chain with in-memory balances for a single owner
pub struct FakeChain {
    balances: Mutex<HashMap<Pubkey, Decimal>>,
    decimals: Mutex<HashMap<Pubkey, u8>>,
    owners: Mutex<HashMap<Pubkey, Option<Pubkey>>>,
    /// Balance changes applied by every confirmed send
    settlement: Mutex<Vec<(Pubkey, Decimal)>>,
    send_error: Mutex<Option<ChainError>>,
    owner_error: Mutex<Option<ChainError>>,
    send_delay: Mutex<Duration>,
    blank_signature: Mutex<bool>,
    sent: AtomicUsize,
}

impl FakeChain {
    pub fn new() -> Self {
        let mut decimals = HashMap::new();
        decimals.insert(sol_mint(), 9);
        decimals.insert(usdc_mint(), 6);
        Self {
            balances: Mutex::new(HashMap::new()),
            decimals: Mutex::new(decimals),
            owners: Mutex::new(HashMap::new()),
            settlement: Mutex::new(Vec::new()),
            send_error: Mutex::new(None),
            owner_error: Mutex::new(None),
            send_delay: Mutex::new(Duration::ZERO),
            blank_signature: Mutex::new(false),
            sent: AtomicUsize::new(0),
        }
    }

    pub fn with_balance(self, mint: &Pubkey, amount: Decimal) -> Self {
        self.balances.lock().unwrap().insert(*mint, amount);
        self
    }

    pub fn with_decimals(self, mint: &Pubkey, decimals: u8) -> Self {
        self.decimals.lock().unwrap().insert(*mint, decimals);
        self
    }

    pub fn set_mint_owner(&self, mint: &Pubkey, owner: Option<Pubkey>) {
        self.owners.lock().unwrap().insert(*mint, owner);
    }

    pub fn fail_mint_owner(&self, error: ChainError) {
        *self.owner_error.lock().unwrap() = Some(error);
    }

    pub fn settle_with(&self, deltas: &[(Pubkey, Decimal)]) {
        *self.settlement.lock().unwrap() = deltas.to_vec();
    }

    pub fn fail_sends(&self, error: ChainError) {
        *self.send_error.lock().unwrap() = Some(error);
    }

    pub fn heal_sends(&self) {
        *self.send_error.lock().unwrap() = None;
    }

    pub fn delay_sends(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = delay;
    }

    pub fn return_blank_signature(&self) {
        *self.blank_signature.lock().unwrap() = true;
    }

    pub fn balance(&self, mint: &Pubkey) -> Decimal {
        self.balances.lock().unwrap().get(mint).copied().unwrap_or_default()
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TreasuryChain for FakeChain {
    async fn token_balance(&self, _owner: &Pubkey, mint: &Pubkey) -> Result<Decimal, ChainError> {
        Ok(self.balance(mint))
    }

    async fn token_decimals(&self, mint: &Pubkey) -> Result<u8, ChainError> {
        self.decimals
            .lock()
            .unwrap()
            .get(mint)
            .copied()
            .ok_or_else(|| ChainError::AccountNotFound(mint.to_string()))
    }

    async fn mint_owner(&self, mint: &Pubkey) -> Result<Option<Pubkey>, ChainError> {
        if let Some(error) = self.owner_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .owners
            .lock()
            .unwrap()
            .get(mint)
            .copied()
            .unwrap_or(Some(spl_token::id())))
    }

    async fn send_and_confirm(&self, tx: &VersionedTransaction) -> Result<Signature, ChainError> {
        let delay = *self.send_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.send_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        {
            let settlement = self.settlement.lock().unwrap().clone();
            let mut balances = self.balances.lock().unwrap();
            for (mint, delta) in settlement {
                *balances.entry(mint).or_default() += delta;
            }
        }
        if *self.blank_signature.lock().unwrap() {
            return Ok(Signature::default());
        }
        Ok(tx.signatures.first().copied().unwrap_or_default())
    }
}

/// Scripted venue
pub struct FakeVenue {
    label: VenueLabel,
    /// Raw output units per raw input unit
    rate: Mutex<Decimal>,
    impact: Mutex<Option<Decimal>>,
    error: Mutex<Option<VenueError>>,
    build_error: Mutex<Option<VenueError>>,
    transient_failures: AtomicU32,
    delay: Mutex<Duration>,
    quotes: AtomicUsize,
    builds: AtomicUsize,
}

impl FakeVenue {
    pub fn new(label: VenueLabel) -> Self {
        Self {
            label,
            rate: Mutex::new(Decimal::ONE),
            impact: Mutex::new(None),
            error: Mutex::new(None),
            build_error: Mutex::new(None),
            transient_failures: AtomicU32::new(0),
            delay: Mutex::new(Duration::ZERO),
            quotes: AtomicUsize::new(0),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn with_rate(self, rate: Decimal) -> Self {
        *self.rate.lock().unwrap() = rate;
        self
    }

    pub fn with_impact(self, impact: Decimal) -> Self {
        self.set_impact(impact);
        self
    }

    pub fn failing(self, error: VenueError) -> Self {
        *self.error.lock().unwrap() = Some(error);
        self
    }

    pub fn failing_builds(self, error: VenueError) -> Self {
        *self.build_error.lock().unwrap() = Some(error);
        self
    }

    /// Fail the next `n` quotes with a network error
    pub fn flaky(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn slow(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub fn set_impact(&self, impact: Decimal) {
        *self.impact.lock().unwrap() = Some(impact);
    }

    pub fn quotes(&self) -> usize {
        self.quotes.load(Ordering::SeqCst)
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VenueClient for FakeVenue {
    fn label(&self) -> VenueLabel {
        self.label
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<VenueQuote, VenueError> {
        self.quotes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.error.lock().unwrap().clone() {
            return Err(error);
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(VenueError::Network("connection reset".into()));
        }

        let rate = *self.rate.lock().unwrap();
        let out = (Decimal::from(request.amount) * rate).trunc();
        let out_amount = u64::try_from(out).unwrap_or(u64::MAX);
        Ok(VenueQuote {
            venue: self.label,
            in_amount: request.amount,
            out_amount,
            min_out_amount: out_amount - out_amount / 100,
            price_impact_pct: *self.impact.lock().unwrap(),
            payload: serde_json::json!({
                "inputMint": request.input_mint.to_string(),
                "outputMint": request.output_mint.to_string(),
            }),
        })
    }

    async fn build_swap(
        &self,
        _quote: &VenueQuote,
        user: &Pubkey,
    ) -> Result<VersionedTransaction, VenueError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.build_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(VersionedTransaction::from(Transaction::new_with_payer(&[], Some(user))))
    }
}

/// Swap sink that records requests and settles them 1:1 unless told otherwise
#[derive(Default)]
pub struct FakeSwapSink {
    requests: Mutex<Vec<SwapRequest>>,
    failures: AtomicU32,
    fill_price: Mutex<Option<Decimal>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeSwapSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` submissions as lock-busy
    pub fn failing_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Settle every later submission at `price`
    pub fn fill_at(&self, price: Decimal) {
        *self.fill_price.lock().unwrap() = Some(price);
    }

    /// Hold every later submission for `delay` before settling
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<SwapRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SwapSink for FakeSwapSink {
    async fn submit(&self, request: SwapRequest) -> Result<SwapResult, SwapError> {
        let amount = request.parsed_amount()?;
        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SwapError::LockBusy(request.lock_key()));
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let price = self.fill_price.lock().unwrap().unwrap_or(Decimal::ONE);
        Ok(SwapResult {
            signature: format!("sig-{}", n),
            input_amount: amount,
            output_amount: amount * price,
            price,
            venue: VenueLabel::Jupiter,
        })
    }
}

pub struct FakeKeyProvider {
    keypair: Option<Keypair>,
}

impl FakeKeyProvider {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair: Some(keypair) }
    }

    pub fn empty() -> Self {
        Self { keypair: None }
    }
}

impl KeyProvider for FakeKeyProvider {
    fn signing_key(&self) -> Option<Keypair> {
        self.keypair.as_ref().map(|k| k.insecure_clone())
    }
}

pub fn sol() -> Pubkey {
    Pubkey::from_str(SOL_MINT).unwrap()
}
