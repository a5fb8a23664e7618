//! Position monitoring: take-profit ladders and fixed or trailing stops
//!
//! One cancellable task per position polls the reference price and emits exit
//! swaps through a [`SwapSink`]. The monitor never signs or submits anything itself.

use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::orchestrator::SwapSink;
use crate::domain::ledger::{
    NewRecord, PositionStatusChange, PositionUpdate, RecordContent, RecordFilter, RecordId,
    RecordKind, StrategyExecutionRequest, TransactionalLedger,
};
use crate::domain::lock::{LockGuard, LockManager};
use crate::domain::position::{ExitType, Position, PositionStatus, StopDecision};
use crate::domain::price::PriceCache;
use crate::domain::swap::{SwapReason, SwapRequest, SwapResult};
use crate::shared::errors::{LedgerError, StrategyError};
use crate::shared::types::parse_token;

const LOCK_POLL: Duration = Duration::from_millis(25);
const BOOK_ATTEMPTS: usize = 3;

/// Whether a position still needs watching after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Finished,
}

/// Stored position and the version the next write expects
struct StoredPosition {
    record_id: RecordId,
    version: u64,
    position: Position,
}

/// Per-tick evaluation shared by every position task
struct MonitorCore {
    ledger: TransactionalLedger,
    locks: LockManager,
    prices: Arc<PriceCache>,
    sink: Arc<dyn SwapSink>,
    holder: String,
    lock_ttl: Duration,
}

impl MonitorCore {
    async fn tick(&self, position_id: &str) -> Result<TickOutcome, StrategyError> {
        let key = strategy_key(position_id);
        let Some(guard) = self.locks.acquire(&key, &self.holder, self.lock_ttl).await? else {
            debug!(position_id, "strategy lock busy, skipping tick");
            return Ok(TickOutcome::Continue);
        };
        let outcome = self.evaluate(position_id).await;
        if let Err(e) = guard.release().await {
            warn!(key = %key, error = %e, "strategy lock release failed");
        }
        outcome
    }

    /// Wait for the strategy lock, up to one lock TTL
    async fn wait_for_lock(&self, position_id: &str) -> Result<LockGuard, StrategyError> {
        let key = strategy_key(position_id);
        let deadline = tokio::time::Instant::now() + self.lock_ttl;
        loop {
            if let Some(guard) = self.locks.acquire(&key, &self.holder, self.lock_ttl).await? {
                return Ok(guard);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StrategyError::Busy(key));
            }
            tokio::time::sleep(LOCK_POLL).await;
        }
    }

    async fn evaluate(&self, position_id: &str) -> Result<TickOutcome, StrategyError> {
        let Some(mut stored) = self.load(position_id).await? else {
            info!(position_id, "position gone, stopping monitor");
            return Ok(TickOutcome::Finished);
        };
        if !stored.position.is_active() || stored.position.strategy.is_none() {
            return Ok(TickOutcome::Finished);
        }

        let price = self.price(&stored.position).await?;
        debug!(position_id, %price, "tick");

        // The stop depends on price alone, so observe it up front and persist a raise
        // before any exit can fail
        let stop = stored
            .position
            .strategy
            .as_mut()
            .and_then(|strategy| strategy.stop_loss.as_mut())
            .map(|stop| (stop.observe(price), stop.exit_type(), stop.target_price));
        if let Some((StopDecision::Raised, _, stop_price)) = stop {
            info!(position_id, %price, %stop_price, "📈 Trailing stop raised");
            self.save(&mut stored).await?;
        }

        // Take-profits first; the stop then protects whatever remains
        for level in stored.position.reached_take_profits(price) {
            let Some(amount) = stored.position.take_profit_amount(level) else {
                continue;
            };
            if amount <= Decimal::ZERO {
                continue;
            }
            let fill = self.exit(&stored.position, ExitType::TakeProfit, amount).await?;
            self.book_exit(&mut stored, ExitType::TakeProfit, amount, &fill, Some(level))
                .await?;
            self.record_update(&stored.position, ExitType::TakeProfit, amount, price, &fill)
                .await?;
        }

        if let Some((StopDecision::Triggered, exit_type, stop_price)) = stop {
            if stored.position.is_active() {
                let amount = stored.position.remaining_amount;
                info!(position_id, %price, %stop_price, %amount, "🛑 Stop triggered");
                let fill = self.exit(&stored.position, exit_type, amount).await?;
                self.book_exit(&mut stored, exit_type, amount, &fill, None).await?;
                self.record_update(&stored.position, exit_type, amount, price, &fill)
                    .await?;
            }
        }

        if stored.position.is_active() {
            Ok(TickOutcome::Continue)
        } else {
            self.record_status(&stored.position, "fully exited").await?;
            Ok(TickOutcome::Finished)
        }
    }

    /// Token price in units of the position's quote token
    async fn price(&self, position: &Position) -> Result<Decimal, StrategyError> {
        let token = mint_key(&position.token);
        let quote = mint_key(&position.quote_token);
        let token_usd = self.prices.price(&token).await?;
        let quote_usd = self.prices.price(&quote).await?;
        if quote_usd.is_zero() {
            return Err(StrategyError::PriceUnavailable(
                crate::shared::errors::VenueError::NoPrice(quote),
            ));
        }
        Ok(token_usd / quote_usd)
    }

    async fn exit(
        &self,
        position: &Position,
        exit_type: ExitType,
        amount: Decimal,
    ) -> Result<SwapResult, StrategyError> {
        self.ledger
            .create(
                NewRecord::new(RecordContent::StrategyExecutionRequest(StrategyExecutionRequest {
                    strategy_id: position.id.clone(),
                    position_id: position.id.clone(),
                    exit_type,
                    amount,
                }))
                .correlated(position.id.clone()),
            )
            .await?;
        let request = SwapRequest::new(
            position.token.clone(),
            position.quote_token.clone(),
            amount.normalize().to_string(),
            SwapReason::StrategyTriggered,
            "strategy-monitor",
        )
        .with_source(position.id.clone());
        info!(position_id = %position.id, ?exit_type, %amount, request_id = %request.request_id, "🎯 Emitting exit swap");
        Ok(self.sink.submit(request).await?)
    }

    async fn load(&self, position_id: &str) -> Result<Option<StoredPosition>, LedgerError> {
        let records = self
            .ledger
            .query(&RecordFilter::kind(RecordKind::Position).correlated(position_id))
            .await?;
        Ok(records.into_iter().rev().find_map(|record| match record.content {
            RecordContent::Position(position) => Some(StoredPosition {
                record_id: record.id,
                version: record.version,
                position,
            }),
            _ => None,
        }))
    }

    async fn save(&self, stored: &mut StoredPosition) -> Result<(), LedgerError> {
        if !self.try_write(stored, &stored.position).await? {
            return Err(LedgerError::VersionConflict {
                id: stored.record_id.to_string(),
                expected: stored.version,
                found: stored.version + 1,
            });
        }
        stored.version += 1;
        Ok(())
    }

    async fn try_write(&self, stored: &StoredPosition, position: &Position) -> Result<bool, LedgerError> {
        self.ledger
            .update_with_version(
                stored.record_id,
                RecordContent::Position(position.clone()),
                stored.version,
            )
            .await
    }

    /// Book a settled exit. The swap already happened, so a concurrent write never
    /// drops it: reload the position and apply the exit again.
    async fn book_exit(
        &self,
        stored: &mut StoredPosition,
        exit_type: ExitType,
        amount: Decimal,
        fill: &SwapResult,
        level: Option<usize>,
    ) -> Result<(), StrategyError> {
        for _ in 0..BOOK_ATTEMPTS {
            let mut booked = stored.position.clone();
            booked.record_exit(exit_type, amount, fill, level);
            if self.try_write(stored, &booked).await? {
                stored.position = booked;
                stored.version += 1;
                return Ok(());
            }
            warn!(position_id = %stored.position.id, signature = %fill.signature, "position changed during exit, reapplying");
            *stored = self
                .load(&stored.position.id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(stored.position.id.clone()))?;
        }
        error!(position_id = %stored.position.id, signature = %fill.signature, "could not book settled exit");
        Err(LedgerError::VersionConflict {
            id: stored.record_id.to_string(),
            expected: stored.version,
            found: stored.version + 1,
        }
        .into())
    }

    async fn record_update(
        &self,
        position: &Position,
        exit_type: ExitType,
        amount: Decimal,
        trigger_price: Decimal,
        fill: &SwapResult,
    ) -> Result<(), LedgerError> {
        self.ledger
            .create(
                NewRecord::new(RecordContent::PositionUpdate(PositionUpdate {
                    position_id: position.id.clone(),
                    exit_type,
                    amount,
                    price: fill.price,
                    trigger_price,
                    output_amount: fill.output_amount,
                    signature: fill.signature.clone(),
                    remaining_amount: position.remaining_amount,
                }))
                .correlated(position.id.clone()),
            )
            .await
            .map(|_| ())
    }

    async fn record_status(&self, position: &Position, note: &str) -> Result<(), LedgerError> {
        self.ledger
            .create(
                NewRecord::new(RecordContent::PositionStatus(PositionStatusChange {
                    position_id: position.id.clone(),
                    status: position.status,
                    note: note.to_string(),
                }))
                .correlated(position.id.clone()),
            )
            .await
            .map(|_| ())
    }
}

fn strategy_key(position_id: &str) -> String {
    format!("strategy-{}", position_id)
}

/// Price-feed key for a token reference ("SOL" or a mint)
fn mint_key(token: &str) -> String {
    parse_token(token)
        .map(|mint| mint.to_string())
        .unwrap_or_else(|_| token.to_string())
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns one polling task per monitored position
pub struct StrategyMonitor {
    core: Arc<MonitorCore>,
    interval: Duration,
    tasks: Arc<Mutex<HashMap<String, MonitorTask>>>,
}

impl StrategyMonitor {
    pub fn new(
        ledger: TransactionalLedger,
        locks: LockManager,
        prices: Arc<PriceCache>,
        sink: Arc<dyn SwapSink>,
        interval: Duration,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            core: Arc::new(MonitorCore {
                ledger,
                locks,
                prices,
                sink,
                holder: format!("monitor-{}", crate::shared::utils::generate_id()),
                lock_ttl,
            }),
            interval,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persist a new position and start watching it
    pub async fn open_position(&self, position: Position) -> Result<Position, StrategyError> {
        if let Some(strategy) = &position.strategy {
            strategy.validate()?;
        }
        self.core
            .ledger
            .create(
                NewRecord::new(RecordContent::Position(position.clone()))
                    .correlated(position.id.clone()),
            )
            .await?;
        info!(position_id = %position.id, token = %position.token, amount = %position.amount, "📂 Position opened");
        self.start(&position.id).await;
        Ok(position)
    }

    pub async fn position(&self, position_id: &str) -> Result<Option<Position>, StrategyError> {
        Ok(self.core.load(position_id).await?.map(|stored| stored.position))
    }

    /// Start polling `position_id`. No-op when it is already monitored.
    pub async fn start(&self, position_id: &str) {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get(position_id) {
            if !task.handle.is_finished() {
                return;
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_position(
            Arc::clone(&self.core),
            Arc::clone(&self.tasks),
            position_id.to_string(),
            self.interval,
            cancel.clone(),
        ));
        tasks.insert(position_id.to_string(), MonitorTask { cancel, handle });
        info!(position_id, interval_secs = self.interval.as_secs(), "👀 Monitoring started");
    }

    /// Stop polling; returns false when the position was not monitored
    pub async fn stop(&self, position_id: &str) -> bool {
        let task = self.tasks.lock().await.remove(position_id);
        match task {
            Some(task) => {
                task.cancel.cancel();
                if let Err(e) = task.handle.await {
                    warn!(position_id, error = %e, "monitor task ended abnormally");
                }
                info!(position_id, "Monitoring stopped");
                true
            }
            None => false,
        }
    }

    /// Cancel the strategy: stop monitoring and close the position. Waits for any
    /// evaluation holding the strategy lock so its exits are booked first.
    pub async fn cancel(&self, position_id: &str) -> Result<(), StrategyError> {
        self.stop(position_id).await;
        let guard = self.core.wait_for_lock(position_id).await?;
        let outcome = self.close_position(position_id).await;
        if let Err(e) = guard.release().await {
            warn!(position_id, error = %e, "strategy lock release failed");
        }
        outcome
    }

    async fn close_position(&self, position_id: &str) -> Result<(), StrategyError> {
        let Some(mut stored) = self.core.load(position_id).await? else {
            return Err(LedgerError::NotFound(position_id.to_string()).into());
        };
        if stored.position.status == PositionStatus::Closed {
            return Ok(());
        }
        stored.position.close();
        self.core.save(&mut stored).await?;
        self.core.record_status(&stored.position, "strategy cancelled").await?;
        info!(position_id, "Strategy cancelled");
        Ok(())
    }

    /// Evaluate one position once
    pub async fn tick(&self, position_id: &str) -> Result<TickOutcome, StrategyError> {
        self.core.tick(position_id).await
    }

    pub async fn is_monitoring(&self, position_id: &str) -> bool {
        self.tasks.lock().await.contains_key(position_id)
    }

    pub async fn monitored(&self) -> Vec<String> {
        self.tasks.lock().await.keys().cloned().collect()
    }

    /// Cancel every task and wait for them to finish
    pub async fn shutdown(&self) {
        let tasks: Vec<(String, MonitorTask)> = self.tasks.lock().await.drain().collect();
        for (_, task) in &tasks {
            task.cancel.cancel();
        }
        let (ids, handles): (Vec<String>, Vec<JoinHandle<()>>) =
            tasks.into_iter().map(|(id, task)| (id, task.handle)).unzip();
        for (position_id, joined) in ids.iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                warn!(position_id = %position_id, error = %e, "monitor task ended abnormally");
            }
        }
        info!("Strategy monitor shut down");
    }
}

async fn run_position(
    core: Arc<MonitorCore>,
    tasks: Arc<Mutex<HashMap<String, MonitorTask>>>,
    position_id: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match core.tick(&position_id).await {
            Ok(TickOutcome::Continue) => {}
            Ok(TickOutcome::Finished) => break,
            Err(e) => error!(position_id = %position_id, error = %e, "❌ Monitor tick failed"),
        }
    }

    // Deregister, unless stop() already replaced or removed us
    let mut tasks = tasks.lock().await;
    if tasks
        .get(&position_id)
        .map(|task| task.cancel.is_cancelled() || task.handle.is_finished())
        == Some(false)
    {
        tasks.remove(&position_id);
    }
    info!(position_id = %position_id, "Monitoring finished");
}
