//! Position domain - open exposures and their exit rules

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::swap::SwapResult;
use crate::shared::errors::StrategyError;
use crate::shared::utils::calculate_percentage_change;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitType {
    TakeProfit,
    StopLoss,
    TrailingStop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialSell {
    pub timestamp: DateTime<Utc>,
    pub amount: Decimal,
    /// Realized fill price, quote token per token
    pub price: Decimal,
    /// Quote tokens received
    #[serde(default)]
    pub proceeds: Decimal,
    pub exit_type: ExitType,
    pub signature: String,
    /// Realized profit against the entry price, percent
    pub profit_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    /// Trigger, percent above entry
    pub percentage: Decimal,
    pub target_price: Decimal,
    /// Share of the remaining amount to sell, percent
    pub sell_amount: Decimal,
    #[serde(default)]
    pub consumed: bool,
}

impl TakeProfitLevel {
    pub fn new(entry_price: Decimal, percentage: Decimal, sell_amount: Decimal) -> Self {
        Self {
            percentage,
            target_price: entry_price * (HUNDRED + percentage) / HUNDRED,
            sell_amount,
            consumed: false,
        }
    }

    pub fn is_reached(&self, price: Decimal) -> bool {
        !self.consumed && price >= self.target_price
    }
}

/// Outcome of feeding one price into a stop-loss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    Hold,
    /// Trailing high moved up, stop price recomputed
    Raised,
    Triggered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLoss {
    /// Percent below entry (fixed) or below the high (trailing)
    pub percentage: Decimal,
    pub target_price: Decimal,
    pub is_trailing: bool,
    pub trailing_distance: Option<Decimal>,
    pub highest_price: Option<Decimal>,
}

impl StopLoss {
    pub fn fixed(entry_price: Decimal, percentage: Decimal) -> Self {
        Self {
            percentage,
            target_price: entry_price * (HUNDRED - percentage) / HUNDRED,
            is_trailing: false,
            trailing_distance: None,
            highest_price: None,
        }
    }

    pub fn trailing(entry_price: Decimal, distance: Decimal) -> Self {
        Self {
            percentage: distance,
            target_price: entry_price * (HUNDRED - distance) / HUNDRED,
            is_trailing: true,
            trailing_distance: Some(distance),
            highest_price: Some(entry_price),
        }
    }

    pub fn exit_type(&self) -> ExitType {
        if self.is_trailing {
            ExitType::TrailingStop
        } else {
            ExitType::StopLoss
        }
    }

    /// Feed one price. A trailing stop ratchets up with new highs and never moves down.
    pub fn observe(&mut self, price: Decimal) -> StopDecision {
        if self.is_trailing {
            let distance = self.trailing_distance.unwrap_or(self.percentage);
            let high = self.highest_price.unwrap_or(Decimal::ZERO);
            if price > high {
                self.highest_price = Some(price);
                let stop = price * (HUNDRED - distance) / HUNDRED;
                if stop > self.target_price {
                    self.target_price = stop;
                }
                return StopDecision::Raised;
            }
        }
        if price <= self.target_price {
            StopDecision::Triggered
        } else {
            StopDecision::Hold
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub take_profit_levels: Vec<TakeProfitLevel>,
    pub stop_loss: Option<StopLoss>,
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), StrategyError> {
        let total: Decimal = self.take_profit_levels.iter().map(|l| l.sell_amount).sum();
        if total > HUNDRED {
            return Err(StrategyError::InvalidConfig(format!(
                "take-profit sell amounts sum to {}%, more than 100%",
                total
            )));
        }
        for level in &self.take_profit_levels {
            if level.percentage <= Decimal::ZERO {
                return Err(StrategyError::InvalidConfig(format!(
                    "take-profit trigger must be positive, got {}%",
                    level.percentage
                )));
            }
            if level.sell_amount <= Decimal::ZERO {
                return Err(StrategyError::InvalidConfig(format!(
                    "take-profit sell amount must be positive, got {}%",
                    level.sell_amount
                )));
            }
        }
        if let Some(stop) = &self.stop_loss {
            let distance = if stop.is_trailing {
                stop.trailing_distance.ok_or_else(|| {
                    StrategyError::InvalidConfig("trailing stop without distance".into())
                })?
            } else {
                stop.percentage
            };
            if distance <= Decimal::ZERO || distance >= HUNDRED {
                return Err(StrategyError::InvalidConfig(format!(
                    "stop-loss distance must be within (0, 100), got {}%",
                    distance
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    /// Token held
    pub token: String,
    /// Token exits are swapped into
    pub quote_token: String,
    pub amount: Decimal,
    pub remaining_amount: Decimal,
    pub entry_price: Decimal,
    pub status: PositionStatus,
    pub strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub partial_sells: Vec<PartialSell>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn open(
        token: impl Into<String>,
        quote_token: impl Into<String>,
        amount: Decimal,
        entry_price: Decimal,
        strategy: Option<StrategyConfig>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: crate::shared::utils::generate_id(),
            token: token.into(),
            quote_token: quote_token.into(),
            amount,
            remaining_amount: amount,
            entry_price,
            status: PositionStatus::Active,
            strategy,
            partial_sells: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active && self.remaining_amount > Decimal::ZERO
    }

    /// Unconsumed take-profit levels reached at `price`, in level order
    pub fn reached_take_profits(&self, price: Decimal) -> Vec<usize> {
        self.strategy
            .as_ref()
            .map(|s| {
                s.take_profit_levels
                    .iter()
                    .enumerate()
                    .filter(|(_, level)| level.is_reached(price))
                    .map(|(idx, _)| idx)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Amount a take-profit level sells: its share of the current remaining
    pub fn take_profit_amount(&self, level: usize) -> Option<Decimal> {
        let level = self.strategy.as_ref()?.take_profit_levels.get(level)?;
        Some(self.remaining_amount * level.sell_amount / HUNDRED)
    }

    /// Book a settled exit at its fill; consumes the take-profit level when given
    pub fn record_exit(
        &mut self,
        exit_type: ExitType,
        amount: Decimal,
        fill: &SwapResult,
        level: Option<usize>,
    ) {
        if let (Some(idx), Some(strategy)) = (level, self.strategy.as_mut()) {
            if let Some(level) = strategy.take_profit_levels.get_mut(idx) {
                level.consumed = true;
            }
        }
        let sold = amount.min(self.remaining_amount);
        self.remaining_amount -= sold;
        self.partial_sells.push(PartialSell {
            timestamp: Utc::now(),
            amount: sold,
            price: fill.price,
            proceeds: fill.output_amount,
            exit_type,
            signature: fill.signature.clone(),
            profit_pct: calculate_percentage_change(self.entry_price, fill.price),
        });
        if self.remaining_amount <= Decimal::ZERO {
            self.remaining_amount = Decimal::ZERO;
            self.status = PositionStatus::Closed;
        }
        self.updated_at = Utc::now();
    }

    pub fn close(&mut self) {
        self.status = PositionStatus::Closed;
        self.updated_at = Utc::now();
    }
}
