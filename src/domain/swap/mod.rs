//! Swap domain - requests, settlement results and treasury transaction records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::exchanges::types::VenueLabel;
use crate::shared::errors::ValidationError;

/// What caused a swap request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapReason {
    StrategyTriggered,
    ProposalPassed,
    Manual,
}

impl SwapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapReason::StrategyTriggered => "strategy_triggered",
            SwapReason::ProposalPassed => "proposal_passed",
            SwapReason::Manual => "manual",
        }
    }
}

impl FromStr for SwapReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strategy_triggered" | "strategy" => Ok(SwapReason::StrategyTriggered),
            "proposal_passed" | "proposal" => Ok(SwapReason::ProposalPassed),
            "manual" => Ok(SwapReason::Manual),
            _ => Err(anyhow::anyhow!("Unknown swap reason: {}", s)),
        }
    }
}

/// Request lifecycle: received -> validated -> locked -> quoted -> executing -> executed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Received,
    Validated,
    Locked,
    Quoted,
    Executing,
    Executed,
    Failed,
}

impl SwapStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapStatus::Executed | SwapStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub id: String,
    pub from_token: String,
    pub to_token: String,
    /// Decimal string in UI units of `from_token`
    pub amount: String,
    pub reason: SwapReason,
    pub request_id: String,
    pub source_agent: String,
    /// Strategy or proposal that caused the request
    pub source_id: Option<String>,
    pub status: SwapStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwapRequest {
    pub fn new(
        from_token: impl Into<String>,
        to_token: impl Into<String>,
        amount: impl Into<String>,
        reason: SwapReason,
        source_agent: impl Into<String>,
    ) -> Self {
        let id = crate::shared::utils::generate_id();
        let now = Utc::now();
        Self {
            request_id: id.clone(),
            id,
            from_token: from_token.into(),
            to_token: to_token.into(),
            amount: amount.into(),
            reason,
            source_agent: source_agent.into(),
            source_id: None,
            status: SwapStatus::Received,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.request_id = id.clone();
        self.id = id;
        self
    }

    /// Parse `amount`, enforcing a positive value
    pub fn parsed_amount(&self) -> Result<Decimal, ValidationError> {
        let amount = Decimal::from_str(self.amount.trim())
            .map_err(|e| ValidationError::InvalidAmount(format!("{}: {}", self.amount, e)))?;
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(amount));
        }
        Ok(amount)
    }

    /// Key of the per-request lock
    pub fn lock_key(&self) -> String {
        format!("swap-{}", self.request_id)
    }

    pub fn with_status(&self, status: SwapStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.updated_at = Utc::now();
        next
    }
}

/// Settlement of a successful swap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapResult {
    pub signature: String,
    pub input_amount: Decimal,
    pub output_amount: Decimal,
    /// Output per input, UI units
    pub price: Decimal,
    pub venue: VenueLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Executed,
    Failed,
}

/// Durable record of a completed or failed financial operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreasuryTransaction {
    pub signature: String,
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    pub token: String,
    pub status: TransactionStatus,
    pub initiator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parsed_amount_accepts_arbitrary_precision() {
        let req = SwapRequest::new("a", "b", "10.123456789012345", SwapReason::Manual, "agent");
        assert_eq!(req.parsed_amount().unwrap(), dec!(10.123456789012345));
    }

    #[test]
    fn test_parsed_amount_rejects_non_positive() {
        let zero = SwapRequest::new("a", "b", "0", SwapReason::Manual, "agent");
        assert!(matches!(zero.parsed_amount(), Err(ValidationError::NonPositiveAmount(_))));

        let junk = SwapRequest::new("a", "b", "ten", SwapReason::Manual, "agent");
        assert!(matches!(junk.parsed_amount(), Err(ValidationError::InvalidAmount(_))));
    }

    #[test]
    fn test_lock_key_uses_request_id() {
        let req = SwapRequest::new("a", "b", "1", SwapReason::ProposalPassed, "gov").with_id("abc");
        assert_eq!(req.lock_key(), "swap-abc");
        assert_eq!(req.id, "abc");
    }

    #[test]
    fn test_reason_round_trips_through_str() {
        assert_eq!("strategy".parse::<SwapReason>().unwrap(), SwapReason::StrategyTriggered);
        assert_eq!(SwapReason::ProposalPassed.as_str(), "proposal_passed");
        assert!("vote".parse::<SwapReason>().is_err());
    }
}
