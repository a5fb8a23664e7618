//! Error handling for the treasury core

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

use crate::exchanges::types::VenueLabel;

/// Ledger / record store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Version conflict on record {id}: expected {expected}, found {found}")]
    VersionConflict { id: String, expected: u64, found: u64 },

    #[error("Record decode failed: {0}")]
    Decode(String),

    #[error("Transaction already finished")]
    TransactionFinished,

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Request validation errors, raised before any lock is taken
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("Cannot swap a token for itself ({0})")]
    SameToken(String),

    #[error("Invalid token mint: {0}")]
    InvalidMint(String),

    #[error("Token {mint} failed legitimacy check: {reason}")]
    IllegitimateToken { mint: String, reason: String },

    #[error("No liquidity found for token {0}")]
    NoLiquidity(String),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Decimal, available: Decimal },

    #[error("Amount {requested} exceeds per-swap ceiling {ceiling}")]
    ExceedsSwapCeiling { requested: Decimal, ceiling: Decimal },

    #[error("Balance lookup failed: {0}")]
    BalanceUnavailable(String),
}

/// Errors returned by a single liquidity venue
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VenueError {
    #[error("{0} rejected credentials (unauthorized)")]
    Unauthorized(VenueLabel),

    #[error("{venue} returned status {status}: {message}")]
    Rejected { venue: VenueLabel, status: u16, message: String },

    #[error("{0} timed out")]
    Timeout(VenueLabel),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Response decode failed: {0}")]
    Decode(String),

    #[error("{venue} does not support this pair: {reason}")]
    Unsupported { venue: VenueLabel, reason: String },

    #[error("No reference price for {0}")]
    NoPrice(String),
}

impl VenueError {
    /// Connection-level failures worth another attempt against the same venue
    pub fn is_transient(&self) -> bool {
        matches!(self, VenueError::Network(_))
    }
}

/// Chain client errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid account data for {0}")]
    InvalidAccount(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),
}

/// Route resolution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouteError {
    #[error("No viable route for {input} -> {output}: {attempts:?}")]
    NoViableRoute { input: String, output: String, attempts: Vec<String> },

    #[error("Token decimals lookup failed: {0}")]
    Decimals(String),

    #[error("Amount conversion failed: {0}")]
    AmountConversion(String),
}

/// Swap execution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Signing key unavailable")]
    MissingSigningKey,

    #[error("Signing key {found} is not the treasury wallet {expected}")]
    KeyMismatch { expected: String, found: String },

    #[error("Amount conversion failed: {0}")]
    AmountConversion(String),

    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),

    #[error("Transaction signing failed: {0}")]
    Signing(String),

    #[error("Transaction submission failed: {0}")]
    Submission(String),

    #[error("No settlement signature returned")]
    MissingSignature,

    #[error("Transaction confirmation timed out")]
    Timeout,
}

/// Pending reservation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReserveError {
    #[error("Insufficient available balance: requested {requested}, available {available}")]
    Insufficient { requested: Decimal, available: Decimal },

    #[error("Transaction {0} is already in flight")]
    Duplicate(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Top-level swap failure handed back to callers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SwapError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Could not acquire lock {0}, another operation is in progress")]
    LockBusy(String),

    #[error("No route found: {0}")]
    Route(#[from] RouteError),

    #[error("Price impact {impact}% exceeds ceiling {ceiling}%")]
    PriceImpactExceeded { impact: Decimal, ceiling: Decimal },

    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Swap request {0} was already processed or is in flight")]
    AlreadyProcessed(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Swap attempt exceeded {0:?}")]
    Timeout(Duration),
}

impl From<ReserveError> for SwapError {
    fn from(err: ReserveError) -> Self {
        match err {
            ReserveError::Insufficient { requested, available } => {
                SwapError::Validation(ValidationError::InsufficientBalance { requested, available })
            }
            ReserveError::Duplicate(id) => SwapError::AlreadyProcessed(id),
            ReserveError::Ledger(e) => SwapError::Ledger(e),
        }
    }
}

/// Position & strategy errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("Invalid strategy config: {0}")]
    InvalidConfig(String),

    #[error("Price unavailable: {0}")]
    PriceUnavailable(#[from] VenueError),

    #[error("Exit swap failed: {0}")]
    Swap(#[from] SwapError),

    #[error("Strategy lock {0} is held by another evaluation")]
    Busy(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// General application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Blockchain error: {0}")]
    BlockchainError(String),

    #[error("Swap error: {0}")]
    Swap(#[from] SwapError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),
}
