//! Treasury Swap - swap execution core for an agent-managed Solana treasury
//! Built with Domain-Driven Design principles

pub mod app;
pub mod application;
pub mod config;
pub mod domain;
pub mod exchanges;
pub mod infrastructure;
pub mod shared;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use app::TreasuryServices;
pub use application::{StrategyMonitor, TreasurySwapOrchestrator};
pub use config::Config;
pub use domain::ledger::TransactionalLedger;
pub use domain::lock::LockManager;
pub use domain::swap::{SwapReason, SwapRequest, SwapResult};
pub use exchanges::RouteResolver;
