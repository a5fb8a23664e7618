//! Application layer - swap orchestration and strategy monitoring

pub mod orchestrator;
pub mod strategy_monitor;
pub mod swap_executor;
pub mod token_guard;

pub use orchestrator::{OrchestratorSettings, SwapSink, TreasurySwapOrchestrator};
pub use strategy_monitor::{StrategyMonitor, TickOutcome};
pub use swap_executor::SwapExecutor;
pub use token_guard::TokenGuard;
