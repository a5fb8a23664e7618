//! Chain access and signing keys

pub mod key_provider;
pub mod rpc_client;

pub use key_provider::{EnvKeyProvider, FileKeyProvider, KeyProvider};
pub use rpc_client::{SolanaChain, TreasuryChain};
