//! Signing key sources; keys are loaded per call and never cached

use solana_sdk::signature::{read_keypair_file, Keypair};
use std::path::PathBuf;
use tracing::warn;

pub trait KeyProvider: Send + Sync {
    /// Fresh copy of the treasury signing key, `None` when unavailable
    fn signing_key(&self) -> Option<Keypair>;
}

/// Keypair JSON file as written by `solana-keygen`
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KeyProvider for FileKeyProvider {
    fn signing_key(&self) -> Option<Keypair> {
        match read_keypair_file(&self.path) {
            Ok(keypair) => Some(keypair),
            Err(e) => {
                warn!("❌ Failed to load keypair {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

/// Base58-encoded 64-byte secret key in an environment variable
pub struct EnvKeyProvider {
    var: String,
}

impl EnvKeyProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl KeyProvider for EnvKeyProvider {
    fn signing_key(&self) -> Option<Keypair> {
        let encoded = std::env::var(&self.var).ok()?;
        decode_base58_keypair(encoded.trim())
            .map_err(|e| warn!("❌ {} does not hold a valid keypair: {}", self.var, e))
            .ok()
    }
}

pub fn decode_base58_keypair(encoded: &str) -> Result<Keypair, String> {
    let bytes = bs58::decode(encoded).into_vec().map_err(|e| e.to_string())?;
    Keypair::from_bytes(&bytes).map_err(|e| e.to_string())
}
