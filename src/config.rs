use anyhow::{anyhow, bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use std::{fs, path::Path};

use crate::exchanges::types::VenueLabel;
use crate::shared::retry::RetryPolicy;
use crate::shared::types::parse_token;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcCfg {
    pub url: String,
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletCfg {
    /// Treasury wallet public key
    pub treasury: String,
    /// Keypair file; takes precedence over `keypair_env`
    pub keypair: Option<String>,
    /// Env var holding a base58 secret key
    #[serde(default = "default_keypair_env")]
    pub keypair_env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VenuesCfg {
    pub enabled: Vec<VenueLabel>,
    pub jupiter_url: String,
    pub jupiter_price_url: String,
    pub jupiter_api_key: Option<String>,
    pub raydium_url: String,
    pub pumpfun_url: String,
    pub pumpportal_url: String,
    pub slippage_bps: u16,
}

impl Default for VenuesCfg {
    fn default() -> Self {
        Self {
            enabled: VenueLabel::PRIORITY.to_vec(),
            jupiter_url: "https://quote-api.jup.ag/v6".to_string(),
            jupiter_price_url: "https://api.jup.ag/price/v2".to_string(),
            jupiter_api_key: None,
            raydium_url: "https://transaction-v1.raydium.io".to_string(),
            pumpfun_url: "https://frontend-api.pump.fun".to_string(),
            pumpportal_url: "https://pumpportal.fun/api".to_string(),
            slippage_bps: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsCfg {
    /// Impact ceiling for manual and proposal swaps, percent
    pub treasury_impact_ceiling_pct: Decimal,
    /// Impact ceiling for strategy-triggered swaps, percent
    pub strategy_impact_ceiling_pct: Decimal,
    /// Per-swap ceiling by input mint, UI units
    pub max_swap_amount: HashMap<String, Decimal>,
}

impl Default for LimitsCfg {
    fn default() -> Self {
        Self {
            treasury_impact_ceiling_pct: Decimal::from(5),
            strategy_impact_ceiling_pct: Decimal::from(10),
            max_swap_amount: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsCfg {
    pub probe_ms: u64,
    pub quote_ms: u64,
    pub submit_ms: u64,
    pub swap_attempt_secs: u64,
    pub lock_ttl_secs: u64,
    pub pending_ttl_secs: u64,
}

impl Default for TimeoutsCfg {
    fn default() -> Self {
        Self {
            probe_ms: 1_000,
            quote_ms: 3_000,
            submit_ms: 15_000,
            swap_attempt_secs: 300,
            lock_ttl_secs: 360,
            pending_ttl_secs: 600,
        }
    }
}

impl TimeoutsCfg {
    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }

    pub fn quote(&self) -> Duration {
        Duration::from_millis(self.quote_ms)
    }

    pub fn submit(&self) -> Duration {
        Duration::from_millis(self.submit_ms)
    }

    pub fn swap_attempt(&self) -> Duration {
        Duration::from_secs(self.swap_attempt_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorCfg {
    pub interval_secs: u64,
    pub price_ttl_secs: u64,
}

impl Default for MonitorCfg {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            price_ttl_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc: RpcCfg,
    pub wallet: WalletCfg,
    #[serde(default)]
    pub venues: VenuesCfg,
    #[serde(default)]
    pub limits: LimitsCfg,
    #[serde(default)]
    pub timeouts: TimeoutsCfg,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub monitor: MonitorCfg,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path.as_ref())
            .with_context(|| format!("read {}", path.as_ref().display()))?;
        Self::from_toml(&s)
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s).context("parse Config.toml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Cross-field checks serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        let t = &self.timeouts;
        if t.lock_ttl_secs <= t.swap_attempt_secs {
            bail!(
                "timeouts.lock_ttl_secs ({}) must exceed timeouts.swap_attempt_secs ({}), or the swap lock expires mid-attempt",
                t.lock_ttl_secs,
                t.swap_attempt_secs
            );
        }
        if t.pending_ttl_secs <= t.swap_attempt_secs {
            bail!(
                "timeouts.pending_ttl_secs ({}) must exceed timeouts.swap_attempt_secs ({})",
                t.pending_ttl_secs,
                t.swap_attempt_secs
            );
        }
        if self.monitor.interval_secs == 0 {
            bail!("monitor.interval_secs must be at least 1");
        }
        for (token, ceiling) in &self.limits.max_swap_amount {
            parse_token(token).map_err(|e| anyhow!("limits.max_swap_amount key {}", e))?;
            if *ceiling <= Decimal::ZERO {
                bail!("limits.max_swap_amount for {} must be positive, got {}", token, ceiling);
            }
        }
        Ok(())
    }

    /// Config with defaults everywhere but the two required values
    pub fn with_defaults(rpc_url: impl Into<String>, treasury: impl Into<String>) -> Self {
        Self {
            rpc: RpcCfg {
                url: rpc_url.into(),
                commitment: default_commitment(),
            },
            wallet: WalletCfg {
                treasury: treasury.into(),
                keypair: None,
                keypair_env: default_keypair_env(),
            },
            venues: VenuesCfg::default(),
            limits: LimitsCfg::default(),
            timeouts: TimeoutsCfg::default(),
            retry: RetryPolicy::default(),
            monitor: MonitorCfg::default(),
        }
    }
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

fn default_keypair_env() -> String {
    "TREASURY_PRIVATE_KEY".to_string()
}
