//! Solana RPC access for treasury balances, mint data and submission

use async_trait::async_trait;
use rust_decimal::Decimal;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use spl_token::state::{Account as TokenAccount, Mint};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::shared::errors::ChainError;
use crate::shared::types::{from_base_units, sol_mint};

const SOL_DECIMALS: u8 = 9;

/// What the treasury core needs from the chain
#[async_trait]
pub trait TreasuryChain: Send + Sync {
    /// Balance of `mint` held by `owner`, UI units; native SOL for the wrapped-SOL mint
    async fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Result<Decimal, ChainError>;

    async fn token_decimals(&self, mint: &Pubkey) -> Result<u8, ChainError>;

    /// Program owning the mint account, `None` when the account doesn't exist
    async fn mint_owner(&self, mint: &Pubkey) -> Result<Option<Pubkey>, ChainError>;

    async fn send_and_confirm(&self, tx: &VersionedTransaction) -> Result<Signature, ChainError>;
}

/// Solana RPC client wrapper
pub struct SolanaChain {
    client: RpcClient,
    commitment: CommitmentConfig,
    decimals: RwLock<HashMap<Pubkey, u8>>,
}

impl SolanaChain {
    pub fn new(rpc_url: String, commitment: &str) -> Result<Self, ChainError> {
        let commitment = CommitmentConfig::from_str(commitment)
            .map_err(|e| ChainError::Rpc(format!("Invalid commitment {:?}: {}", commitment, e)))?;
        Ok(Self {
            client: RpcClient::new_with_commitment(rpc_url, commitment),
            commitment,
            decimals: RwLock::new(HashMap::new()),
        })
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<(Pubkey, Vec<u8>)>, ChainError> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(|e| ChainError::Rpc(format!("Failed to get account {}: {}", address, e)))?;
        Ok(response.value.map(|account| (account.owner, account.data)))
    }
}

#[async_trait]
impl TreasuryChain for SolanaChain {
    async fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Result<Decimal, ChainError> {
        if *mint == sol_mint() {
            let lamports = self
                .client
                .get_balance(owner)
                .await
                .map_err(|e| ChainError::Rpc(format!("Failed to get balance: {}", e)))?;
            return Ok(from_base_units(lamports, SOL_DECIMALS));
        }

        let program = self
            .mint_owner(mint)
            .await?
            .ok_or_else(|| ChainError::AccountNotFound(mint.to_string()))?;
        let ata = get_associated_token_address_with_program_id(owner, mint, &program);
        let Some((_, data)) = self.account_data(&ata).await? else {
            debug!("No token account {} for {}, balance is zero", ata, mint);
            return Ok(Decimal::ZERO);
        };
        if data.len() < TokenAccount::LEN {
            return Err(ChainError::InvalidAccount(ata.to_string()));
        }
        let account = TokenAccount::unpack_from_slice(&data[..TokenAccount::LEN])
            .map_err(|e| ChainError::InvalidAccount(format!("{}: {}", ata, e)))?;
        let decimals = self.token_decimals(mint).await?;
        Ok(from_base_units(account.amount, decimals))
    }

    async fn token_decimals(&self, mint: &Pubkey) -> Result<u8, ChainError> {
        if *mint == sol_mint() {
            return Ok(SOL_DECIMALS);
        }
        if let Some(decimals) = self.decimals.read().await.get(mint) {
            return Ok(*decimals);
        }

        let (_, data) = self
            .account_data(mint)
            .await?
            .ok_or_else(|| ChainError::AccountNotFound(mint.to_string()))?;
        if data.len() < Mint::LEN {
            return Err(ChainError::InvalidAccount(mint.to_string()));
        }
        let decimals = Mint::unpack_from_slice(&data[..Mint::LEN])
            .map_err(|e| ChainError::InvalidAccount(format!("{}: {}", mint, e)))?
            .decimals;
        self.decimals.write().await.insert(*mint, decimals);
        Ok(decimals)
    }

    async fn mint_owner(&self, mint: &Pubkey) -> Result<Option<Pubkey>, ChainError> {
        Ok(self.account_data(mint).await?.map(|(owner, _)| owner))
    }

    async fn send_and_confirm(&self, tx: &VersionedTransaction) -> Result<Signature, ChainError> {
        let signature = self
            .client
            .send_and_confirm_transaction(tx)
            .await
            .map_err(|e| ChainError::Rpc(format!("Failed to send transaction: {}", e)))?;
        info!("✅ Transaction confirmed: {}", signature);
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_commitment() {
        assert!(SolanaChain::new("http://127.0.0.1:8899".into(), "finalized").is_ok());
        assert!(matches!(
            SolanaChain::new("http://127.0.0.1:8899".into(), "eventually"),
            Err(ChainError::Rpc(_))
        ));
    }
}
