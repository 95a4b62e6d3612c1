//! Chain reads needed by execution: blockhash and balances

use async_trait::async_trait;
use solana_account_decoder::UiAccountData;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};

/// Token balance in raw units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAmount {
    pub amount: u64,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn ui_amount(&self) -> f64 {
        self.amount as f64 / 10f64.powi(self.decimals as i32)
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash>;

    /// Native balance in lamports
    async fn sol_balance(&self, owner: &Pubkey) -> Result<u64>;

    /// `None` when the owner holds no account for `mint`
    async fn token_balance(&self, owner: &Pubkey, mint: &str) -> Result<Option<TokenAmount>>;
}

pub struct RpcChainClient {
    rpc: Arc<RpcClient>,
}

impl RpcChainClient {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }
}

/// Pull `(amount, decimals)` out of a jsonParsed token account
fn parsed_token_amount(data: &UiAccountData) -> Option<TokenAmount> {
    let UiAccountData::Json(parsed) = data else {
        return None;
    };
    let token_amount = parsed.parsed.get("info")?.get("tokenAmount")?;
    let amount = token_amount.get("amount")?.as_str()?.parse().ok()?;
    let decimals = token_amount.get("decimals")?.as_u64()? as u8;
    Some(TokenAmount { amount, decimals })
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn latest_blockhash(&self) -> Result<Hash> {
        Ok(self.rpc.get_latest_blockhash().await?)
    }

    async fn sol_balance(&self, owner: &Pubkey) -> Result<u64> {
        Ok(self.rpc.get_balance(owner).await?)
    }

    async fn token_balance(&self, owner: &Pubkey, mint: &str) -> Result<Option<TokenAmount>> {
        let mint_key = Pubkey::from_str(mint)
            .map_err(|e| Error::Internal(format!("invalid mint {}: {}", mint, e)))?;

        // Matches accounts under either token program
        let accounts = self
            .rpc
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::Mint(mint_key))
            .await?;

        if accounts.is_empty() {
            return Ok(None);
        }

        let mut total: Option<TokenAmount> = None;
        for keyed in &accounts {
            if let Some(found) = parsed_token_amount(&keyed.account.data) {
                total = Some(match total {
                    Some(acc) => TokenAmount {
                        amount: acc.amount.saturating_add(found.amount),
                        decimals: found.decimals,
                    },
                    None => found,
                });
            }
        }

        debug!(%owner, mint, accounts = accounts.len(), balance = ?total, "Token balance");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_account_decoder::parse_account_data::ParsedAccount;
    use serde_json::json;

    #[test]
    fn test_parse_json_token_account() {
        let data = UiAccountData::Json(ParsedAccount {
            program: "spl-token".to_string(),
            parsed: json!({
                "type": "account",
                "info": {
                    "mint": "MintA",
                    "tokenAmount": {"amount": "1234500", "decimals": 6, "uiAmount": 1.2345}
                }
            }),
            space: 165,
        });

        let amount = parsed_token_amount(&data).unwrap();
        assert_eq!(amount.amount, 1_234_500);
        assert_eq!(amount.decimals, 6);
        assert!((amount.ui_amount() - 1.2345).abs() < 1e-9);
    }

    #[test]
    fn test_binary_account_is_ignored() {
        let data = UiAccountData::LegacyBinary(String::new());
        assert!(parsed_token_amount(&data).is_none());
    }
}
