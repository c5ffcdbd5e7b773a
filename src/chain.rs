// ./src/chain.rs
//! On-chain adapter for the custody contract.
//!
//! The node hands back prepared calldata for channel create/resize/close;
//! this module submits those calls and performs the two balance queries the
//! lifecycle polls. Everything else about the contracts stays opaque.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChainError;
use crate::types::ChannelId;

abigen!(
    Custody,
    r#"[
        function accountBalance(address account, address token) external view returns (uint256)
        function channelBalance(bytes32 channelId, address token) external view returns (uint256)
        function withdraw(address token, uint256 amount) external
    ]"#
);

/// Calldata prepared elsewhere (by the node) and submitted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedCall {
    /// Target contract, normally the custody address
    pub to: Address,
    /// ABI-encoded call
    pub data: Bytes,
    /// Attached native value
    #[serde(default)]
    pub value: U256,
}

/// Outcome of a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

/// Chain-side operations the lifecycle depends on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a prepared call and wait for confirmation.
    async fn submit(&self, call: &PreparedCall) -> Result<TxOutcome, ChainError>;

    /// Custody ledger balance for an account/token pair.
    async fn account_balance(&self, account: Address, token: Address) -> Result<U256, ChainError>;

    /// Funds currently locked in one channel.
    async fn channel_balance(&self, channel: ChannelId, token: Address)
        -> Result<U256, ChainError>;

    /// Funds an account can withdraw from custody once a channel settles.
    async fn withdrawable_balance(
        &self,
        account: Address,
        token: Address,
    ) -> Result<U256, ChainError> {
        self.account_balance(account, token).await
    }

    /// Pull settled funds out of custody.
    async fn withdraw(&self, token: Address, amount: U256) -> Result<TxOutcome, ChainError>;
}

type NodeClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Custody adapter over a JSON-RPC provider plus signing wallet.
pub struct EvmChain {
    client: Arc<NodeClient>,
    custody: Custody<NodeClient>,
    confirmations: usize,
}

impl EvmChain {
    pub fn new(
        rpc_url: &str,
        wallet: LocalWallet,
        custody: Address,
        confirmations: usize,
    ) -> Result<Self, ChainError> {
        let provider =
            Provider::<Http>::try_from(rpc_url).map_err(|e| ChainError::Provider(e.to_string()))?;
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        Ok(Self {
            custody: Custody::new(custody, client.clone()),
            client,
            confirmations,
        })
    }
}

#[async_trait]
impl ChainClient for EvmChain {
    async fn submit(&self, call: &PreparedCall) -> Result<TxOutcome, ChainError> {
        let tx = TransactionRequest::new()
            .to(call.to)
            .data(call.data.clone())
            .value(call.value);
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| ChainError::Submission(e.to_string()))?;
        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(|e| ChainError::Submission(e.to_string()))?
            .ok_or(ChainError::MissingReceipt)?;
        debug!(tx = ?receipt.transaction_hash, "prepared call confirmed");
        Ok(TxOutcome {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    async fn account_balance(&self, account: Address, token: Address) -> Result<U256, ChainError> {
        self.custody
            .account_balance(account, token)
            .call()
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))
    }

    async fn channel_balance(
        &self,
        channel: ChannelId,
        token: Address,
    ) -> Result<U256, ChainError> {
        self.custody
            .channel_balance(channel.0, token)
            .call()
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))
    }

    async fn withdraw(&self, token: Address, amount: U256) -> Result<TxOutcome, ChainError> {
        // the pending transaction borrows the call, which must outlive it
        let call = self.custody.withdraw(token, amount);
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Withdrawal(e.to_string()))?;
        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(|e| ChainError::Withdrawal(e.to_string()))?
            .ok_or(ChainError::MissingReceipt)?;
        Ok(TxOutcome {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // well-known throwaway key
    const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe51296170827936ea5cce4b76994b0f";

    #[test]
    fn test_prepared_call_wire_form() {
        let text = r#"{"to":"0x00000000000000000000000000000000000000aa","data":"0x1234"}"#;
        let call: PreparedCall = serde_json::from_str(text).unwrap();

        assert_eq!(call.to, Address::from_low_u64_be(0xaa));
        assert_eq!(call.data.to_vec(), vec![0x12, 0x34]);
        // value is optional on the wire
        assert_eq!(call.value, U256::zero());
    }

    #[tokio::test]
    async fn test_withdraw_surfaces_provider_failure() {
        let wallet: LocalWallet = TEST_KEY.parse().unwrap();
        // nothing listens on port 1, so the submission errors immediately
        let chain = EvmChain::new(
            "http://127.0.0.1:1",
            wallet,
            Address::from_low_u64_be(0xC0DE),
            1,
        )
        .unwrap();

        let err = chain
            .withdraw(Address::from_low_u64_be(0x7EA1), U256::from(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Withdrawal(_)));
    }
}
