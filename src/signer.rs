// ./src/signer.rs
//! Detached payload signing.
//!
//! Key management stays outside this crate; the trait is the boundary. The
//! provided implementation wraps a local wallet and is enough for demos and
//! for nodes that accept plain message signatures.

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer as EthersSigner};
use ethers::types::Address;

use crate::error::SignerError;

/// Produces the detached hex signatures carried in frame signature arrays.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Address the signatures verify against.
    fn address(&self) -> Address;

    /// Sign arbitrary payload bytes, returning 0x-prefixed hex.
    async fn sign(&self, payload: &[u8]) -> Result<String, SignerError>;
}

/// Local-wallet signer built from a raw private key.
pub struct WalletSigner {
    wallet: LocalWallet,
}

impl WalletSigner {
    pub fn from_key(private_key: &str, chain_id: u64) -> Result<Self, SignerError> {
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| SignerError(e.to_string()))?
            .with_chain_id(chain_id);
        Ok(Self { wallet })
    }

    /// The underlying wallet, for components that submit transactions.
    pub fn wallet(&self) -> LocalWallet {
        self.wallet.clone()
    }
}

#[async_trait]
impl Signer for WalletSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, payload: &[u8]) -> Result<String, SignerError> {
        let signature = self
            .wallet
            .sign_message(payload)
            .await
            .map_err(|e| SignerError(e.to_string()))?;
        Ok(format!("0x{signature}"))
    }
}
