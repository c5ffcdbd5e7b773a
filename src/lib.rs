// ./src/lib.rs

pub mod app_session;
pub mod chain;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod rpc;
pub mod signer;
pub mod types;

pub use chain::{ChainClient, EvmChain, PreparedCall, TxOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use lifecycle::{ChannelLifecycle, FundingOutcome, LifecyclePolicy, LifecycleReport};
pub use rpc::{AuthOptions, Connection};
pub use signer::{Signer, WalletSigner};
pub use types::{ChannelHandle, ChannelStatus, ChannelTarget};
