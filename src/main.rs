// ./src/main.rs
//! Demo binary: run one full channel lifecycle against a node.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clearnode_client::chain::EvmChain;
use clearnode_client::lifecycle::{ChannelLifecycle, FundingOutcome, WithdrawalOutcome};
use clearnode_client::rpc::{AuthOptions, Connection};
use clearnode_client::signer::{Signer, WalletSigner};
use clearnode_client::types::ChannelTarget;
use clearnode_client::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let signer = Arc::new(
        WalletSigner::from_key(&config.private_key, config.chain_id)
            .context("parsing wallet key")?,
    );
    let chain = EvmChain::new(
        &config.rpc_url,
        signer.wallet(),
        config.custody,
        config.confirmations,
    )
    .context("setting up the chain client")?;

    let conn = Connection::connect(&config.node_url, signer.clone(), config.connect_timeout)
        .await
        .context("connecting to the node")?;

    let target = ChannelTarget {
        address: signer.address(),
        chain_id: config.chain_id,
        token: config.token,
        adjudicator: config.adjudicator,
    };
    let auth = AuthOptions {
        application: config.app_name.clone(),
        ..AuthOptions::default()
    };

    let mut lifecycle = ChannelLifecycle::new(&conn, &chain, target, config.policy.clone());
    let report = lifecycle.run(&auth).await.context("channel lifecycle")?;

    info!(channel = ?report.channel.id, reused = report.reused, "lifecycle finished");
    match &report.funding {
        FundingOutcome::Skipped => info!("funding skipped, existing allocation was enough"),
        FundingOutcome::Confirmed { balance } => info!(%balance, "funding confirmed"),
        FundingOutcome::Underfunded { observed, required } => {
            warn!(%observed, %required, "funding never confirmed on-chain")
        }
    }
    match &report.withdrawal {
        WithdrawalOutcome::Withdrawn { amount, tx_hash } => {
            info!(%amount, tx = ?tx_hash, "funds withdrawn")
        }
        WithdrawalOutcome::Deferred { reason } => info!(%reason, "withdrawal deferred"),
    }
    if conn.reconnect_token().is_some() {
        info!("session token stored for reconnection");
    }

    conn.close();
    Ok(())
}
