// src/config.rs
//! Environment-driven configuration.
//!
//! Everything the binary needs comes from environment variables (a local
//! `.env` file is honored). Required variables fail fast with the variable
//! name; lifecycle tunables fall back to the node's documented cadence.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use ethers::types::{Address, U256};

use crate::error::ConfigError;
use crate::lifecycle::{FundingPolicy, LifecyclePolicy};

#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket endpoint of the node.
    pub node_url: String,
    /// HTTP endpoint of the EVM chain.
    pub rpc_url: String,
    /// Hex-encoded wallet key. Parsed by the signer, not here.
    pub private_key: String,
    pub chain_id: u64,
    pub custody: Address,
    pub adjudicator: Address,
    pub token: Address,
    /// Application name presented during authentication.
    pub app_name: String,
    pub connect_timeout: Duration,
    /// Confirmations to wait on submitted transactions.
    pub confirmations: usize,
    pub policy: LifecyclePolicy,
}

impl Config {
    /// Reads every setting from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_url = require("CLEARNODE_URL")?;
        let rpc_url = require("RPC_URL")?;
        let private_key = require("PRIVATE_KEY")?;
        let chain_id = parse_with("CHAIN_ID", &require("CHAIN_ID")?, |s| s.parse())?;
        let custody = address("CUSTODY_ADDRESS")?;
        let adjudicator = address("ADJUDICATOR_ADDRESS")?;
        let token = address("TOKEN_ADDRESS")?;

        let app_name = optional("APP_NAME").unwrap_or_else(|| "clearnode-client".to_string());
        let connect_timeout =
            Duration::from_secs(optional_parsed("CONNECT_TIMEOUT_SECS")?.unwrap_or(10));
        let confirmations = optional_parsed("TX_CONFIRMATIONS")?.unwrap_or(1);

        let mut policy = LifecyclePolicy::default();
        if let Some(raw) = optional("FUNDING_THRESHOLD") {
            policy.reuse_threshold = parse_with("FUNDING_THRESHOLD", &raw, U256::from_dec_str)?;
        }
        if let Some(raw) = optional("DEPOSIT_AMOUNT") {
            policy.deposit_amount = parse_with("DEPOSIT_AMOUNT", &raw, U256::from_dec_str)?;
        }
        if let Some(secs) = optional_parsed("FUNDING_POLL_INTERVAL_SECS")? {
            policy.poll_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = optional_parsed("FUNDING_POLL_ATTEMPTS")? {
            policy.poll_attempts = attempts;
        }
        if let Some(secs) = optional_parsed("SETTLE_DELAY_SECS")? {
            policy.settle_delay = Duration::from_secs(secs);
        }
        if let Some(raw) = optional("FUNDING_POLICY") {
            policy.funding = parse_with("FUNDING_POLICY", &raw, FundingPolicy::from_str)?;
        }

        Ok(Self {
            node_url,
            rpc_url,
            private_key,
            chain_id,
            custody,
            adjudicator,
            token,
            app_name,
            connect_timeout,
            confirmations,
            policy,
        })
    }
}

fn require(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(name.to_string())),
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_with<T, E>(
    name: &str,
    raw: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, ConfigError>
where
    E: std::fmt::Display,
{
    parse(raw).map_err(|e| ConfigError::Invalid {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn address(name: &str) -> Result<Address, ConfigError> {
    parse_with(name, &require(name)?, Address::from_str)
}

fn optional_parsed<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional(name)
        .map(|raw| parse_with(name, &raw, |s| s.parse()))
        .transpose()
}
