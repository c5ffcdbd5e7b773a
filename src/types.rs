//! Core type definitions for the ClearNode client library
//!
//! This module defines fundamental types used across multiple modules,
//! providing a centralized location for shared type definitions.

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Type alias for the 32-byte channel identifier assigned by the node
pub type ChannelId = H256;

/// On-chain standing of a channel as reported by the node or custody contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// Known to the node but not yet anchored on-chain
    Absent,
    /// Anchored and usable
    Open,
    /// Close requested, final state not yet settled
    Closing,
    /// Settled on-chain
    Closed,
}

/// Local view of one channel across a lifecycle run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHandle {
    /// Identifier assigned at creation
    pub id: ChannelId,
    /// Funding token address
    pub token: Address,
    /// On-chain standing
    pub status: ChannelStatus,
    /// Cumulative allocation moved into the channel
    pub amount: U256,
}

impl ChannelHandle {
    /// A handle for a freshly requested channel, before on-chain anchoring.
    pub fn new(id: ChannelId, token: Address) -> Self {
        Self {
            id,
            token,
            status: ChannelStatus::Absent,
            amount: U256::zero(),
        }
    }

    /// Record an allocation moved into the channel.
    pub fn credit(&mut self, delta: U256) {
        self.amount = self.amount.saturating_add(delta);
    }
}

/// Where a lifecycle run anchors its channel: the participant address and
/// the chain/token/adjudicator the node is asked to create against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTarget {
    /// Participant (wallet) address
    pub address: Address,
    /// EVM chain id the custody contract lives on
    pub chain_id: u64,
    /// Funding token address
    pub token: Address,
    /// Adjudicator contract address, passed through to channel creation
    pub adjudicator: Address,
}

/// Abbreviated hex rendering for log lines.
pub fn short_hex(id: &ChannelId) -> String {
    format!("0x{}..", hex::encode(&id.as_bytes()[..4]))
}
