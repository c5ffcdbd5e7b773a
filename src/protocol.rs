// ./src/protocol.rs
//! Typed request parameters and response results, per node method.
//!
//! These give shape to the otherwise-opaque frame payloads. Field names
//! match the node's JSON; anything the node adds beyond them is ignored on
//! deserialization.

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::PreparedCall;
use crate::types::{ChannelHandle, ChannelId, ChannelStatus};

/// Method tags on the wire.
pub mod methods {
    pub const AUTH_REQUEST: &str = "auth_request";
    pub const AUTH_VERIFY: &str = "auth_verify";
    pub const ERROR: &str = "error";
    pub const GET_CHANNELS: &str = "get_channels";
    pub const GET_LEDGER_BALANCES: &str = "get_ledger_balances";
    pub const CREATE_CHANNEL: &str = "create_channel";
    pub const RESIZE_CHANNEL: &str = "resize_channel";
    pub const CLOSE_CHANNEL: &str = "close_channel";
    pub const CREATE_APP_SESSION: &str = "create_app_session";
    pub const CLOSE_APP_SESSION: &str = "close_app_session";
    pub const CHANNEL_UPDATE: &str = "channel_update";
    pub const BALANCE_UPDATE: &str = "balance_update";
}

/// Payload of an `error` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorPayload {
    /// Best-effort message extraction; falls back to the raw payload.
    pub fn message(payload: &Value) -> String {
        serde_json::from_value::<ErrorPayload>(payload.clone())
            .ok()
            .and_then(|p| p.error)
            .unwrap_or_else(|| payload.to_string())
    }
}

// --- authentication ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequestParams {
    pub address: Address,
    pub application: String,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthChallenge {
    pub challenge_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthVerifyParams {
    pub address: Address,
    pub challenge: String,
}

/// Re-authentication with a token from an earlier session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResumeParams {
    pub jwt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub jwt_token: Option<String>,
}

// --- channel queries and mutations ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetChannelsParams {
    pub participant: Address,
}

/// One channel as listed by the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel_id: ChannelId,
    pub token: Address,
    pub amount: U256,
    pub status: ChannelStatus,
}

impl ChannelInfo {
    /// Whether this channel can be adopted instead of creating a new one.
    pub fn reusable(&self, token: Address, threshold: U256) -> bool {
        self.status == ChannelStatus::Open && self.token == token && self.amount >= threshold
    }
}

impl From<&ChannelInfo> for ChannelHandle {
    fn from(info: &ChannelInfo) -> Self {
        Self {
            id: info.channel_id,
            token: info.token,
            status: info.status,
            amount: info.amount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetChannelsResult {
    #[serde(default)]
    pub channels: Vec<ChannelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChannelParams {
    pub chain_id: u64,
    pub token: Address,
    pub amount: U256,
    pub adjudicator: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeChannelParams {
    pub channel_id: ChannelId,
    pub allocate_amount: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseChannelParams {
    pub channel_id: ChannelId,
    pub funds_destination: Address,
}

/// Shared result shape of create/resize/close: the channel plus the
/// prepared custody call that anchors the operation on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelOpResult {
    pub channel_id: ChannelId,
    pub call: PreparedCall,
}

// --- off-chain ledger ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLedgerBalancesParams {
    pub participant: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerBalance {
    pub asset: String,
    pub amount: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLedgerBalancesResult {
    #[serde(default)]
    pub balances: Vec<LedgerBalance>,
}

// --- application sessions ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppDefinition {
    pub application: String,
    pub participants: Vec<Address>,
    pub weights: Vec<u64>,
    pub quorum: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub participant: Address,
    pub asset: String,
    pub amount: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppSessionParams {
    pub definition: AppDefinition,
    pub allocations: Vec<Allocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseAppSessionParams {
    pub app_session_id: String,
    pub allocations: Vec<Allocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSessionResult {
    pub app_session_id: String,
}

// --- server pushes ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub channel_id: ChannelId,
    pub status: ChannelStatus,
    #[serde(default)]
    pub amount: Option<U256>,
    /// Present when the update carries calldata to settle on-chain, e.g. a
    /// close confirmation re-broadcast.
    #[serde(default)]
    pub call: Option<PreparedCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceUpdate {
    #[serde(default)]
    pub balances: Vec<LedgerBalance>,
}

/// Unsolicited frames the node pushes outside request/response pairs.
#[derive(Debug, Clone)]
pub enum ServerUpdate {
    Channel(ChannelUpdate),
    Balance(BalanceUpdate),
}

impl ServerUpdate {
    /// Typed view of a push frame; None when the method is not a known push
    /// or the payload does not fit it.
    pub fn from_frame(method: &str, payload: &Value) -> Option<Self> {
        match method {
            methods::CHANNEL_UPDATE => serde_json::from_value(payload.clone())
                .ok()
                .map(ServerUpdate::Channel),
            methods::BALANCE_UPDATE => serde_json::from_value(payload.clone())
                .ok()
                .map(ServerUpdate::Balance),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reusable_requires_open_status_token_and_threshold() {
        let token = Address::from_low_u64_be(0xbb);
        let info = ChannelInfo {
            channel_id: ChannelId::from_low_u64_be(1),
            token,
            amount: U256::from(25),
            status: ChannelStatus::Open,
        };
        assert!(info.reusable(token, U256::from(20)));
        assert!(!info.reusable(token, U256::from(30)));
        assert!(!info.reusable(Address::zero(), U256::from(20)));

        let closing = ChannelInfo {
            status: ChannelStatus::Closing,
            ..info
        };
        assert!(!closing.reusable(token, U256::from(20)));
    }

    #[test]
    fn test_error_payload_message_fallbacks() {
        assert_eq!(
            ErrorPayload::message(&json!({ "error": "bad challenge" })),
            "bad challenge"
        );
        // anything else degrades to the raw payload text
        assert_eq!(ErrorPayload::message(&json!(42)), "42");
    }

    #[test]
    fn test_channel_update_from_frame() {
        let payload = json!({
            "channel_id": "0x0000000000000000000000000000000000000000000000000000000000000007",
            "status": "closing",
        });
        let update = ServerUpdate::from_frame(methods::CHANNEL_UPDATE, &payload).unwrap();
        match update {
            ServerUpdate::Channel(u) => {
                assert_eq!(u.channel_id, ChannelId::from_low_u64_be(7));
                assert_eq!(u.status, ChannelStatus::Closing);
                assert!(u.call.is_none());
            }
            ServerUpdate::Balance(_) => panic!("wrong variant"),
        }
        assert!(ServerUpdate::from_frame("auth_verify", &payload).is_none());
    }
}
