// src/rpc/auth.rs
//! Challenge-response authentication against the node.
//!
//! The fresh handshake is two calls: `auth_request` yields a challenge
//! message, `auth_verify` echoes it back. Both frames carry the wallet
//! signature in the envelope, which is what the node checks. A session
//! token from an earlier connection short-circuits the handshake when the
//! node still accepts it.

use std::time::Duration;

use chrono::Utc;
use ethers::types::Address;
use tracing::{debug, info, warn};

use crate::error::{AuthError, RpcError};
use crate::protocol::{
    methods, AuthChallenge, AuthRequestParams, AuthResult, AuthResumeParams, AuthVerifyParams,
};
use crate::rpc::connection::Connection;

/// Knobs for [`Connection::authenticate`].
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// Application name presented to the node.
    pub application: String,
    /// How long the requested session should stay valid.
    pub expiry: Duration,
    /// Token from a previous session to try before the full handshake.
    pub jwt: Option<String>,
    /// Per-call deadline for the handshake RPCs.
    pub timeout: Duration,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            application: "clearnode-client".to_string(),
            expiry: Duration::from_secs(3600),
            jwt: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// What the node granted.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub address: Address,
    /// Token for resuming on the next connection, when issued.
    pub jwt: Option<String>,
}

impl Connection {
    /// Authenticate this connection, preferring token resumption when a
    /// token is on offer and falling back to the challenge handshake.
    pub async fn authenticate(
        &self,
        address: Address,
        options: &AuthOptions,
    ) -> Result<AuthSession, AuthError> {
        if let Some(jwt) = &options.jwt {
            match self.resume_with_token(jwt, options.timeout).await {
                Ok(session) => {
                    info!(address = ?address, "authenticated from stored token");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(error = %e, "stored token rejected, falling back to challenge handshake");
                }
            }
        }

        let request = AuthRequestParams {
            address,
            application: options.application.clone(),
            expires_at: Utc::now().timestamp() as u64 + options.expiry.as_secs(),
        };
        let challenge: AuthChallenge = self
            .call_typed(methods::AUTH_REQUEST, &request, options.timeout)
            .await
            .map_err(challenge_error)?;
        debug!("received auth challenge");

        let verify = AuthVerifyParams {
            address,
            challenge: challenge.challenge_message,
        };
        let granted: AuthResult = self
            .call_typed(methods::AUTH_VERIFY, &verify, options.timeout)
            .await
            .map_err(verify_error)?;

        self.set_authenticated(granted.jwt_token.clone());
        info!(address = ?address, "authenticated");
        Ok(AuthSession {
            address: granted.address.unwrap_or(address),
            jwt: granted.jwt_token,
        })
    }

    async fn resume_with_token(
        &self,
        jwt: &str,
        timeout: Duration,
    ) -> Result<AuthSession, AuthError> {
        let params = AuthResumeParams {
            jwt: jwt.to_string(),
        };
        let granted: AuthResult = self
            .call_typed(methods::AUTH_VERIFY, &params, timeout)
            .await
            .map_err(verify_error)?;

        let address = granted
            .address
            .ok_or_else(|| AuthError::MalformedReply("token reply without an address".into()))?;
        self.set_authenticated(granted.jwt_token.clone().or_else(|| Some(jwt.to_string())));
        Ok(AuthSession {
            address,
            jwt: self.reconnect_token(),
        })
    }
}

fn challenge_error(e: RpcError) -> AuthError {
    match e {
        RpcError::Remote { message, .. } => AuthError::ChallengeRejected(message),
        RpcError::MalformedResult { reason, .. } => AuthError::MalformedReply(reason),
        other => AuthError::Rpc(other),
    }
}

fn verify_error(e: RpcError) -> AuthError {
    match e {
        RpcError::Remote { message, .. } => AuthError::VerifyFailed(message),
        RpcError::MalformedResult { reason, .. } => AuthError::MalformedReply(reason),
        other => AuthError::Rpc(other),
    }
}
