// ./src/error.rs
//! Error types for the ClearNode client library
//!
//! This module defines error types used throughout the library,
//! split by concern so callers can match on the failure domain
//! (transport, authentication, RPC exchange, on-chain submission).

use std::time::Duration;

use ethers::types::U256;
use thiserror::Error;

/// The main error type for the ClearNode client library
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Transport open/handshake errors
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Frame write/read errors on an open transport
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Authentication handshake errors
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Request/response correlation errors
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// On-chain query/submission errors
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Payload signing errors
    #[error(transparent)]
    Signer(#[from] SignerError),

    /// Environment configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Lifecycle sequencing errors
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Errors raised while opening the connection to the node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The transport did not open within the deadline
    #[error("connection to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    /// The transport failed to open
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Errors raised on an already-open transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// A frame could not be written
    #[error("frame write failed: {0}")]
    Send(String),

    /// The transport is no longer open
    #[error("transport closed")]
    Closed,
}

/// Errors raised by the authentication handshake
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    /// The node refused to issue a challenge
    #[error("auth challenge rejected: {0}")]
    ChallengeRejected(String),

    /// The node rejected the signed challenge or stored token
    #[error("auth verification failed: {0}")]
    VerifyFailed(String),

    /// The auth reply did not have the expected shape
    #[error("malformed auth reply: {0}")]
    MalformedReply(String),

    /// Transport-level failure while authenticating
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Errors raised by the request/response exchange with the node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RpcError {
    /// The node answered with an error frame
    #[error("node returned an error for {method}: {message}")]
    Remote { method: String, message: String },

    /// No correlated response arrived within the deadline
    #[error("no response to {method} within {after:?}")]
    Timeout { method: String, after: Duration },

    /// The connection dropped while the request was outstanding
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// The transport is not open
    #[error("not connected")]
    NotConnected,

    /// The result payload did not deserialize into the expected shape
    #[error("malformed {method} result: {reason}")]
    MalformedResult { method: String, reason: String },

    /// The outbound frame could not be encoded
    #[error("could not encode request: {0}")]
    Encode(String),

    /// The outbound frame could not be signed
    #[error(transparent)]
    Signing(#[from] SignerError),
}

/// Errors raised by the on-chain adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChainError {
    /// Provider/query failure
    #[error("provider error: {0}")]
    Provider(String),

    /// Transaction submission or confirmation failure
    #[error("transaction submission failed: {0}")]
    Submission(String),

    /// Withdrawal call failure; non-fatal by lifecycle policy
    #[error("withdrawal failed: {0}")]
    Withdrawal(String),

    /// The transaction was dropped without producing a receipt
    #[error("transaction dropped without a receipt")]
    MissingReceipt,
}

/// Opaque failure from the payload signer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("signing failed: {0}")]
pub struct SignerError(pub String);

/// Errors raised while reading environment configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required variable is not set
    #[error("missing required environment variable {0}")]
    MissingVar(String),

    /// A variable is set but does not parse
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Errors that abort a lifecycle run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LifecycleError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Funding never confirmed and the strict policy is active
    #[error("channel funding unconfirmed: observed {observed} of {required} after polling")]
    Underfunded { observed: U256, required: U256 },
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
