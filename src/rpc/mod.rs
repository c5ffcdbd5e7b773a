// src/rpc/mod.rs
//! Node RPC: wire frames, the pending-request registry, and the connection
//! servicing one transport.

pub mod auth;
pub mod connection;
pub mod frame;
pub mod pending;
pub mod transport;

pub use auth::{AuthOptions, AuthSession};
pub use connection::Connection;
pub use frame::{Envelope, MessageBody};
pub use pending::PendingRequests;
pub use transport::{InboundReceiver, Transport, WsTransport};
