// src/rpc/connection.rs
//! Owned connection to the node.
//!
//! One spawned task services the transport: it writes queued frames, parses
//! inbound ones, and routes responses to the pending-request registry or the
//! server-push channel. Callers hold the `Connection` handle and issue
//! correlated calls through it; there are no globals.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, RpcError};
use crate::protocol::{methods, ErrorPayload, ServerUpdate};
use crate::rpc::frame::{Envelope, MessageBody};
use crate::rpc::pending::PendingRequests;
use crate::rpc::transport::{InboundReceiver, Transport, WsTransport};
use crate::signer::Signer;

/// Server pushes a subscriber may fall behind on before old ones drop.
const UPDATE_CHANNEL_CAPACITY: usize = 32;

enum Command {
    Send(String),
    Shutdown,
}

/// Connection-scoped flags and tokens.
#[derive(Default)]
struct SessionState {
    connected: AtomicBool,
    authenticated: AtomicBool,
    jwt: StdMutex<Option<String>>,
    app_session: StdMutex<Option<String>>,
}

impl SessionState {
    fn new_connected() -> Self {
        let state = Self::default();
        state.connected.store(true, Ordering::Relaxed);
        state
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.authenticated.store(false, Ordering::Relaxed);
    }

    fn jwt(&self) -> Option<String> {
        self.jwt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_jwt(&self, token: Option<String>) {
        *self.jwt.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn app_session(&self) -> Option<String> {
        self.app_session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_app_session(&self, id: Option<String>) {
        *self
            .app_session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = id;
    }
}

/// Handle to one open connection.
pub struct Connection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    pending: Arc<PendingRequests>,
    session: Arc<SessionState>,
    updates_tx: broadcast::Sender<ServerUpdate>,
    signer: Arc<dyn Signer>,
    next_id: AtomicU64,
    service: JoinHandle<()>,
}

impl Connection {
    /// Open a WebSocket to the node and start servicing it.
    pub async fn connect(
        url: &str,
        signer: Arc<dyn Signer>,
        connect_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let (transport, inbound) = WsTransport::connect(url, connect_timeout).await?;
        info!(%url, "connected to node");
        Ok(Self::start(transport, inbound, signer))
    }

    /// Service an already-open transport. This is the seam test doubles
    /// plug into.
    pub fn start<T: Transport>(
        transport: T,
        inbound: InboundReceiver,
        signer: Arc<dyn Signer>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingRequests::new());
        let session = Arc::new(SessionState::new_connected());
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        let service = tokio::spawn(service_loop(
            transport,
            inbound,
            cmd_rx,
            pending.clone(),
            session.clone(),
            updates_tx.clone(),
        ));

        Self {
            cmd_tx,
            pending,
            session,
            updates_tx,
            signer,
            next_id: AtomicU64::new(1),
            service,
        }
    }

    /// Issue one correlated call and wait for its result.
    ///
    /// The request id is the correlation key; it is unique for the life of
    /// the connection. An elapsed deadline forgets the entry, so a response
    /// arriving later is dropped as unsolicited.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        if !self.is_connected() {
            return Err(RpcError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = MessageBody::new(id, method, params);
        let payload = body
            .to_signing_bytes()
            .map_err(|e| RpcError::Encode(e.to_string()))?;
        let signature = self.signer.sign(&payload).await?;
        let envelope = Envelope {
            req: Some(body),
            ..Default::default()
        }
        .with_signature(signature);
        let text = serde_json::to_string(&envelope).map_err(|e| RpcError::Encode(e.to_string()))?;

        // register before writing so a fast response cannot race the entry
        let rx = self.pending.register(id, method).await;
        if self.cmd_tx.send(Command::Send(text)).is_err() {
            self.pending.cancel(id).await;
            return Err(RpcError::NotConnected);
        }
        debug!(id, method, "request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => {
                self.pending.cancel(id).await;
                warn!(id, method, after = ?timeout, "request timed out");
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// `call` with typed params and result.
    pub async fn call_typed<P, R>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<R, RpcError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| RpcError::Encode(e.to_string()))?;
        let result = self.call(method, params, timeout).await?;
        serde_json::from_value(result).map_err(|e| RpcError::MalformedResult {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    /// Subscribe to server pushes (channel and balance updates).
    pub fn updates(&self) -> broadcast::Receiver<ServerUpdate> {
        self.updates_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.session.connected.load(Ordering::Relaxed)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.authenticated.load(Ordering::Relaxed)
    }

    /// Token for resuming authentication on a later connection, when the
    /// node issued one.
    pub fn reconnect_token(&self) -> Option<String> {
        self.session.jwt()
    }

    /// Identifier of the currently open application session, if any.
    pub fn app_session_id(&self) -> Option<String> {
        self.session.app_session()
    }

    pub(crate) fn set_authenticated(&self, jwt: Option<String>) {
        self.session.authenticated.store(true, Ordering::Relaxed);
        self.session.set_jwt(jwt);
    }

    pub(crate) fn set_app_session(&self, id: Option<String>) {
        self.session.set_app_session(id);
    }

    /// Ask the service task to close the transport and stop. Outstanding
    /// calls are rejected during teardown.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.service.abort();
    }
}

async fn service_loop<T: Transport>(
    mut transport: T,
    mut inbound: InboundReceiver,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    pending: Arc<PendingRequests>,
    session: Arc<SessionState>,
    updates: broadcast::Sender<ServerUpdate>,
) {
    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(Command::Send(frame)) => {
                    if let Err(e) = transport.send(frame).await {
                        warn!(error = %e, "frame write failed, closing connection");
                        break;
                    }
                }
                Some(Command::Shutdown) | None => {
                    transport.close().await;
                    debug!("connection shut down locally");
                    break;
                }
            },
            frame = inbound.recv() => match frame {
                Some(text) => dispatch_frame(&text, &pending, &updates).await,
                None => {
                    info!("transport closed by remote");
                    break;
                }
            },
        }
    }

    session.disconnect();
    pending.fail_all().await;
}

/// Route one inbound frame: unparseable frames are dropped, error frames
/// reject their caller, correlated results resolve theirs, known pushes go
/// to subscribers, and everything else is ignored.
async fn dispatch_frame(
    text: &str,
    pending: &PendingRequests,
    updates: &broadcast::Sender<ServerUpdate>,
) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "dropping unparseable frame");
            return;
        }
    };
    let Some(body) = envelope.response_body() else {
        debug!("dropping frame without a response body");
        return;
    };

    if body.method() == methods::ERROR {
        let message = ErrorPayload::message(body.payload());
        if !pending.reject(body.id(), message).await {
            debug!(id = body.id(), "unsolicited error frame");
        }
        return;
    }

    if pending.resolve(body.id(), body.payload().clone()).await {
        return;
    }

    match ServerUpdate::from_frame(body.method(), body.payload()) {
        Some(update) => {
            let _ = updates.send(update);
        }
        None => debug!(
            id = body.id(),
            method = body.method(),
            "ignoring unsolicited response"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn harness() -> (Arc<PendingRequests>, broadcast::Sender<ServerUpdate>) {
        let (updates_tx, _) = broadcast::channel(8);
        (Arc::new(PendingRequests::new()), updates_tx)
    }

    #[tokio::test]
    async fn test_dispatch_resolves_by_id() {
        let (pending, updates) = harness();
        let rx = pending.register(5, "get_channels").await;

        let frame = serde_json::to_string(&Envelope::response(
            5,
            "get_channels",
            json!({ "channels": [] }),
        ))
        .unwrap();
        dispatch_frame(&frame, &pending, &updates).await;

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result["channels"], json!([]));
    }

    #[tokio::test]
    async fn test_dispatch_rejects_on_error_frames() {
        let (pending, updates) = harness();
        let rx = pending.register(9, "create_channel").await;

        let frame = serde_json::to_string(&Envelope::response(
            9,
            methods::ERROR,
            json!({ "error": "nope" }),
        ))
        .unwrap();
        dispatch_frame(&frame, &pending, &updates).await;

        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            RpcError::Remote {
                method: "create_channel".to_string(),
                message: "nope".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_unsolicited_pushes_reach_subscribers() {
        let (pending, updates) = harness();
        let mut subscription = updates.subscribe();

        let frame = serde_json::to_string(&Envelope::response(
            1_000,
            methods::BALANCE_UPDATE,
            json!({ "balances": [{ "asset": "usdc", "amount": "0x5" }] }),
        ))
        .unwrap();
        dispatch_frame(&frame, &pending, &updates).await;

        match subscription.try_recv().unwrap() {
            ServerUpdate::Balance(update) => {
                assert_eq!(update.balances.len(), 1);
                assert_eq!(update.balances[0].asset, "usdc");
            }
            ServerUpdate::Channel(_) => panic!("wrong update variant"),
        }
    }

    #[tokio::test]
    async fn test_garbage_and_unknown_frames_are_dropped() {
        let (pending, updates) = harness();

        // none of these may panic or disturb the registry
        dispatch_frame("{truncated", &pending, &updates).await;
        dispatch_frame(r#"{"sig":[]}"#, &pending, &updates).await;
        let frame =
            serde_json::to_string(&Envelope::response(77, "something_else", json!({}))).unwrap();
        dispatch_frame(&frame, &pending, &updates).await;

        assert_eq!(pending.outstanding().await, 0);
    }
}
