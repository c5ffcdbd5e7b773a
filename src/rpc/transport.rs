// src/rpc/transport.rs
//! Framed text transport to the node.
//!
//! A connector yields a write handle plus an inbound frame channel; the
//! channel closing signals that the transport is gone. The WebSocket
//! implementation is the production path, with a dedicated read task pumping
//! frames into the channel.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{ConnectionError, TransportError};

/// Inbound text frames; the channel closes when the transport does.
pub type InboundReceiver = mpsc::UnboundedReceiver<String>;

/// Write half of a framed text pipe.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;
    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport to the node.
pub struct WsTransport {
    write: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

impl WsTransport {
    /// Open the socket, enforcing a connect deadline.
    pub async fn connect(
        url: &str,
        deadline: Duration,
    ) -> Result<(Self, InboundReceiver), ConnectionError> {
        let (stream, _response) = tokio::time::timeout(deadline, connect_async(url))
            .await
            .map_err(|_| ConnectionError::Timeout {
                url: url.to_string(),
                after: deadline,
            })?
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        let (write, mut read) = stream.split();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "node closed the socket");
                        break;
                    }
                    // pings are answered by the socket layer; binary frames
                    // are not part of the protocol
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
        });

        Ok((Self { write, reader }, inbound_rx))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.write.close().await;
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
