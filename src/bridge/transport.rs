//! Transport seam
//!
//! A [`Connector`] dials an [`Endpoint`] and yields a [`TransportLink`]: a
//! pair of channels carrying outbound frames and inbound transport events.
//! The connection manager only ever sees the link, so the WebSocket
//! connector used in production and the in-memory connector used by tests
//! are interchangeable.

use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use super::Endpoint;
use super::codec::{self, Envelope};
use super::error::TransportError;

/// Frame queued for the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame
    Text(String),
    /// Close the link cleanly
    Close,
}

/// Event reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Inbound text frame
    Message(String),
    /// Link closed by the remote side or dropped
    Closed {
        /// Close code, when one was sent
        code: Option<u16>,
        /// Close reason
        reason: String,
        /// Whether a close handshake took place
        clean: bool,
    },
    /// Link failed
    Error(String),
}

/// An established link
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to send; dropping the sender closes the link
    pub outbound: mpsc::UnboundedSender<Frame>,
    /// Events from the remote side
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Dials endpoints
pub trait Connector: Send + Sync + 'static {
    /// Open a link to `endpoint`.
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> BoxFuture<'static, Result<TransportLink, TransportError>>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a WebSocket connector
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> BoxFuture<'static, Result<TransportLink, TransportError>> {
        let url = endpoint.url.clone();
        Box::pin(async move {
            let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(map_ws_error)?;
            debug!(url = %url, "WebSocket handshake complete");

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump(ws, outbound_rx, inbound_tx));

            Ok(TransportLink {
                outbound: outbound_tx,
                inbound: inbound_rx,
            })
        })
    }
}

fn map_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Io(io_err) if io_err.kind() == io::ErrorKind::ConnectionRefused => {
            TransportError::Refused(io_err.to_string())
        }
        tungstenite::Error::Io(io_err) => TransportError::from(io_err),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed(err.to_string())
        }
        other => TransportError::Io(other.to_string()),
    }
}

async fn pump<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Frame::Text(text)) => {
                    if let Err(err) = sink.send(Message::Text(text.into())).await {
                        let _ = inbound.send(TransportEvent::Error(err.to_string()));
                        break;
                    }
                }
                Some(Frame::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(TransportEvent::Message(text.as_str().to_string())).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    warn!(len = bytes.len(), "Discarding binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => {
                            (Some(u16::from(frame.code)), frame.reason.as_str().to_string())
                        }
                        None => (None, String::new()),
                    };
                    let _ = inbound.send(TransportEvent::Closed { code, reason, clean: true });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = inbound.send(TransportEvent::Error(err.to_string()));
                    break;
                }
                None => {
                    let _ = inbound.send(TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".into(),
                        clean: false,
                    });
                    break;
                }
            },
        }
    }
}

enum Scripted {
    Link(TransportLink),
    Fail(TransportError),
    Hang,
}

#[derive(Default)]
struct MemoryInner {
    script: Mutex<VecDeque<Scripted>>,
    attempts: AtomicUsize,
    dialed: Mutex<Vec<String>>,
}

/// In-memory connector whose outcomes are scripted ahead of time
///
/// Each `connect` call pops the next scripted outcome; with nothing
/// scripted the attempt is refused.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<MemoryInner>,
}

impl MemoryConnector {
    /// Create a connector with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful connection and return its remote end.
    pub fn push_link(&self) -> MemoryPeer {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.inner.script.lock().push_back(Scripted::Link(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        }));
        MemoryPeer {
            events: inbound_tx,
            frames: outbound_rx,
        }
    }

    /// Script a failed connection attempt.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.inner
            .script
            .lock()
            .push_back(Scripted::Fail(TransportError::Refused(message.into())));
    }

    /// Script an attempt that never completes.
    pub fn push_hang(&self) {
        self.inner.script.lock().push_back(Scripted::Hang);
    }

    /// Number of `connect` calls so far
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// URLs dialed so far, in order
    pub fn dialed(&self) -> Vec<String> {
        self.inner.dialed.lock().clone()
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> BoxFuture<'static, Result<TransportLink, TransportError>> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.dialed.lock().push(endpoint.url.clone());
        let next = self.inner.script.lock().pop_front();
        Box::pin(async move {
            match next {
                Some(Scripted::Link(link)) => Ok(link),
                Some(Scripted::Fail(err)) => Err(err),
                Some(Scripted::Hang) => futures::future::pending().await,
                None => Err(TransportError::Refused("no scripted connection".into())),
            }
        })
    }
}

/// Remote end of a scripted in-memory link
#[derive(Debug)]
pub struct MemoryPeer {
    events: mpsc::UnboundedSender<TransportEvent>,
    frames: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// Deliver a raw text frame to the bridge.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.events.send(TransportEvent::Message(text.into())).is_ok()
    }

    /// Deliver an envelope to the bridge.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        self.send_text(codec::serialize(envelope))
    }

    /// Close the link from the remote side.
    pub fn close(&self, clean: bool) -> bool {
        self.events
            .send(TransportEvent::Closed {
                code: clean.then_some(1000),
                reason: String::new(),
                clean,
            })
            .is_ok()
    }

    /// Fail the link with a transport error.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.events.send(TransportEvent::Error(message.into())).is_ok()
    }

    /// Next frame sent by the bridge; `None` once the bridge dropped the link.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Next envelope sent by the bridge, skipping frames that do not parse.
    ///
    /// Returns `None` on a close frame or once the link is gone.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.frames.recv().await? {
                Frame::Text(text) => {
                    if let Ok(envelope) = codec::parse(&text) {
                        return Some(envelope);
                    }
                }
                Frame::Close => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint() -> Endpoint {
        Endpoint {
            url: "ws://localhost:6277/".into(),
            tls: false,
        }
    }

    #[tokio::test]
    async fn memory_connector_follows_script() {
        let connector = MemoryConnector::new();
        connector.push_failure("refused");
        let mut peer = connector.push_link();

        let err = connector.connect(&endpoint()).await.unwrap_err();
        assert!(matches!(err, TransportError::Refused(_)));

        let mut link = connector.connect(&endpoint()).await.unwrap();
        assert!(peer.send_envelope(&Envelope::notification("ping", json!({}))));
        match link.inbound.recv().await.unwrap() {
            TransportEvent::Message(text) => assert!(text.contains("ping")),
            other => panic!("unexpected event {other:?}"),
        }

        link.outbound.send(Frame::Text("hello".into())).unwrap();
        assert_eq!(peer.next_frame().await, Some(Frame::Text("hello".into())));

        drop(link);
        assert_eq!(peer.next_frame().await, None);

        assert!(connector.connect(&endpoint()).await.is_err());
        assert_eq!(connector.attempts(), 3);
        assert_eq!(connector.dialed().len(), 3);
    }

    #[test]
    fn refused_io_errors_map_to_refused() {
        let err = tungstenite::Error::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(matches!(map_ws_error(err), TransportError::Refused(_)));
        let err = tungstenite::Error::ConnectionClosed;
        assert!(matches!(map_ws_error(err), TransportError::Closed(_)));
    }
}
