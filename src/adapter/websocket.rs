//! WebSocket transport.
//!
//! Liveness probes are WebSocket ping frames carrying an 8-byte nonce; the
//! probe resolves when the matching pong arrives. A reader task owns the
//! receive half: it answers server pings, routes pongs to waiting probes
//! and forwards text frames to an optional inbound channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::port::{Dialer, Transport, TransportHandle};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Shared {
    url: String,
    sink: AsyncMutex<SplitSink<WsStream, Message>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    closed: AtomicBool,
}

impl Shared {
    /// Drop every waiting probe; their receivers see the connection closed.
    fn fail_pending(&self) {
        self.pending.lock().clear();
    }
}

pub struct WebSocketTransport {
    shared: Arc<Shared>,
    next_nonce: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Open a connection to `url`.
    ///
    /// Text frames are forwarded to `inbound` when given; a full channel
    /// drops the frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or handshake fails.
    pub async fn connect(url: &str, inbound: Option<mpsc::Sender<String>>) -> Result<Self> {
        info!(url = %url, "Connecting to WebSocket");
        let (ws, response) = connect_async(url).await?;
        info!(url = %url, status = %response.status(), "WebSocket connected");

        let (sink, stream) = ws.split();
        let shared = Arc::new(Shared {
            url: url.to_string(),
            sink: AsyncMutex::new(sink),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), stream, inbound));

        Ok(Self {
            shared,
            next_nonce: AtomicU64::new(1),
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Send a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the write fails.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.shared
            .sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Transport(format!("{} is closed", self.shared.url)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(nonce, tx);
        // The reader may have exited between the check above and the insert.
        if self.is_closed() {
            self.shared.pending.lock().remove(&nonce);
            return self.ensure_open();
        }

        let sent = self
            .shared
            .sink
            .lock()
            .await
            .send(Message::Ping(nonce.to_be_bytes().to_vec()))
            .await;
        if let Err(e) = sent {
            self.shared.pending.lock().remove(&nonce);
            return Err(e.into());
        }

        // Removed from the map by a matching pong or by the reader exiting.
        let acked = rx.await;
        self.shared.pending.lock().remove(&nonce);
        acked.map_err(|_| Error::Transport(format!("{} closed before pong", self.shared.url)))
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.shared.sink.lock().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(url = %self.shared.url, error = %e, "Close frame not sent");
        }
        let _ = sink.close().await;
        drop(sink);

        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.shared.fail_pending();
        debug!(url = %self.shared.url, "WebSocket closed");
    }

    fn peer(&self) -> String {
        self.shared.url.clone()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut stream: SplitStream<WsStream>,
    inbound: Option<mpsc::Sender<String>>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Pong(payload)) => {
                let Ok(bytes) = <[u8; 8]>::try_from(payload.as_slice()) else {
                    debug!(url = %shared.url, "Unsolicited pong");
                    continue;
                };
                let nonce = u64::from_be_bytes(bytes);
                if let Some(waiter) = shared.pending.lock().remove(&nonce) {
                    let _ = waiter.send(());
                }
            }
            Ok(Message::Ping(payload)) => {
                if let Err(e) = shared.sink.lock().await.send(Message::Pong(payload)).await {
                    warn!(url = %shared.url, error = %e, "Failed to answer ping");
                    break;
                }
            }
            Ok(Message::Text(text)) => {
                if let Some(inbound) = &inbound {
                    if let Err(mpsc::error::TrySendError::Full(_)) = inbound.try_send(text) {
                        warn!(url = %shared.url, "Inbound channel full, dropping frame");
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                info!(url = %shared.url, frame = ?frame, "WebSocket closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(url = %shared.url, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    shared.closed.store(true, Ordering::SeqCst);
    shared.fail_pending();
}

/// Dials a fixed WebSocket URL. Used by recovery to re-establish outbound
/// connections.
pub struct WebSocketDialer {
    url: String,
    inbound: Option<mpsc::Sender<String>>,
}

impl WebSocketDialer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            inbound: None,
        }
    }

    /// Forward text frames of every dialed connection to `inbound`.
    pub fn with_inbound(mut self, inbound: mpsc::Sender<String>) -> Self {
        self.inbound = Some(inbound);
        self
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self) -> Result<TransportHandle> {
        let transport = WebSocketTransport::connect(&self.url, self.inbound.clone()).await?;
        Ok(Arc::new(transport))
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}
