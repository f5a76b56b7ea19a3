//! WebSocket transport speaking the Web PubSub JSON subprotocol.
//!
//! Each [`TransportLink`] is backed by a connection task that:
//! - Opens the socket, retrying with exponential backoff
//! - Maps service frames to [`TransportEvent`]s
//! - Writes queued client frames
//! - Reconnects after a drop until the transport is stopped
//!
//! The bus URL is expected to be a client access URL that already carries
//! its access token.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dunebugger_protocol::{ClientFrame, OutboundRequest, ServiceFrame, SystemEvent, SUBPROTOCOL};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Transport, TransportError, TransportEvent, TransportFactory, TransportLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Reconnect Policy
// ============================================================================

/// Backoff between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Upper bound for the delay.
    pub max_delay: Duration,

    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to use after waiting `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Opens Web PubSub connections.
#[derive(Debug, Clone, Default)]
pub struct WebPubSubTransportFactory {
    policy: ReconnectPolicy,
}

impl WebPubSubTransportFactory {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy }
    }
}

impl TransportFactory for WebPubSubTransportFactory {
    fn connect(&self, bus_url: &str) -> Result<TransportLink, TransportError> {
        if !(bus_url.starts_with("ws://") || bus_url.starts_with("wss://")) {
            return Err(TransportError::Connection(format!(
                "unsupported bus url {bus_url}, expected ws:// or wss://"
            )));
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let connected = Arc::new(AtomicBool::new(false));

        let task = ConnectionTask {
            url: bus_url.to_string(),
            policy: self.policy,
            events: event_tx,
            frames: frame_rx,
            cancel: cancel.clone(),
            connected: connected.clone(),
            ever_connected: false,
        };
        tokio::spawn(task.run());

        Ok(TransportLink {
            transport: Arc::new(WebPubSubTransport {
                frames: frame_tx,
                cancel,
                connected,
                next_ack_id: AtomicU64::new(1),
            }),
            events: event_rx,
        })
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Sending half of a Web PubSub connection.
///
/// Frames are queued for the connection task; a send returns once the
/// frame is queued, not when the service acknowledges it. Negative acks
/// arrive later as [`TransportEvent::Error`].
struct WebPubSubTransport {
    frames: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
    next_ack_id: AtomicU64,
}

impl WebPubSubTransport {
    fn queue(&self, frame: ClientFrame) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Stopped);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let text = frame.to_text()?;
        self.frames
            .send(text)
            .map_err(|_| TransportError::Stopped)
    }

    fn ack_id(&self) -> u64 {
        self.next_ack_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for WebPubSubTransport {
    async fn join_group(&self, group: &str) -> Result<(), TransportError> {
        self.queue(ClientFrame::join_group(group, self.ack_id()))
    }

    async fn send_to_group(
        &self,
        group: &str,
        request: &OutboundRequest,
    ) -> Result<(), TransportError> {
        let data = serde_json::to_value(request)?;
        self.queue(ClientFrame::send_to_group(group, data, self.ack_id()))
    }

    async fn stop(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

// ============================================================================
// Connection Task
// ============================================================================

/// Why a connected socket stopped being pumped.
enum PumpExit {
    /// The owner stopped the transport.
    Stopped,
    /// The socket closed or failed.
    Dropped(Option<String>),
}

struct ConnectionTask {
    url: String,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<TransportEvent>,
    frames: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
    ever_connected: bool,
}

impl ConnectionTask {
    async fn run(mut self) {
        info!(url = %redact(&self.url), "Bus connection starting");

        loop {
            let Some(ws) = self.connect_with_retry().await else {
                break;
            };

            self.discard_stale_frames();

            match self.pump(ws).await {
                PumpExit::Stopped => break,
                PumpExit::Dropped(reason) => {
                    self.connected.store(false, Ordering::SeqCst);
                    warn!(reason = reason.as_deref(), "Bus connection dropped");
                    self.emit(TransportEvent::Disconnected { reason });
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        debug!("Bus connection stopped");
    }

    /// Opens the socket, retrying with exponential backoff.
    ///
    /// Returns `None` once the transport is stopped.
    async fn connect_with_retry(&self) -> Option<WsStream> {
        let mut delay = self.policy.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);
            debug!(attempt, "Attempting to connect to bus");

            tokio::select! {
                result = open_socket(&self.url) => match result {
                    Ok(ws) => {
                        debug!(attempt, "Socket open");
                        return Some(ws);
                    }
                    Err(e) => {
                        debug!(attempt, error = %e, "Connection attempt failed");
                        self.emit(TransportEvent::Error(format!("connection attempt {attempt} failed: {e}")));
                    }
                },
                _ = self.cancel.cancelled() => return None,
            }

            tokio::select! {
                _ = sleep(delay) => {
                    delay = self.policy.next_delay(delay);
                }
                _ = self.cancel.cancelled() => {
                    debug!("Connection retry cancelled");
                    return None;
                }
            }
        }
    }

    /// Drops frames queued for a previous socket.
    fn discard_stale_frames(&mut self) {
        let mut discarded = 0usize;
        while self.frames.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(discarded, "Discarded frames queued before reconnect");
        }
    }

    /// Moves frames in both directions until the socket closes or the
    /// transport is stopped.
    async fn pump(&mut self, ws: WsStream) -> PumpExit {
        let (mut sink, mut stream) = ws.split();
        let mut close_reason: Option<String> = None;

        loop {
            // Queued frames are flushed before a stop is honoured
            tokio::select! {
                biased;

                frame = self.frames.recv() => {
                    let Some(text) = frame else {
                        return PumpExit::Stopped;
                    };
                    trace!(frame = %text, "Sending frame");
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        return PumpExit::Dropped(Some(e.to_string()));
                    }
                }

                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reason) = self.handle_text(&text) {
                            close_reason = Some(reason);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .or(close_reason);
                        return PumpExit::Dropped(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpExit::Dropped(Some(e.to_string())),
                    None => return PumpExit::Dropped(close_reason),
                },

                _ = self.cancel.cancelled() => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        trace!(error = %e, "Close frame not sent");
                    }
                    return PumpExit::Stopped;
                }
            }
        }
    }

    /// Handles one service frame. Returns the reason carried by a
    /// `disconnected` system event.
    fn handle_text(&mut self, text: &str) -> Option<String> {
        let frame = match ServiceFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable service frame");
                return None;
            }
        };

        match frame {
            ServiceFrame::System(SystemEvent::Connected { connection_id, .. }) => {
                self.connected.store(true, Ordering::SeqCst);
                let event = if self.ever_connected {
                    TransportEvent::Reconnected { connection_id }
                } else {
                    TransportEvent::Connected { connection_id }
                };
                self.ever_connected = true;
                self.emit(event);
            }
            ServiceFrame::System(SystemEvent::Disconnected { message }) => {
                info!(message = message.as_deref(), "Service announced disconnect");
                return message;
            }
            ServiceFrame::System(SystemEvent::Other) => {
                debug!("Ignoring system event");
            }
            ServiceFrame::Ack {
                ack_id,
                success,
                error,
            } => {
                if success {
                    trace!(ack_id, "Frame acknowledged");
                } else {
                    let detail = error
                        .map(|e| match e.message {
                            Some(message) => format!("{}: {message}", e.name),
                            None => e.name,
                        })
                        .unwrap_or_else(|| "no detail".to_string());
                    self.emit(TransportEvent::Error(format!(
                        "frame {ack_id} rejected: {detail}"
                    )));
                }
            }
            frame @ ServiceFrame::Message { .. } => match frame.into_group_data() {
                Some(data) => self.emit(TransportEvent::GroupMessage(data)),
                None => debug!("Ignoring server message"),
            },
            ServiceFrame::Unknown => debug!("Ignoring unknown service frame"),
        }

        None
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            trace!("Transport event receiver dropped");
        }
    }
}

/// Opens the socket with the JSON subprotocol.
async fn open_socket(url: &str) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(SUBPROTOCOL),
    );
    let (ws, _response) = connect_async(request).await?;
    Ok(ws)
}

/// Strips the query string, which carries the access token.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
