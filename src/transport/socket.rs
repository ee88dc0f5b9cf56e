//! WebSocket channel to the tracking server.
//!
//! Frames are JSON envelopes `{"event": "...", "data": {...}}`. Emits are
//! fire-and-forget: while disconnected they fail immediately instead of
//! queueing, and the caller decides whether to fall back to REST.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::dispatch::PendingUpdate;
use crate::error::{TrackingError, TrackingResult};
use crate::models::{ShiftRequest, TrackingStatus, TransitionKind};

use super::auth::AuthToken;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Reconnection delay after a WebSocket failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const OUTBOUND_BUFFER: usize = 128;
const INBOUND_BUFFER: usize = 32;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub session_id: String,
    pub status: TrackingStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "location:update")]
    LocationUpdate(PendingUpdate),
    /// Status-only update, e.g. the final `inactive` on stop.
    #[serde(rename = "location:update")]
    StatusUpdate(StatusUpdate),
    #[serde(rename = "shift:start")]
    ShiftStart(ShiftRequest),
    #[serde(rename = "shift:end")]
    ShiftEnd(ShiftRequest),
    #[serde(rename = "location:get_interval")]
    GetInterval,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::LocationUpdate(_) | ClientEvent::StatusUpdate(_) => "location:update",
            ClientEvent::ShiftStart(_) => "shift:start",
            ClientEvent::ShiftEnd(_) => "shift:end",
            ClientEvent::GetInterval => "location:get_interval",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTransition {
    #[serde(default)]
    pub geofence_id: Option<String>,
    #[serde(default, alias = "type")]
    pub kind: Option<TransitionKind>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "geofence:transition")]
    GeofenceTransition(RemoteTransition),
    #[serde(rename = "location:update_interval")]
    UpdateInterval {
        /// Milliseconds.
        interval: u64,
    },
    #[serde(rename = "location:error")]
    LocationError { message: String },
}

#[async_trait]
pub trait SocketChannel: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn emit(&self, event: ClientEvent) -> TrackingResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent>;
}

/// tokio-tungstenite implementation that reconnects with a fixed delay.
pub struct WsChannel {
    connected: Arc<AtomicBool>,
    outbound: mpsc::Sender<String>,
    inbound: broadcast::Sender<ServerEvent>,
    shutdown: CancellationToken,
}

impl WsChannel {
    /// Spawns the connection loop on the current runtime.
    pub fn connect(url: String, token: AuthToken) -> Self {
        let connected = Arc::new(AtomicBool::new(false));
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (inbound_tx, _) = broadcast::channel(INBOUND_BUFFER);
        let shutdown = CancellationToken::new();

        tokio::spawn(run(
            url,
            token,
            connected.clone(),
            outbound_rx,
            inbound_tx.clone(),
            shutdown.clone(),
        ));

        Self {
            connected,
            outbound: outbound_tx,
            inbound: inbound_tx,
            shutdown,
        }
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl SocketChannel for WsChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: ClientEvent) -> TrackingResult<()> {
        if !self.is_connected() {
            return Err(TrackingError::Network("socket not connected".into()));
        }
        let name = event.name();
        let json = serde_json::to_string(&event)
            .map_err(|err| TrackingError::Network(format!("failed to encode {name}: {err}")))?;
        self.outbound
            .try_send(json)
            .map_err(|err| TrackingError::Network(format!("socket send failed for {name}: {err}")))
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inbound.subscribe()
    }
}

async fn run(
    url: String,
    token: AuthToken,
    connected: Arc<AtomicBool>,
    mut outbound: mpsc::Receiver<String>,
    inbound: broadcast::Sender<ServerEvent>,
    shutdown: CancellationToken,
) {
    loop {
        log_info!("Connecting to tracking socket at {url}");

        let request = match build_request(&url, &token) {
            Ok(request) => request,
            Err(err) => {
                log_error!("Invalid socket request for {url}: {err}");
                return;
            }
        };

        tokio::select! {
            result = connect_async(request) => match result {
                Ok((ws_stream, _response)) => {
                    log_info!("Tracking socket connected");
                    connected.store(true, Ordering::SeqCst);
                    run_session(ws_stream, &mut outbound, &inbound, &shutdown).await;
                    connected.store(false, Ordering::SeqCst);
                    log_warn!("Tracking socket session ended");
                }
                Err(err) => {
                    log_error!("Tracking socket connection failed: {err}");
                }
            },
            _ = shutdown.cancelled() => {}
        }

        if shutdown.is_cancelled() {
            log_info!("Tracking socket closed");
            return;
        }

        // Anything emitted while the link was down is stale now.
        while outbound.try_recv().is_ok() {}

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}

fn build_request(
    url: &str,
    token: &AuthToken,
) -> Result<
    tokio_tungstenite::tungstenite::handshake::client::Request,
    tokio_tungstenite::tungstenite::Error,
> {
    let mut request = url.into_client_request()?;
    if let Some(bearer) = token.bearer() {
        if let Ok(value) = HeaderValue::from_str(&bearer) {
            request.headers_mut().insert("Authorization", value);
        }
    }
    Ok(request)
}

async fn run_session(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    outbound: &mut mpsc::Receiver<String>,
    inbound: &broadcast::Sender<ServerEvent>,
    shutdown: &CancellationToken,
) {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(json) = frame else { break };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    log_error!("Tracking socket send failed: {e}");
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_incoming(inbound, &text),
                    Some(Ok(Message::Close(frame))) => {
                        log_info!("Server closed tracking socket: {frame:?}");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log_error!("Tracking socket receive error: {e}");
                        break;
                    }
                    None => break,
                }
            }
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

fn handle_incoming(inbound: &broadcast::Sender<ServerEvent>, text: &str) {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => {
            log_debug!("Server event: {event:?}");
            // No subscribers is fine.
            let _ = inbound.send(event);
        }
        Err(e) => {
            log_warn!("Unknown or malformed server event: {e} ({text})");
        }
    }
}
