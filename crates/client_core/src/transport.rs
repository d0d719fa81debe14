use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::{ClientRequest, ServerEvent};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ClientError, TransportError};

const TRANSPORT_EVENT_BUFFER: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Notifications a transport delivers to the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: Option<String> },
    ConnectError { message: String },
    Reconnecting { attempt: u32 },
    Server(ServerEvent),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Queues one outbound request. Must not wait for the backend.
    fn emit(&self, request: ClientRequest) -> Result<(), TransportError>;
    /// Releases the connection. Safe to call more than once.
    async fn close(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive retries after a failure or lost link; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn never() -> Self {
        Self {
            max_retries: Some(0),
            ..Self::default()
        }
    }

    /// Doubling backoff starting at `initial_delay`, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn exhausted(&self, retry: u32) -> bool {
        self.max_retries.is_some_and(|max| retry > max)
    }
}

/// Maps the backend's HTTP origin onto its WebSocket endpoint.
pub fn websocket_url(server_url: &str, path: &str) -> Result<Url, ClientError> {
    let invalid = |reason: String| ClientError::InvalidServerUrl {
        url: server_url.to_string(),
        reason,
    };

    let mut url = Url::parse(server_url.trim()).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot switch scheme to '{scheme}'")))?;

    let path = path.trim();
    if !path.is_empty() {
        url.set_path(path);
    }
    Ok(url)
}

pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<ClientRequest>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Starts connecting immediately. The connection task keeps retrying per
    /// `policy` until it is closed, dropped, or runs out of retries; the
    /// returned receiver ends when the task does.
    pub fn spawn(url: Url, policy: ReconnectPolicy) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_connection_loop(
            url,
            policy,
            outbound_rx,
            events_tx,
            shutdown_rx,
        ));

        (
            Self {
                outbound,
                shutdown,
                task: Mutex::new(Some(task)),
            },
            events_rx,
        )
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn emit(&self, request: ClientRequest) -> Result<(), TransportError> {
        self.outbound
            .send(request)
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        let _ = self.shutdown.send(true);
        let Some(mut task) = self.task.lock().await.take() else {
            return;
        };
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            warn!("transport: close frame not acknowledged in time, aborting");
            task.abort();
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

enum LinkEnd {
    Shutdown,
    ReceiverGone,
    Lost(String),
}

async fn run_connection_loop(
    url: Url,
    policy: ReconnectPolicy,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientRequest>,
    events_tx: mpsc::Sender<TransportEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut retry: u32 = 0;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown_rx.changed() => break,
        };

        let notification = match connected {
            Ok((stream, _)) => {
                retry = 0;
                info!(url = %url, "transport: connected");
                if events_tx.send(TransportEvent::Connected).await.is_err() {
                    break;
                }
                match pump_link(stream, &mut outbound_rx, &events_tx, &mut shutdown_rx).await {
                    LinkEnd::Shutdown | LinkEnd::ReceiverGone => break,
                    LinkEnd::Lost(reason) => {
                        warn!(url = %url, %reason, "transport: link lost");
                        TransportEvent::Disconnected {
                            reason: Some(reason),
                        }
                    }
                }
            }
            Err(err) => {
                warn!(url = %url, error = %err, "transport: connect failed");
                TransportEvent::ConnectError {
                    message: err.to_string(),
                }
            }
        };
        if events_tx.send(notification).await.is_err() {
            break;
        }

        retry += 1;
        if policy.exhausted(retry) {
            warn!(url = %url, retries = retry - 1, "transport: giving up reconnecting");
            break;
        }
        let delay = policy.delay_for(retry);
        debug!(retry, delay_ms = delay.as_millis() as u64, "transport: waiting before reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }
        if events_tx
            .send(TransportEvent::Reconnecting { attempt: retry })
            .await
            .is_err()
        {
            break;
        }
    }
    debug!(url = %url, "transport: connection task finished");
}

async fn pump_link(
    stream: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientRequest>,
    events_tx: &mpsc::Sender<TransportEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> LinkEnd {
    let (mut writer, mut reader) = stream.split();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = writer.send(WsMessage::Close(None)).await;
                return LinkEnd::Shutdown;
            }
            request = outbound_rx.recv() => {
                let Some(request) = request else {
                    let _ = writer.send(WsMessage::Close(None)).await;
                    return LinkEnd::Shutdown;
                };
                let text = match serde_json::to_string(&request) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "transport: failed to encode outbound request");
                        continue;
                    }
                };
                if let Err(err) = writer.send(WsMessage::Text(text)).await {
                    return LinkEnd::Lost(format!("websocket send failed: {err}"));
                }
            }
            frame = reader.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        if events_tx.send(TransportEvent::Server(event)).await.is_err() {
                            return LinkEnd::ReceiverGone;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "transport: skipping undecodable server frame");
                    }
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "server closed the connection".to_string());
                    return LinkEnd::Lost(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    return LinkEnd::Lost(format!("websocket receive failed: {err}"));
                }
                None => return LinkEnd::Lost("connection closed".to_string()),
            },
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
