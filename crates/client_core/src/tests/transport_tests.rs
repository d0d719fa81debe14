use super::*;
use axum::{
    extract::{
        ws::{Message as AxumWsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use shared::protocol::AgentReply;
use tokio::net::TcpListener;

const EVENT_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct BackendState {
    received: mpsc::UnboundedSender<ClientRequest>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<BackendState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| agent_backend(socket, state))
}

async fn drop_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket.send(AxumWsMessage::Close(None)).await;
    })
}

/// Answers every `send_message` with a garbage frame, a status and a reply.
async fn agent_backend(mut socket: WebSocket, state: BackendState) {
    while let Some(Ok(frame)) = socket.recv().await {
        let AxumWsMessage::Text(text) = frame else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<ClientRequest>(&text) else {
            continue;
        };
        let ClientRequest::SendMessage { message } = request.clone();
        let _ = state.received.send(request);

        let mut frames = vec!["{not json".to_string()];
        for event in [
            ServerEvent::Status("thinking".into()),
            ServerEvent::ReceiveMessage(
                AgentReply::text(format!("echo: {message}")).with_agent("IT Assistant"),
            ),
        ] {
            frames.push(serde_json::to_string(&event).expect("encode event"));
        }
        for frame in frames {
            if socket.send(AxumWsMessage::Text(frame)).await.is_err() {
                return;
            }
        }
    }
}

async fn spawn_agent_backend() -> (String, mpsc::UnboundedReceiver<ClientRequest>) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (received, received_rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/drop", get(drop_handler))
        .with_state(BackendState { received });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), received_rx)
}

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(EVENT_WAIT, events.recv())
        .await
        .expect("transport event before timeout")
        .expect("transport event stream open")
}

fn fast_retries(max_retries: Option<u32>) -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        max_retries,
    }
}

#[test]
fn websocket_url_maps_http_schemes() {
    assert_eq!(
        websocket_url("http://localhost:3000", "/ws")
            .expect("http")
            .as_str(),
        "ws://localhost:3000/ws"
    );
    assert_eq!(
        websocket_url("https://agents.example.com", "/ws")
            .expect("https")
            .as_str(),
        "wss://agents.example.com/ws"
    );
    assert_eq!(
        websocket_url("ws://127.0.0.1:9000/socket", "")
            .expect("ws")
            .as_str(),
        "ws://127.0.0.1:9000/socket"
    );
}

#[test]
fn websocket_url_rejects_other_schemes() {
    let err = websocket_url("ftp://localhost", "/ws").expect_err("ftp");
    assert!(err.to_string().contains("unsupported scheme 'ftp'"));
    assert!(websocket_url("localhost:3000", "/ws").is_err());
    assert!(websocket_url("not a url", "/ws").is_err());
}

#[test]
fn reconnect_delay_doubles_up_to_cap() {
    let policy = ReconnectPolicy::default();
    assert_eq!(policy.delay_for(1), Duration::from_millis(500));
    assert_eq!(policy.delay_for(2), Duration::from_secs(1));
    assert_eq!(policy.delay_for(3), Duration::from_secs(2));
    assert_eq!(policy.delay_for(10), Duration::from_secs(10));
    assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(10));
}

#[test]
fn retry_budget_is_exhausted_after_max_retries() {
    assert!(ReconnectPolicy::never().exhausted(1));
    let policy = fast_retries(Some(2));
    assert!(!policy.exhausted(1));
    assert!(!policy.exhausted(2));
    assert!(policy.exhausted(3));
    assert!(!fast_retries(None).exhausted(u32::MAX));
}

#[tokio::test]
async fn delivers_server_events_and_skips_undecodable_frames() {
    let (server_url, mut received) = spawn_agent_backend().await;
    let url = websocket_url(&server_url, "/ws").expect("url");
    let (transport, mut events) = WebSocketTransport::spawn(url, ReconnectPolicy::never());

    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    transport
        .emit(ClientRequest::SendMessage {
            message: "printer offline".into(),
        })
        .expect("emit");

    let request = tokio::time::timeout(EVENT_WAIT, received.recv())
        .await
        .expect("backend received before timeout")
        .expect("backend channel open");
    assert_eq!(
        request,
        ClientRequest::SendMessage {
            message: "printer offline".into()
        }
    );

    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Server(ServerEvent::Status("thinking".into()))
    );
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Server(ServerEvent::ReceiveMessage(
            AgentReply::text("echo: printer offline").with_agent("IT Assistant")
        ))
    );

    transport.close().await;
}

#[tokio::test]
async fn reports_connect_error_and_stops_when_retries_run_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let url = websocket_url(&format!("http://{addr}"), "/ws").expect("url");
    let (_transport, mut events) = WebSocketTransport::spawn(url, fast_retries(Some(1)));

    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::ConnectError { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Reconnecting { attempt: 1 }
    );
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::ConnectError { .. }
    ));

    let end = tokio::time::timeout(EVENT_WAIT, events.recv())
        .await
        .expect("stream end before timeout");
    assert_eq!(end, None);
}

#[tokio::test]
async fn reconnects_after_link_loss() {
    let (server_url, _received) = spawn_agent_backend().await;
    let url = websocket_url(&server_url, "/drop").expect("url");
    let (transport, mut events) = WebSocketTransport::spawn(url, fast_retries(None));

    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Disconnected { reason: Some(_) }
    ));
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    transport.close().await;
}

#[tokio::test]
async fn close_ends_event_stream_and_refuses_further_emits() {
    let (server_url, _received) = spawn_agent_backend().await;
    let url = websocket_url(&server_url, "/ws").expect("url");
    let (transport, mut events) = WebSocketTransport::spawn(url, fast_retries(None));
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    transport.close().await;
    transport.close().await;

    let end = tokio::time::timeout(EVENT_WAIT, events.recv())
        .await
        .expect("stream end before timeout");
    assert_eq!(end, None);
    assert!(matches!(
        transport.emit(ClientRequest::SendMessage {
            message: "after close".into()
        }),
        Err(TransportError::Closed)
    ));
}
