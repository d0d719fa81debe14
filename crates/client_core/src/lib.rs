use std::time::Duration;

use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info};

pub mod error;
pub mod session;
pub mod transport;
pub mod types;

pub use error::{ClientError, TransportError};
pub use session::SessionController;
pub use transport::{
    websocket_url, ReconnectPolicy, Transport, TransportEvent, WebSocketTransport,
};
pub use types::{
    ConnectionStatus, ConversationLog, Message, SendOutcome, SendRejection, SessionSnapshot,
    TransportPhase, EMPTY_REPLY_CONTENT, ERROR_CONTENT_PREFIX, IMAGE_ONLY_CONTENT,
};

const COMMAND_BUFFER: usize = 64;
const CLIENT_EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server_url: String,
    pub ws_path: String,
    pub reconnect: ReconnectPolicy,
    pub response_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            ws_path: "/ws".to_string(),
            reconnect: ReconnectPolicy::default(),
            response_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Ends an unanswered turn with an error entry once this elapses.
    /// `None` lets the processing indicator stay up until the backend answers.
    pub response_timeout: Option<Duration>,
}

/// Change notifications derived from consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    MessageAppended(Message),
    ConnectionChanged {
        phase: TransportPhase,
        status: ConnectionStatus,
        pending_error: Option<String>,
    },
    AwaitingChanged(bool),
}

enum SessionCommand {
    Send {
        text: String,
        reply: oneshot::Sender<SendOutcome>,
    },
    SubmitDraft {
        reply: oneshot::Sender<SendOutcome>,
    },
    SetDraft(String),
    ClearDraft,
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a session controller running on its own task. All commands and
/// transport events are applied one at a time on that task.
///
/// Dropping the handle aborts the task, which drops the controller and with
/// it the transport.
pub struct ChatSession {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<ClientEvent>,
    task: JoinHandle<()>,
}

impl ChatSession {
    pub fn connect(options: ClientOptions) -> Result<Self, ClientError> {
        let url = websocket_url(&options.server_url, &options.ws_path)?;
        info!(url = %url, "chat session: opening websocket transport");
        let (transport, transport_events) = WebSocketTransport::spawn(url, options.reconnect);
        Ok(Self::spawn(
            SessionController::new(transport),
            transport_events,
            SessionOptions {
                response_timeout: options.response_timeout,
            },
        ))
    }

    pub fn spawn<T: Transport + 'static>(
        mut controller: SessionController<T>,
        transport_events: mpsc::Receiver<TransportEvent>,
        options: SessionOptions,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(CLIENT_EVENT_BUFFER);
        let initial = controller.start();
        let (snapshot_tx, snapshots) = watch::channel(initial);

        let worker = SessionWorker {
            controller,
            commands: command_rx,
            transport_events,
            transport_open: true,
            response_timeout: options.response_timeout,
            deadline: None,
            snapshots: snapshot_tx,
            events: events.clone(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            commands,
            snapshots,
            events,
            task,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn send(&self, text: impl Into<String>) -> Result<SendOutcome, ClientError> {
        let (reply, outcome) = oneshot::channel();
        self.dispatch(SessionCommand::Send {
            text: text.into(),
            reply,
        })
        .await?;
        outcome.await.map_err(|_| ClientError::SessionClosed)
    }

    pub async fn submit_draft(&self) -> Result<SendOutcome, ClientError> {
        let (reply, outcome) = oneshot::channel();
        self.dispatch(SessionCommand::SubmitDraft { reply }).await?;
        outcome.await.map_err(|_| ClientError::SessionClosed)
    }

    pub async fn set_draft(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.dispatch(SessionCommand::SetDraft(text.into())).await
    }

    pub async fn clear_draft(&self) -> Result<(), ClientError> {
        self.dispatch(SessionCommand::ClearDraft).await
    }

    /// Disposes the controller and waits until the transport is released.
    pub async fn close(&self) -> Result<(), ClientError> {
        let (done, closed) = oneshot::channel();
        self.dispatch(SessionCommand::Close { done }).await?;
        closed.await.map_err(|_| ClientError::SessionClosed)
    }

    async fn dispatch(&self, command: SessionCommand) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct SessionWorker<T: Transport> {
    controller: SessionController<T>,
    commands: mpsc::Receiver<SessionCommand>,
    transport_events: mpsc::Receiver<TransportEvent>,
    transport_open: bool,
    response_timeout: Option<Duration>,
    deadline: Option<Instant>,
    snapshots: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<ClientEvent>,
}

impl<T: Transport + 'static> SessionWorker<T> {
    async fn run(mut self) {
        loop {
            let deadline = self.deadline;
            let mut pending_reply = None;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Close { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => pending_reply = self.handle_command(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                event = self.transport_events.recv(), if self.transport_open => match event {
                    Some(event) => {
                        let restarts_turn = matches!(
                            event,
                            TransportEvent::Server(shared::protocol::ServerEvent::Status(_))
                        );
                        self.controller.apply(event);
                        if restarts_turn {
                            self.arm_deadline();
                        }
                    }
                    None => {
                        debug!("chat session: transport event stream ended");
                        self.transport_open = false;
                    }
                },
                _ = wait_until(deadline) => {
                    if let Some(waited) = self.response_timeout {
                        self.controller.on_response_timeout(waited);
                    }
                }
            }
            self.publish();
            // Callers observe the published snapshot once their reply lands.
            if let Some((reply, outcome)) = pending_reply {
                let _ = reply.send(outcome);
            }
        }
    }

    fn handle_command(
        &mut self,
        command: SessionCommand,
    ) -> Option<(oneshot::Sender<SendOutcome>, SendOutcome)> {
        match command {
            SessionCommand::Send { text, reply } => {
                let outcome = self.controller.send(&text);
                self.after_send(outcome);
                Some((reply, outcome))
            }
            SessionCommand::SubmitDraft { reply } => {
                let outcome = self.controller.submit_draft();
                self.after_send(outcome);
                Some((reply, outcome))
            }
            SessionCommand::SetDraft(text) => {
                self.controller.set_draft(text);
                None
            }
            SessionCommand::ClearDraft => {
                self.controller.clear_draft();
                None
            }
            SessionCommand::Close { .. } => None,
        }
    }

    fn after_send(&mut self, outcome: SendOutcome) {
        if outcome.is_sent() {
            self.arm_deadline();
        }
    }

    fn arm_deadline(&mut self) {
        self.deadline = self.response_timeout.map(|timeout| Instant::now() + timeout);
    }

    async fn shutdown(&mut self) {
        self.controller.dispose().await;
        self.deadline = None;
        self.publish();
    }

    fn publish(&mut self) {
        let next = self.controller.snapshot();
        if !next.awaiting_response {
            self.deadline = None;
        }

        let previous = self.snapshots.borrow().clone();
        for message in next.messages.iter().skip(previous.messages.len()) {
            let _ = self.events.send(ClientEvent::MessageAppended(message.clone()));
        }
        if previous.phase != next.phase
            || previous.connection_status != next.connection_status
            || previous.pending_error != next.pending_error
        {
            let _ = self.events.send(ClientEvent::ConnectionChanged {
                phase: next.phase,
                status: next.connection_status,
                pending_error: next.pending_error.clone(),
            });
        }
        if previous.awaiting_response != next.awaiting_response {
            let _ = self
                .events
                .send(ClientEvent::AwaitingChanged(next.awaiting_response));
        }

        if previous != next {
            self.snapshots.send_replace(next);
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
