//! Session controller: the single owner of the transport, the conversation
//! log and the derived connection/typing state.
//!
//! Every inbound notification has its own entry point and runs to completion
//! before returning the resulting snapshot. Nothing in here blocks or awaits
//! the backend; outbound sends are handed to the transport and forgotten.

use std::time::Duration;

use shared::{
    domain::MessageId,
    error::TurnError,
    protocol::{AgentReply, ClientRequest, ServerEvent},
};
use tracing::{debug, info, warn};

use crate::{
    transport::{Transport, TransportEvent},
    types::{
        ConnectionStatus, ConversationLog, Message, SendOutcome, SendRejection, SessionSnapshot,
        TransportPhase,
    },
};

const CONNECT_FAILED_DESCRIPTION: &str = "Failed to connect to server";
const DISCONNECTED_DESCRIPTION: &str = "Disconnected from server";

pub struct SessionController<T: Transport> {
    transport: T,
    log: ConversationLog,
    phase: TransportPhase,
    connection_status: ConnectionStatus,
    pending_error: Option<String>,
    awaiting_response: bool,
    last_status: Option<String>,
    draft_input: String,
    next_message_id: u64,
}

impl<T: Transport> SessionController<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            log: ConversationLog::default(),
            phase: TransportPhase::Idle,
            connection_status: ConnectionStatus::Disconnected,
            pending_error: None,
            awaiting_response: false,
            last_status: None,
            draft_input: String::new(),
            next_message_id: 1,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            connection_status: self.connection_status,
            pending_error: self.pending_error.clone(),
            awaiting_response: self.awaiting_response,
            last_status: self.last_status.clone(),
            draft_input: self.draft_input.clone(),
            messages: self.log.shared(),
        }
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn phase(&self) -> TransportPhase {
        self.phase
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    pub fn is_disposed(&self) -> bool {
        self.phase == TransportPhase::Disposed
    }

    /// `Idle -> Connecting`. Only the first call has an effect.
    pub fn start(&mut self) -> SessionSnapshot {
        if self.phase == TransportPhase::Idle {
            info!("session: connecting");
            self.phase = TransportPhase::Connecting;
        }
        self.snapshot()
    }

    pub fn apply(&mut self, event: TransportEvent) -> SessionSnapshot {
        match event {
            TransportEvent::Connected => self.on_connect(),
            TransportEvent::Disconnected { reason } => self.on_disconnect(reason.as_deref()),
            TransportEvent::ConnectError { message } => self.on_connect_error(&message),
            TransportEvent::Reconnecting { attempt } => self.on_reconnecting(attempt),
            TransportEvent::Server(event) => match event {
                ServerEvent::ReceiveMessage(reply) => self.on_receive(reply),
                ServerEvent::Status(label) => self.on_status(label),
                ServerEvent::Error(error) => self.on_error(error),
            },
        }
    }

    pub fn on_connect(&mut self) -> SessionSnapshot {
        if self.ignore_after_disposal("connect") {
            return self.snapshot();
        }
        info!("session: connected");
        self.phase = TransportPhase::Connected;
        self.connection_status = ConnectionStatus::Connected;
        self.pending_error = None;
        self.snapshot()
    }

    pub fn on_disconnect(&mut self, reason: Option<&str>) -> SessionSnapshot {
        if self.ignore_after_disposal("disconnect") {
            return self.snapshot();
        }
        info!(reason = reason.unwrap_or_default(), "session: disconnected");
        self.mark_disconnected(describe(DISCONNECTED_DESCRIPTION, reason));
        self.snapshot()
    }

    pub fn on_connect_error(&mut self, description: &str) -> SessionSnapshot {
        if self.ignore_after_disposal("connect_error") {
            return self.snapshot();
        }
        warn!(error = description, "session: connection attempt failed");
        self.mark_disconnected(describe(CONNECT_FAILED_DESCRIPTION, Some(description)));
        self.snapshot()
    }

    /// The transport started another attempt. Status stays `Disconnected`
    /// until it acknowledges the link.
    pub fn on_reconnecting(&mut self, attempt: u32) -> SessionSnapshot {
        if self.ignore_after_disposal("reconnecting") {
            return self.snapshot();
        }
        debug!(attempt, "session: transport reconnecting");
        if self.phase != TransportPhase::Connected {
            self.phase = TransportPhase::Connecting;
        }
        self.snapshot()
    }

    /// Replies are matched to the outstanding turn by arrival order only.
    pub fn on_receive(&mut self, reply: AgentReply) -> SessionSnapshot {
        if self.ignore_after_disposal("receive_message") {
            return self.snapshot();
        }
        let id = self.allocate_id();
        debug!(
            message_id = id.0,
            agent = reply.agent.as_deref().unwrap_or("none"),
            has_image = reply.image_url.is_some(),
            "session: assistant reply received"
        );
        self.log.push(Message::assistant(id, reply));
        self.finish_turn();
        self.snapshot()
    }

    pub fn on_status(&mut self, label: String) -> SessionSnapshot {
        if self.ignore_after_disposal("status") {
            return self.snapshot();
        }
        debug!(status = %label, "session: backend processing");
        self.awaiting_response = true;
        self.last_status = Some(label);
        self.snapshot()
    }

    pub fn on_error(&mut self, error: TurnError) -> SessionSnapshot {
        if self.ignore_after_disposal("error") {
            return self.snapshot();
        }
        warn!(error = %error, "session: backend reported turn failure");
        self.append_error(&error.message);
        self.snapshot()
    }

    /// Ends an unanswered turn with an error entry. No-op when nothing is
    /// outstanding.
    pub fn on_response_timeout(&mut self, waited: Duration) -> SessionSnapshot {
        if self.ignore_after_disposal("response_timeout") || !self.awaiting_response {
            return self.snapshot();
        }
        warn!(waited_ms = waited.as_millis() as u64, "session: response timed out");
        self.append_error(&format!("no response from server within {waited:?}"));
        self.snapshot()
    }

    pub fn set_draft(&mut self, text: impl Into<String>) -> SessionSnapshot {
        if !self.is_disposed() {
            self.draft_input = text.into();
        }
        self.snapshot()
    }

    pub fn clear_draft(&mut self) -> SessionSnapshot {
        self.set_draft(String::new())
    }

    pub fn submit_draft(&mut self) -> SendOutcome {
        let text = self.draft_input.clone();
        self.send(&text)
    }

    /// Appends the user entry and hands one `send_message` to the transport.
    /// Rejections leave the log, the draft and the typing state untouched.
    pub fn send(&mut self, text: &str) -> SendOutcome {
        if let Some(rejection) = self.send_precondition(text) {
            debug!(?rejection, "session: send rejected");
            return SendOutcome::Rejected(rejection);
        }

        let request = ClientRequest::SendMessage {
            message: text.to_string(),
        };
        if let Err(err) = self.transport.emit(request) {
            warn!(error = %err, "session: transport refused outbound message");
            return SendOutcome::Rejected(SendRejection::TransportClosed);
        }

        let id = self.allocate_id();
        self.log.push(Message::user(id, text));
        self.draft_input.clear();
        self.awaiting_response = true;
        debug!(message_id = id.0, "session: user message sent");
        SendOutcome::Sent(id)
    }

    /// Releases the transport. Every later event is ignored.
    pub async fn dispose(&mut self) -> SessionSnapshot {
        if self.is_disposed() {
            return self.snapshot();
        }
        info!("session: disposing");
        self.phase = TransportPhase::Disposed;
        self.connection_status = ConnectionStatus::Disconnected;
        self.transport.close().await;
        self.snapshot()
    }

    fn send_precondition(&self, text: &str) -> Option<SendRejection> {
        if self.is_disposed() {
            Some(SendRejection::Disposed)
        } else if text.trim().is_empty() {
            Some(SendRejection::EmptyText)
        } else if self.connection_status != ConnectionStatus::Connected {
            Some(SendRejection::Disconnected)
        } else {
            None
        }
    }

    fn mark_disconnected(&mut self, description: String) {
        self.phase = TransportPhase::Disconnected;
        self.connection_status = ConnectionStatus::Disconnected;
        self.pending_error = Some(description);
    }

    fn append_error(&mut self, description: &str) {
        let id = self.allocate_id();
        self.log.push(Message::error(id, description));
        self.finish_turn();
    }

    fn finish_turn(&mut self) {
        self.awaiting_response = false;
        self.last_status = None;
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = MessageId(self.next_message_id);
        self.next_message_id += 1;
        id
    }

    fn ignore_after_disposal(&self, event: &'static str) -> bool {
        if self.is_disposed() {
            debug!(event, "session: ignoring event after disposal");
            return true;
        }
        false
    }
}

fn describe(base: &str, detail: Option<&str>) -> String {
    match detail.map(str::trim).filter(|detail| !detail.is_empty()) {
        Some(detail) => format!("{base}: {detail}"),
        None => base.to_string(),
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
