use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, Role},
    protocol::AgentReply,
};

pub const ERROR_CONTENT_PREFIX: &str = "Error: ";
/// Stored for a reply that carries an image but no text.
pub const IMAGE_ONLY_CONTENT: &str = "[image]";
/// Stored for a reply that carries neither text nor an image.
pub const EMPTY_REPLY_CONTENT: &str = "[empty reply]";

/// One turn entry in the conversation. Built once by the session controller
/// and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub agent: Option<String>,
    pub image_url: Option<String>,
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub(crate) fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            agent: None,
            image_url: None,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    /// Blank reply text is replaced so no entry is ever stored empty.
    pub(crate) fn assistant(id: MessageId, reply: AgentReply) -> Self {
        let content = match (reply.content.trim().is_empty(), &reply.image_url) {
            (false, _) => reply.content,
            (true, Some(_)) => IMAGE_ONLY_CONTENT.to_string(),
            (true, None) => EMPTY_REPLY_CONTENT.to_string(),
        };
        Self {
            id,
            role: Role::Assistant,
            content,
            agent: reply.agent,
            image_url: reply.image_url,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn error(id: MessageId, description: &str) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: format!("{ERROR_CONTENT_PREFIX}{description}"),
            agent: None,
            image_url: None,
            is_error: true,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only, in arrival order. The entries sit behind an `Arc` so
/// snapshots share them until the next append.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    messages: Arc<[Message]>,
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self {
            messages: Arc::from(Vec::new()),
        }
    }
}

impl ConversationLog {
    pub(crate) fn push(&mut self, message: Message) {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.extend_from_slice(&self.messages);
        messages.push(message);
        self.messages = messages.into();
    }

    pub fn shared(&self) -> Arc<[Message]> {
        Arc::clone(&self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => f.write_str("Disconnected"),
            ConnectionStatus::Connected => f.write_str("Connected"),
        }
    }
}

/// Lifecycle of the single logical connection a controller owns.
/// `Disposed` is terminal; a disposed controller cannot be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPhase {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    EmptyText,
    Disconnected,
    Disposed,
    TransportClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(MessageId),
    Rejected(SendRejection),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent(_))
    }
}

/// Read-only view of the session handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: TransportPhase,
    pub connection_status: ConnectionStatus,
    pub pending_error: Option<String>,
    pub awaiting_response: bool,
    pub last_status: Option<String>,
    pub draft_input: String,
    pub messages: Arc<[Message]>,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }
}
