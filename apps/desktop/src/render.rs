//! Terminal presentation of session state. Reads snapshots and events only.

use chrono::Local;
use client_core::{ClientEvent, ConnectionStatus, Message};
use shared::domain::{AgentKind, Role};
use url::Url;

const ASSISTANT_AVATAR: &str = "🤖";

pub fn agent_badge(agent: Option<&str>) -> String {
    match agent {
        Some(label) => match AgentKind::from_label(label) {
            Some(kind) => format!("{} {}", kind.emoji(), kind.label()),
            None => format!("{ASSISTANT_AVATAR} {label}"),
        },
        None => ASSISTANT_AVATAR.to_string(),
    }
}

/// Absolute references pass through. Relative ones are appended to `origin`,
/// so a path prefix on the origin (`http://host/api`) is kept.
pub fn resolve_image_url(origin: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if let Ok(url) = Url::parse(reference) {
        return Some(url);
    }
    let base = origin.as_str().trim_end_matches('/');
    let path = reference.trim_start_matches('/');
    Url::parse(&format!("{base}/{path}")).ok()
}

pub fn format_message(message: &Message, image_origin: &Url) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M:%S");
    let mut line = match message.role {
        Role::User => format!("[{time}] you> {}", message.content),
        Role::Assistant if message.is_error => format!("[{time}] ! {}", message.content),
        Role::Assistant => format!(
            "[{time}] {}> {}",
            agent_badge(message.agent.as_deref()),
            message.content
        ),
    };

    if let Some(reference) = message.image_url.as_deref() {
        match resolve_image_url(image_origin, reference) {
            Some(url) => line.push_str(&format!("\n           image: {url}")),
            None => line.push_str(&format!("\n           image: {reference}")),
        }
    }
    line
}

pub fn connection_banner(status: ConnectionStatus, pending_error: Option<&str>) -> String {
    match (status, pending_error) {
        (ConnectionStatus::Connected, _) => "* Connected".to_string(),
        (ConnectionStatus::Disconnected, Some(error)) => format!("* Disconnected ({error})"),
        (ConnectionStatus::Disconnected, None) => "* Disconnected".to_string(),
    }
}

pub fn processing_line() -> String {
    format!("{ASSISTANT_AVATAR} ...")
}

/// One printable block per event; `None` when the event has nothing to show.
pub fn render_event(event: &ClientEvent, image_origin: &Url) -> Option<String> {
    match event {
        ClientEvent::MessageAppended(message) if message.role == Role::User => None,
        ClientEvent::MessageAppended(message) => Some(format_message(message, image_origin)),
        ClientEvent::ConnectionChanged {
            status,
            pending_error,
            ..
        } => Some(connection_banner(*status, pending_error.as_deref())),
        ClientEvent::AwaitingChanged(true) => Some(processing_line()),
        ClientEvent::AwaitingChanged(false) => None,
    }
}
