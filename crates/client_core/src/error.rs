use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport outbound queue is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },
    #[error("chat session is closed")]
    SessionClosed,
}
