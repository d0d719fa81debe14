use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure the backend reports for the turn currently in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct TurnError {
    pub message: String,
}

impl TurnError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
